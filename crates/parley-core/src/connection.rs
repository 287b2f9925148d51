//! Per-connection lifecycle state machine.
//!
//! Manages handshake deadlines, heartbeats, idle timeouts, and the
//! consecutive decode-failure budget. Uses the action pattern: methods take
//! time as input and return actions for the gateway to execute, keeping the
//! state machine pure and directly testable.
//!
//! # State Machine
//!
//! ```text
//! ┌───────────────┐  verified Hello  ┌─────────────┐
//! │ AwaitingHello │─────────────────>│ Established │
//! └───────────────┘                  └─────────────┘
//!         │                                 │
//!         │ handshake timeout               │ Goodbye / idle timeout /
//!         │ bad credential                  │ decode-failure budget
//!         ↓                                 ↓
//!    ┌────────┐                        ┌────────┐
//!    │ Closed │<───────────────────────│ Closed │
//!    └────────┘                        └────────┘
//! ```

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use parley_proto::{Frame, FrameHeader, Opcode};

use crate::error::ConnectionError;

/// Time allowed to present a valid Hello after the transport connects.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval at which the server sends Ping frames once established.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Consecutive undecodable frames tolerated before the connection is closed
/// for protocol abuse.
pub const DEFAULT_DECODE_FAILURE_LIMIT: u32 = 5;

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Send this frame to the peer
    SendFrame(Frame),

    /// Close the connection with this reason
    Close {
        /// Reason for closing the connection
        reason: String,
    },
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport connected, Hello not yet verified
    AwaitingHello,
    /// Handshake complete, session registered
    Established,
    /// Connection closed (graceful or error)
    Closed,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for completing the handshake
    pub handshake_timeout: Duration,
    /// Heartbeat interval while established
    pub heartbeat_interval: Duration,
    /// Idle timeout before disconnecting; defaults to twice the heartbeat
    /// interval
    pub idle_timeout: Duration,
    /// Consecutive decode failures tolerated before closing
    pub decode_failure_limit: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: DEFAULT_HEARTBEAT_INTERVAL * 2,
            decode_failure_limit: DEFAULT_DECODE_FAILURE_LIMIT,
        }
    }
}

impl ConnectionConfig {
    /// Build a config from a heartbeat interval, deriving the idle timeout
    /// as twice the interval.
    #[must_use]
    pub fn with_heartbeat_interval(heartbeat_interval: Duration) -> Self {
        Self { heartbeat_interval, idle_timeout: heartbeat_interval * 2, ..Self::default() }
    }
}

/// Connection state machine.
///
/// Pure: no I/O, no clock access. Time is passed into every method that
/// needs it, and the instant type is generic so tests can drive virtual
/// time.
#[derive(Debug, Clone)]
pub struct Connection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Current state
    state: ConnectionState,
    /// Configuration
    config: ConnectionConfig,
    /// Last activity timestamp (any inbound frame)
    last_activity: I,
    /// Last heartbeat sent timestamp
    last_heartbeat: Option<I>,
    /// Consecutive decode failures since the last valid frame
    decode_failures: u32,
    /// Session ID assigned at handshake completion
    session_id: Option<u64>,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new connection awaiting its handshake.
    pub fn new(now: I, config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::AwaitingHello,
            config,
            last_activity: now,
            last_heartbeat: None,
            decode_failures: 0,
            session_id: None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Session ID assigned at handshake completion. `None` before then.
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Heartbeat interval from the configuration.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }

    /// Complete the handshake after the gateway verified the credential.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::InvalidState`] unless awaiting the handshake
    pub fn establish(&mut self, session_id: u64, now: I) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::AwaitingHello {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "establish",
            });
        }

        self.state = ConnectionState::Established;
        self.session_id = Some(session_id);
        self.last_activity = now;

        Ok(())
    }

    /// Record a successfully decoded inbound frame.
    ///
    /// Refreshes the idle deadline and resets the decode-failure streak.
    pub fn mark_frame_ok(&mut self, now: I) {
        self.last_activity = now;
        self.decode_failures = 0;
    }

    /// Record an undecodable inbound frame.
    ///
    /// Returns a close action once the consecutive-failure budget is spent;
    /// until then the frame is simply dropped and the caller reports a
    /// protocol rejection to the peer.
    pub fn record_decode_failure(&mut self, now: I) -> Option<ConnectionAction> {
        self.last_activity = now;
        self.decode_failures += 1;

        if self.decode_failures >= self.config.decode_failure_limit {
            self.state = ConnectionState::Closed;
            return Some(ConnectionAction::Close {
                reason: format!(
                    "protocol abuse: {} consecutive undecodable frames",
                    self.decode_failures
                ),
            });
        }

        None
    }

    /// Consecutive decode failures since the last valid frame.
    #[must_use]
    pub fn decode_failures(&self) -> u32 {
        self.decode_failures
    }

    /// Mark the connection closed.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Elapsed time past the applicable deadline, if any.
    ///
    /// `AwaitingHello` connections answer to the handshake timeout,
    /// established ones to the idle timeout.
    #[must_use]
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        let elapsed = now - self.last_activity;

        let timeout = match self.state {
            ConnectionState::AwaitingHello => self.config.handshake_timeout,
            ConnectionState::Established => self.config.idle_timeout,
            ConnectionState::Closed => return None,
        };

        if elapsed > timeout { Some(elapsed) } else { None }
    }

    /// Periodic maintenance: timeout detection and heartbeat sending.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(elapsed) = self.check_timeout(now) {
            let reason = match self.state {
                ConnectionState::AwaitingHello => format!("handshake timeout after {elapsed:?}"),
                _ => format!("idle timeout after {elapsed:?}"),
            };

            self.close();
            actions.push(ConnectionAction::Close { reason });
            return actions;
        }

        if self.state == ConnectionState::Established {
            let due = match self.last_heartbeat {
                None => true,
                Some(last) => now - last >= self.config.heartbeat_interval,
            };

            if due {
                let ping = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());
                actions.push(ConnectionAction::SendFrame(ping));
                self.last_heartbeat = Some(now);
            }
        }

        actions
    }

    /// Process a session-layer frame (Ping, Pong, Goodbye).
    ///
    /// Chat frames are routed above this layer; this handles only liveness
    /// and shutdown.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::UnexpectedFrame`] if the opcode is not valid for
    ///   the current state
    pub fn handle_session_frame(
        &mut self,
        frame: &Frame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.mark_frame_ok(now);

        let Some(opcode) = frame.header.opcode_enum() else {
            return Err(ConnectionError::UnexpectedFrame {
                state: self.state,
                opcode: frame.header.opcode(),
            });
        };

        match (self.state, opcode) {
            (ConnectionState::Established, Opcode::Ping) => {
                let pong = Frame::new(FrameHeader::new(Opcode::Pong), Vec::new());
                Ok(vec![ConnectionAction::SendFrame(pong)])
            },

            (ConnectionState::Established, Opcode::Pong) => {
                // Activity already refreshed
                Ok(vec![])
            },

            (state, Opcode::Goodbye) if state != ConnectionState::Closed => {
                self.state = ConnectionState::Closed;
                Ok(vec![ConnectionAction::Close { reason: "peer goodbye".to_string() }])
            },

            (state, opcode) => {
                Err(ConnectionError::UnexpectedFrame { state, opcode: opcode.to_u16() })
            },
        }
    }
}
