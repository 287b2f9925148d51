//! Connection gateway: handshake, read loop, and per-connection tasks.
//!
//! The external-facing edge of the relay, kept thin: it authenticates the
//! handshake, owns the per-connection liveness state machine, and shuttles
//! decoded frames into the router. Three tasks serve one connection - the
//! read loop (this module's main path), a writer task draining the outbound
//! queue into the server's unidirectional stream, and a maintenance task
//! driving heartbeats and timeouts.
//!
//! Failure policy per the protocol contract: a bad credential or a frame
//! before the handshake closes the connection; an undecodable payload is
//! answered with a protocol rejection and dropped, closing only after the
//! consecutive-failure budget is spent; a structurally invalid header loses
//! stream framing and closes immediately.

use std::{sync::Arc, time::Duration};

use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::Mutex;
use parley_core::{
    Connection, ConnectionAction, ConnectionConfig, CredentialVerifier, env::Environment,
};
use parley_proto::{Frame, FrameHeader, Opcode, Payload, RejectPayload, payloads::session};
use tokio::sync::mpsc;

use crate::{
    error::{RelayError, ServerError},
    registry::{SessionEdge, SessionRegistry},
    router::Router,
    store::ChatStore,
    system_env::SystemEnv,
    transport::QuinnConnection,
};

/// QUIC application close codes.
pub(crate) const CLOSE_NORMAL: u32 = 0;
const CLOSE_UNAUTHENTICATED: u32 = 1;
const CLOSE_PROTOCOL_ABUSE: u32 = 2;
const CLOSE_TIMEOUT: u32 = 3;
const CLOSE_SERVER_FULL: u32 = 4;

/// Cadence of the per-connection maintenance task.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Shared per-server context handed to every connection task.
pub(crate) struct Gateway<S: ChatStore> {
    /// Frame router over the shared entities.
    pub router: Arc<Router<S, SystemEnv>>,
    /// Live session registry.
    pub registry: Arc<SessionRegistry>,
    /// Verifier for externally issued handshake credentials.
    pub verifier: Arc<dyn CredentialVerifier>,
    /// Production environment (time, RNG).
    pub env: SystemEnv,
    /// Per-connection lifecycle configuration.
    pub connection_config: ConnectionConfig,
    /// Session id → connection, for reaper-initiated teardown.
    pub connections: Arc<DashMap<u64, QuinnConnection>>,
    /// Depth of each session's outbound frame queue.
    pub outbound_queue_depth: usize,
    /// Sessions accepted before new connections are turned away.
    pub max_sessions: usize,
}

/// State carried out of a successful handshake.
struct Established {
    user_id: u64,
    session_id: u64,
    edge: SessionEdge,
    recv: quinn::RecvStream,
    outbound: mpsc::Sender<Frame>,
    machine: Arc<Mutex<Connection>>,
}

impl<S: ChatStore> Gateway<S> {
    /// Serve one QUIC connection from handshake to teardown.
    pub async fn handle_connection(&self, conn: QuinnConnection) {
        let remote = conn.remote_addr();

        if self.registry.session_count() >= self.max_sessions {
            tracing::warn!(%remote, "connection rejected: server full");
            conn.close(CLOSE_SERVER_FULL.into(), b"server full");
            return;
        }

        let established = match self.handshake(&conn).await {
            Ok(established) => established,
            Err(err) => {
                tracing::debug!(%remote, error = %err, "handshake failed");
                return;
            },
        };

        let session_id = established.session_id;
        let user_id = established.user_id;
        tracing::info!(%remote, session_id, user_id, "session established");

        self.connections.insert(session_id, conn.clone());
        self.router.on_session_open(user_id, session_id, established.edge);

        let maintenance = tokio::spawn(run_maintenance(
            Arc::clone(&established.machine),
            established.outbound.clone(),
            conn.clone(),
            self.env,
        ));

        self.read_loop(&conn, established).await;

        maintenance.abort();
        self.connections.remove(&session_id);
        self.router.on_session_closed(session_id);
        conn.close(CLOSE_NORMAL.into(), b"session ended");

        tracing::info!(session_id, user_id, "session closed");
    }

    /// Authenticate the connection and register its session.
    ///
    /// The whole exchange - the client's stream, its Hello frame, credential
    /// verification, registration - must complete within the handshake
    /// timeout or the connection is dropped.
    async fn handshake(&self, conn: &QuinnConnection) -> Result<Established, ServerError> {
        let timeout = self.connection_config.handshake_timeout;

        match tokio::time::timeout(timeout, self.handshake_inner(conn)).await {
            Ok(result) => result,
            Err(_) => {
                conn.close(CLOSE_TIMEOUT.into(), b"handshake timeout");
                Err(ServerError::Transport(format!("handshake timeout after {timeout:?}")))
            },
        }
    }

    async fn handshake_inner(&self, conn: &QuinnConnection) -> Result<Established, ServerError> {
        let (send, mut recv) = conn.accept_bi().await?;
        drop(send); // all server-to-client traffic uses the uni stream

        let mut buf = BytesMut::with_capacity(4096);
        let frame = match read_frame(&mut recv, &mut buf).await {
            ReadOutcome::Frame(frame) => frame,
            ReadOutcome::Closed(reason) => {
                return Err(ServerError::Transport(reason));
            },
            ReadOutcome::BadHeader(err) => {
                conn.close(CLOSE_PROTOCOL_ABUSE.into(), b"invalid frame header");
                return Err(ServerError::Protocol(err.to_string()));
            },
        };

        let hello = match Payload::from_frame(frame) {
            Ok(Payload::Hello(hello)) => hello,
            Ok(other) => {
                conn.close(CLOSE_UNAUTHENTICATED.into(), b"expected Hello");
                return Err(ServerError::Protocol(format!(
                    "first frame was {:?}, expected Hello",
                    other.opcode()
                )));
            },
            Err(err) => {
                conn.close(CLOSE_UNAUTHENTICATED.into(), b"undecodable Hello");
                return Err(err.into());
            },
        };

        if hello.version != FrameHeader::VERSION {
            conn.close(CLOSE_UNAUTHENTICATED.into(), b"unsupported version");
            return Err(ServerError::Protocol(format!(
                "unsupported client version {}",
                hello.version
            )));
        }

        let now_secs = self.env.wall_clock_ms() / 1_000;
        let user_id = match self.verifier.verify(&hello.token, now_secs) {
            Ok(user_id) => user_id,
            Err(err) => {
                conn.close(CLOSE_UNAUTHENTICATED.into(), err.to_string().as_bytes());
                return Err(err.into());
            },
        };

        let session_id = self.env.random_u64();
        let out_stream = conn.open_uni().await?;
        let (outbound, outbound_rx) = mpsc::channel(self.outbound_queue_depth);

        let edge = match self.registry.register(user_id, session_id, outbound.clone()) {
            Ok(edge) => edge,
            Err(err) => {
                // Random session id collision; the client reconnects and
                // draws a fresh one.
                conn.close(CLOSE_NORMAL.into(), b"session id collision, reconnect");
                return Err(err.into());
            },
        };

        tokio::spawn(run_writer(out_stream, outbound_rx, conn.clone()));

        let mut machine = Connection::new(self.env.now(), self.connection_config.clone());
        // Registration precedes establish, so the state check cannot fail.
        if machine.establish(session_id, self.env.now()).is_err() {
            tracing::error!(session_id, "fresh connection refused establish");
        }

        let reply = self.stamped(
            Payload::HelloReply(session::HelloReply {
                session_id,
                heartbeat_interval_ms: self.connection_config.heartbeat_interval.as_millis() as u64,
            }),
            0,
        );
        if let Some(reply) = reply {
            let _ = outbound.try_send(reply);
        }

        Ok(Established {
            user_id,
            session_id,
            edge,
            recv,
            outbound,
            machine: Arc::new(Mutex::new(machine)),
        })
    }

    /// Pump inbound frames until the peer disconnects, times out, or is
    /// closed for protocol abuse.
    async fn read_loop(&self, conn: &QuinnConnection, mut established: Established) {
        let mut buf = BytesMut::with_capacity(4096);

        loop {
            let frame = match read_frame(&mut established.recv, &mut buf).await {
                ReadOutcome::Frame(frame) => frame,
                ReadOutcome::Closed(reason) => {
                    tracing::debug!(
                        session_id = established.session_id,
                        reason = %reason,
                        "stream ended"
                    );
                    return;
                },
                ReadOutcome::BadHeader(err) => {
                    // Framing is lost; no way to resynchronize the stream.
                    tracing::warn!(
                        session_id = established.session_id,
                        error = %err,
                        "closing connection on invalid header"
                    );
                    conn.close(CLOSE_PROTOCOL_ABUSE.into(), b"invalid frame header");
                    return;
                },
            };

            match frame.header.opcode_enum() {
                Some(Opcode::Ping | Opcode::Pong | Opcode::Goodbye) => {
                    if self.handle_session_frame(conn, &established, &frame) {
                        return;
                    }
                },
                _ => {
                    if self.handle_chat_frame(conn, &established, frame) {
                        return;
                    }
                },
            }
        }
    }

    /// Liveness and shutdown frames. Returns true when the connection ends.
    fn handle_session_frame(
        &self,
        conn: &QuinnConnection,
        established: &Established,
        frame: &Frame,
    ) -> bool {
        let actions = {
            let mut machine = established.machine.lock();
            machine.handle_session_frame(frame, self.env.now())
        };

        match actions {
            Ok(actions) => {
                for action in actions {
                    match action {
                        ConnectionAction::SendFrame(frame) => {
                            let _ = established.outbound.try_send(frame);
                        },
                        ConnectionAction::Close { reason } => {
                            conn.close(CLOSE_NORMAL.into(), reason.as_bytes());
                            return true;
                        },
                    }
                }
                false
            },
            Err(err) => {
                self.reject(established, RejectPayload::protocol(
                    frame.header.request_id(),
                    err.to_string(),
                ));
                false
            },
        }
    }

    /// Decode and route one chat frame. Returns true when the accumulated
    /// decode failures close the connection.
    fn handle_chat_frame(
        &self,
        conn: &QuinnConnection,
        established: &Established,
        frame: Frame,
    ) -> bool {
        let request_id = frame.header.request_id();
        let header = frame.header;

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(err) => {
                // Payload length was trustworthy, so the stream is intact:
                // drop this one frame and report it.
                self.reject(established, RejectPayload::protocol(request_id, err.to_string()));

                let close = {
                    let mut machine = established.machine.lock();
                    machine.record_decode_failure(self.env.now())
                };
                if let Some(ConnectionAction::Close { reason }) = close {
                    tracing::warn!(
                        session_id = established.session_id,
                        reason = %reason,
                        "closing connection"
                    );
                    conn.close(CLOSE_PROTOCOL_ABUSE.into(), reason.as_bytes());
                    return true;
                }
                return false;
            },
        };

        established.machine.lock().mark_frame_ok(self.env.now());

        if let Err(err) = self.router.handle_payload(
            established.user_id,
            established.session_id,
            &header,
            payload,
        ) {
            tracing::debug!(
                session_id = established.session_id,
                error = %err,
                "frame rejected"
            );
            self.reject(established, reject_for(&err, request_id));
        }

        false
    }

    /// Queue a rejection frame on the originating session.
    fn reject(&self, established: &Established, payload: RejectPayload) {
        let request_id = payload.request_id;
        if let Some(frame) = self.stamped(Payload::Reject(payload), request_id) {
            let _ = established.outbound.try_send(frame);
        }
    }

    /// Build an outbound frame with a server timestamp.
    fn stamped(&self, payload: Payload, request_id: u32) -> Option<Frame> {
        let mut header = FrameHeader::new(payload.opcode());
        header.set_request_id(request_id);
        header.set_timestamp_ms(self.env.wall_clock_ms());

        match payload.into_frame(header) {
            Ok(frame) => Some(frame),
            Err(err) => {
                tracing::error!(error = %err, "outbound frame encoding failed");
                None
            },
        }
    }
}

/// Map a routing failure to its wire rejection.
fn reject_for(err: &RelayError, request_id: u32) -> RejectPayload {
    match err {
        RelayError::Forbidden { conversation_id, .. } => {
            RejectPayload::forbidden(request_id, *conversation_id)
        },
        RelayError::NotFound(conversation_id) => {
            RejectPayload::not_found(request_id, *conversation_id)
        },
        RelayError::Persistence(reason) => RejectPayload::persistence(request_id, reason.clone()),
        RelayError::UnexpectedFrame(_) | RelayError::DuplicateSession(_) => {
            RejectPayload::protocol(request_id, err.to_string())
        },
    }
}

/// Result of reading one frame off the inbound stream.
enum ReadOutcome {
    /// A complete, structurally valid frame.
    Frame(Frame),
    /// The stream or connection ended.
    Closed(String),
    /// The header failed validation; stream framing is unrecoverable.
    BadHeader(parley_proto::ProtocolError),
}

/// Read one length-prefixed frame: 64-byte header, then the payload the
/// header claims.
async fn read_frame(recv: &mut quinn::RecvStream, buf: &mut BytesMut) -> ReadOutcome {
    buf.clear();
    buf.resize(FrameHeader::SIZE, 0);

    if let Err(err) = recv.read_exact(&mut buf[..FrameHeader::SIZE]).await {
        return ReadOutcome::Closed(err.to_string());
    }

    // Validates magic, version, and the payload size bound; the opcode is
    // deliberately not validated here (unknown opcodes are recoverable).
    let payload_size = match FrameHeader::from_bytes(&buf[..FrameHeader::SIZE]) {
        Ok(header) => header.payload_size() as usize,
        Err(err) => return ReadOutcome::BadHeader(err),
    };

    if payload_size > 0 {
        buf.resize(FrameHeader::SIZE + payload_size, 0);
        if let Err(err) = recv.read_exact(&mut buf[FrameHeader::SIZE..]).await {
            return ReadOutcome::Closed(err.to_string());
        }
    }

    match Frame::decode(buf) {
        Ok(frame) => ReadOutcome::Frame(frame),
        Err(err) => ReadOutcome::BadHeader(err),
    }
}

/// Drain the session's outbound queue into the unidirectional stream.
///
/// All frames to one client flow through here in queue order. A write
/// failure closes the connection; the read loop then winds the session
/// down.
async fn run_writer(
    mut stream: quinn::SendStream,
    mut outbound: mpsc::Receiver<Frame>,
    conn: QuinnConnection,
) {
    let mut buf = Vec::with_capacity(4096);

    while let Some(frame) = outbound.recv().await {
        buf.clear();
        if let Err(err) = frame.encode(&mut buf) {
            tracing::error!(error = %err, "dropping unencodable outbound frame");
            continue;
        }

        if let Err(err) = stream.write_all(&buf).await {
            tracing::debug!(error = %err, "outbound stream write failed");
            conn.close(CLOSE_NORMAL.into(), b"outbound stream failed");
            return;
        }
    }
}

/// Periodic heartbeat and timeout maintenance for one connection.
async fn run_maintenance(
    machine: Arc<Mutex<Connection>>,
    outbound: mpsc::Sender<Frame>,
    conn: QuinnConnection,
    env: SystemEnv,
) {
    loop {
        env.sleep(TICK_INTERVAL).await;

        let actions = machine.lock().tick(env.now());
        for action in actions {
            match action {
                ConnectionAction::SendFrame(frame) => {
                    let _ = outbound.try_send(frame);
                },
                ConnectionAction::Close { reason } => {
                    tracing::debug!(reason = %reason, "closing idle connection");
                    conn.close(CLOSE_TIMEOUT.into(), reason.as_bytes());
                    return;
                },
            }
        }
    }
}
