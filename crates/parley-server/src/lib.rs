//! Parley chat relay.
//!
//! A presence- and delivery-aware message relay: authenticated QUIC
//! connections, private message routing, online/offline/typing presence,
//! per-conversation unread counters, read receipts, and multi-device send
//! acknowledgements.
//!
//! # Architecture
//!
//! The relay is a thin connection gateway over a set of internally
//! synchronized entities:
//!
//! - [`SessionRegistry`]: user identity → live connections (0..N,
//!   multi-device); source of truth for "is this user online".
//! - [`PresenceTracker`]: derived online/offline/typing state with
//!   latest-wins fan-out.
//! - [`UnreadCounters`]: per-(user, conversation) pending-message counts.
//! - [`Router`]: the stateless frame state machine tying them together.
//! - [`Dispatcher`]: fans one frame out to all of a user's sessions.
//!
//! Every connection task calls straight into the router through `&self`; no
//! global lock serializes unrelated users' traffic. Message durability and
//! conversation membership belong to an external store behind the
//! [`ChatStore`] trait.

mod dispatch;
mod error;
mod gateway;
mod participants;
mod presence;
mod registry;
mod router;
pub mod store;
mod system_env;
mod transport;
mod unread;

use std::sync::Arc;

pub use dispatch::Dispatcher;
use dashmap::DashMap;
pub use error::{RelayError, ServerError};
use gateway::Gateway;
pub use participants::ParticipantCache;
use parley_core::{ConnectionConfig, CredentialVerifier, Ed25519Verifier};
pub use presence::{PresenceState, PresenceTracker};
pub use registry::{ClosedSession, OutboundHandle, SessionEdge, SessionRegistry};
pub use router::Router;
use store::ChatStore;
pub use system_env::SystemEnv;
use tokio::sync::mpsc;
pub use transport::{QuinnConnection, QuinnTransport};
pub use unread::UnreadCounters;

/// Relay runtime configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to (e.g. "0.0.0.0:4433").
    pub bind_address: String,
    /// Path to a TLS certificate (PEM). Self-signed when absent.
    pub cert_path: Option<String>,
    /// Path to the TLS private key (PEM).
    pub key_path: Option<String>,
    /// Ed25519 public key of the credential issuer.
    pub issuer_public_key: [u8; 32],
    /// Per-connection lifecycle settings (handshake deadline, heartbeat,
    /// idle timeout, decode-failure budget).
    pub connection: ConnectionConfig,
    /// Sessions accepted before new connections are turned away.
    pub max_sessions: usize,
    /// Depth of each session's outbound frame queue. A session that falls
    /// this far behind is torn down rather than buffered without bound.
    pub outbound_queue_depth: usize,
}

impl RelayConfig {
    /// Configuration for a local relay with the given issuer key.
    #[must_use]
    pub fn local(issuer_public_key: [u8; 32]) -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            cert_path: None,
            key_path: None,
            issuer_public_key,
            connection: ConnectionConfig::default(),
            max_sessions: 10_000,
            outbound_queue_depth: 256,
        }
    }
}

/// The relay server: transport plus the wired entity set.
///
/// Generic over the persistence store so embeddings and tests supply their
/// own; the in-memory [`store::MemoryStore`] backs development deployments.
pub struct Relay<S: ChatStore> {
    transport: QuinnTransport,
    gateway: Arc<Gateway<S>>,
    reaper_rx: mpsc::UnboundedReceiver<u64>,
}

impl<S: ChatStore> Relay<S> {
    /// Create and bind a relay over the given store.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Config`] for bad TLS material, bind address, or
    ///   issuer key
    /// - [`ServerError::Transport`] if the endpoint cannot bind
    pub fn bind(config: RelayConfig, store: S) -> Result<Self, ServerError> {
        let verifier = Ed25519Verifier::from_public_key_bytes(&config.issuer_public_key)
            .map_err(|e| ServerError::Config(format!("issuer key: {e}")))?;

        Self::bind_with_verifier(config, store, Arc::new(verifier))
    }

    /// Create and bind a relay with a custom credential verifier.
    ///
    /// # Errors
    ///
    /// Same as [`Relay::bind`], minus issuer key validation.
    pub fn bind_with_verifier(
        config: RelayConfig,
        store: S,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Result<Self, ServerError> {
        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        let env = SystemEnv::new();
        let registry = Arc::new(SessionRegistry::new());
        let presence = Arc::new(PresenceTracker::new());
        let unread = Arc::new(UnreadCounters::new());

        let (reaper_tx, reaper_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(reaper_tx);

        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            presence,
            unread,
            store,
            dispatcher,
            env,
        ));

        let gateway = Arc::new(Gateway {
            router,
            registry,
            verifier,
            env,
            connection_config: config.connection.clone(),
            connections: Arc::new(DashMap::new()),
            outbound_queue_depth: config.outbound_queue_depth,
            max_sessions: config.max_sessions,
        });

        Ok(Self { transport, gateway, reaper_rx })
    }

    /// Local address the relay is bound to.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Transport`] if the endpoint cannot report it
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the relay: accept connections until the endpoint closes.
    ///
    /// Spawns one task per connection plus a reaper that tears down
    /// sessions whose outbound queue died (slow or broken peers reported by
    /// the dispatcher). A failed connection attempt is logged and skipped;
    /// only endpoint closure ends the loop.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self { transport, gateway, mut reaper_rx } = self;

        tracing::info!(addr = %transport.local_addr()?, "relay listening");

        let reaper_gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            while let Some(session_id) = reaper_rx.recv().await {
                tracing::debug!(session_id, "reaping dead session");
                if let Some((_, conn)) = reaper_gateway.connections.remove(&session_id) {
                    conn.close(gateway::CLOSE_NORMAL.into(), b"outbound queue failed");
                }
                reaper_gateway.router.on_session_closed(session_id);
            }
        });

        loop {
            match transport.accept().await {
                Ok(Some(conn)) => {
                    let gateway = Arc::clone(&gateway);
                    tokio::spawn(async move {
                        gateway.handle_connection(conn).await;
                    });
                },
                Ok(None) => {
                    tracing::info!("endpoint closed, relay shutting down");
                    return Ok(());
                },
                Err(err) => {
                    tracing::warn!(error = %err, "connection attempt failed");
                },
            }
        }
    }
}
