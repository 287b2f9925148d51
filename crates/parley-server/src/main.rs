//! Parley relay binary.
//!
//! # Usage
//!
//! ```bash
//! # Development: self-signed certificate, in-memory store
//! parley-server --bind 127.0.0.1:4433 --issuer-key <hex ed25519 public key>
//!
//! # Production TLS
//! parley-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem \
//!     --issuer-key <hex ed25519 public key>
//! ```
//!
//! The issuer key is the Ed25519 public key of the external identity system
//! that mints connection credentials; the relay verifies tokens against it
//! and never issues its own.

use std::time::Duration;

use clap::Parser;
use parley_core::ConnectionConfig;
use parley_server::{Relay, RelayConfig, store::MemoryStore};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley chat relay
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "Presence- and delivery-aware chat relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Hex-encoded Ed25519 public key of the credential issuer
    #[arg(long)]
    issuer_key: String,

    /// Heartbeat interval in seconds; idle timeout is twice this
    #[arg(long, default_value = "20")]
    heartbeat_secs: u64,

    /// Maximum concurrent sessions
    #[arg(long, default_value = "10000")]
    max_sessions: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_issuer_key(hex_key: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(hex_key).map_err(|e| format!("issuer key is not hex: {e}"))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| format!("issuer key must be 32 bytes, got {}", bytes.len()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("parley relay starting");

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("no TLS certificate provided - using self-signed certificate");
        tracing::warn!("this is NOT suitable for production use");
    }

    let config = RelayConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        issuer_public_key: parse_issuer_key(&args.issuer_key)?,
        connection: ConnectionConfig::with_heartbeat_interval(Duration::from_secs(
            args.heartbeat_secs,
        )),
        max_sessions: args.max_sessions,
        outbound_queue_depth: 256,
    };

    let relay = Relay::bind(config, MemoryStore::new())?;

    tracing::info!("relay listening on {}", relay.local_addr()?);

    relay.run().await?;

    Ok(())
}
