//! Quinn-based QUIC transport.
//!
//! Terminates QUIC with TLS 1.3 via `rustls`. ALPN is pinned to "parley" so
//! a peer speaking anything else fails the handshake before a single frame
//! is read. Certificates come from PEM files in production; a self-signed
//! certificate is generated for development when none are configured.

use std::{net::SocketAddr, sync::Arc};

use parley_proto::ALPN_PROTOCOL;
use quinn::{Endpoint, RecvStream, SendStream, ServerConfig};

use crate::error::ServerError;

/// QUIC endpoint accepting relay connections.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Create and bind a new QUIC transport.
    ///
    /// With `cert_path` and `key_path` both set, the PEM files are loaded
    /// for TLS; otherwise a self-signed certificate is generated and a
    /// warning is logged. Self-signed certificates are for local development
    /// only.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Config`] for an unparseable address or TLS material
    /// - [`ServerError::Transport`] if the endpoint cannot bind
    pub fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            _ => generate_self_signed_config()?,
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!(%addr, "QUIC transport bound");

        Ok(Self { endpoint })
    }

    /// Accept the next QUIC connection.
    ///
    /// Returns `Ok(None)` once the endpoint is closed; a failed connection
    /// handshake is an error for that one connection, not the endpoint.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Transport`] if the connection handshake fails
    pub async fn accept(&self) -> Result<Option<QuinnConnection>, ServerError> {
        let Some(incoming) = self.endpoint.accept().await else {
            return Ok(None);
        };

        let connection = incoming
            .await
            .map_err(|e| ServerError::Transport(format!("connection failed: {e}")))?;

        Ok(Some(QuinnConnection { connection }))
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }
}

/// One accepted QUIC connection.
///
/// Clones are cheap and share the underlying connection, so the writer
/// task, the read loop, and the reaper can all hold one.
#[derive(Clone)]
pub struct QuinnConnection {
    connection: quinn::Connection,
}

impl QuinnConnection {
    /// Accept the client's bidirectional stream (its inbound frame path).
    ///
    /// # Errors
    ///
    /// - [`ServerError::Transport`] if the connection is closed first
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        self.connection
            .accept_bi()
            .await
            .map_err(|e| ServerError::Transport(format!("accept_bi failed: {e}")))
    }

    /// Open the unidirectional stream carrying all server-to-client frames.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Transport`] if the connection is closed first
    pub async fn open_uni(&self) -> Result<SendStream, ServerError> {
        self.connection
            .open_uni()
            .await
            .map_err(|e| ServerError::Transport(format!("open_uni failed: {e}")))
    }

    /// Remote peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close the connection with an error code and reason.
    pub fn close(&self, error_code: quinn::VarInt, reason: &[u8]) {
        self.connection.close(error_code, reason);
    }
}

/// Load TLS configuration from certificate and key files.
fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    use std::fs;

    let cert_pem = fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;

    let key_pem = fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))?,
    ));

    Ok(server_config)
}

/// Generate a self-signed certificate for development.
fn generate_self_signed_config() -> Result<ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_der = cert.cert.der().clone();
    let key_der = cert.key_pair.serialize_der();

    let cert_chain = vec![cert_der];
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(key_der);

    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))?,
    ));

    tracing::warn!("using self-signed certificate - not for production use");

    Ok(server_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_binds_with_self_signed() {
        let transport = QuinnTransport::bind("127.0.0.1:0", None, None).unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn transport_rejects_invalid_address() {
        let result = QuinnTransport::bind("not:an:address", None, None);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn transport_rejects_missing_cert_files() {
        let result =
            QuinnTransport::bind("127.0.0.1:0", Some("/nonexistent.pem"), Some("/nonexistent.key"));
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
