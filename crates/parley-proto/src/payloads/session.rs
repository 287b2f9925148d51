//! Session management payload types.
//!
//! The handshake is a single round trip: the client's first frame must be a
//! [`Hello`] carrying an externally issued credential; the relay verifies it
//! and answers with [`HelloReply`] or closes the connection.

use serde::{Deserialize, Serialize};

/// Handshake request.
///
/// Must be the first frame on a new connection. Any other frame before the
/// handshake completes closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version the client speaks. Must be 1.
    pub version: u8,

    /// Externally issued credential: `user_id (8B BE) ∥ expires_at_secs
    /// (8B BE) ∥ Ed25519 signature (64B)`. The relay verifies signature and
    /// expiry; it never issues credentials.
    pub token: Vec<u8>,
}

/// Handshake completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Server-assigned session identifier for this connection.
    pub session_id: u64,

    /// Interval at which the server sends heartbeat pings. Connections idle
    /// for twice this interval are closed.
    pub heartbeat_interval_ms: u64,
}

/// Graceful disconnect, sent by either side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Reason for disconnecting.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trip() {
        let original = Hello { version: 1, token: vec![0xAB; 80] };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&original, &mut encoded).unwrap();
        let decoded: Hello = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn hello_reply_round_trip() {
        let original = HelloReply { session_id: 0xDEAD_BEEF, heartbeat_interval_ms: 20_000 };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&original, &mut encoded).unwrap();
        let decoded: HelloReply = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert_eq!(original, decoded);
    }
}
