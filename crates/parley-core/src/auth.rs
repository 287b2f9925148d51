//! Credential verification for the connection handshake.
//!
//! Credentials are issued by an external identity system; the relay only
//! verifies them. A token binds a user id and an expiry to an Ed25519
//! signature from the issuer:
//!
//! ```text
//! [user_id: 8 bytes BE] [expires_at_secs: 8 bytes BE] [signature: 64 bytes]
//! ```
//!
//! The signature covers the first 16 bytes. Verification checks expiry
//! before the signature so expired tokens fail fast.

use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;

/// Total token length: 16 claim bytes plus a 64-byte signature.
pub const TOKEN_LEN: usize = 80;

/// Length of the signed claims prefix.
const CLAIMS_LEN: usize = 16;

/// Credential verification failures.
///
/// Every variant maps to the `Unauthenticated` failure class: the handshake
/// is rejected and the connection closed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Token is not the expected shape.
    #[error("malformed credential: expected {TOKEN_LEN} bytes, got {0}")]
    Malformed(usize),

    /// Token expiry is in the past.
    #[error("credential expired at {expired_at_secs}")]
    Expired {
        /// Unix seconds at which the token expired
        expired_at_secs: u64,
    },

    /// Signature does not verify against the issuer key.
    #[error("credential signature verification failed")]
    BadSignature,

    /// Issuer public key bytes are not a valid Ed25519 key.
    #[error("invalid issuer public key")]
    BadIssuerKey,
}

/// Verifies externally issued credentials presented during the handshake.
///
/// Trait-based so tests and embeddings can substitute their own scheme; the
/// relay never issues credentials under any implementation.
pub trait CredentialVerifier: Send + Sync + 'static {
    /// Verify a presented token against the current wall clock.
    ///
    /// Returns the authenticated user id.
    ///
    /// # Errors
    ///
    /// - [`AuthError`] describing why the credential was rejected
    fn verify(&self, token: &[u8], now_unix_secs: u64) -> Result<u64, AuthError>;
}

/// Ed25519 token verifier bound to one issuer public key.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    issuer: VerifyingKey,
}

impl Ed25519Verifier {
    /// Create a verifier for the given issuer key.
    #[must_use]
    pub fn new(issuer: VerifyingKey) -> Self {
        Self { issuer }
    }

    /// Create a verifier from raw public key bytes.
    ///
    /// # Errors
    ///
    /// - [`AuthError::BadIssuerKey`] if the bytes are not a valid Ed25519
    ///   public key
    pub fn from_public_key_bytes(bytes: &[u8; 32]) -> Result<Self, AuthError> {
        let issuer = VerifyingKey::from_bytes(bytes).map_err(|_| AuthError::BadIssuerKey)?;
        Ok(Self { issuer })
    }
}

impl CredentialVerifier for Ed25519Verifier {
    fn verify(&self, token: &[u8], now_unix_secs: u64) -> Result<u64, AuthError> {
        if token.len() != TOKEN_LEN {
            return Err(AuthError::Malformed(token.len()));
        }

        let claims = &token[..CLAIMS_LEN];

        // Split is infallible after the length check
        let mut user_id_bytes = [0u8; 8];
        user_id_bytes.copy_from_slice(&claims[..8]);
        let mut expires_bytes = [0u8; 8];
        expires_bytes.copy_from_slice(&claims[8..]);

        let user_id = u64::from_be_bytes(user_id_bytes);
        let expires_at_secs = u64::from_be_bytes(expires_bytes);

        if expires_at_secs < now_unix_secs {
            return Err(AuthError::Expired { expired_at_secs: expires_at_secs });
        }

        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(&token[CLAIMS_LEN..]);
        let signature = Signature::from_bytes(&sig_bytes);

        self.issuer
            .verify_strict(claims, &signature)
            .map_err(|_| AuthError::BadSignature)?;

        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;

    fn issuer() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn mint(key: &SigningKey, user_id: u64, expires_at_secs: u64) -> Vec<u8> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(&user_id.to_be_bytes());
        token.extend_from_slice(&expires_at_secs.to_be_bytes());
        let signature = key.sign(&token);
        token.extend_from_slice(&signature.to_bytes());
        token
    }

    #[test]
    fn valid_token_yields_user_id() {
        let key = issuer();
        let verifier = Ed25519Verifier::new(key.verifying_key());

        let token = mint(&key, 42, 2_000_000_000);
        assert_eq!(verifier.verify(&token, 1_000_000_000), Ok(42));
    }

    #[test]
    fn expired_token_rejected() {
        let key = issuer();
        let verifier = Ed25519Verifier::new(key.verifying_key());

        let token = mint(&key, 42, 500);
        assert_eq!(
            verifier.verify(&token, 1_000),
            Err(AuthError::Expired { expired_at_secs: 500 })
        );
    }

    #[test]
    fn wrong_issuer_rejected() {
        let key = issuer();
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let verifier = Ed25519Verifier::new(other.verifying_key());

        let token = mint(&key, 42, 2_000_000_000);
        assert_eq!(verifier.verify(&token, 1_000), Err(AuthError::BadSignature));
    }

    #[test]
    fn tampered_user_id_rejected() {
        let key = issuer();
        let verifier = Ed25519Verifier::new(key.verifying_key());

        let mut token = mint(&key, 42, 2_000_000_000);
        token[7] = 0xFF; // claim a different user
        assert_eq!(verifier.verify(&token, 1_000), Err(AuthError::BadSignature));
    }

    #[test]
    fn short_token_rejected() {
        let key = issuer();
        let verifier = Ed25519Verifier::new(key.verifying_key());

        assert_eq!(verifier.verify(&[0u8; 10], 1_000), Err(AuthError::Malformed(10)));
        assert_eq!(verifier.verify(&[], 1_000), Err(AuthError::Malformed(0)));
    }
}
