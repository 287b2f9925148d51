//! Parley protocol core.
//!
//! Pure protocol logic shared by the relay and by test harnesses: the
//! per-connection lifecycle state machine, the environment abstraction that
//! keeps state machines deterministic under test, and credential
//! verification for the handshake.
//!
//! Nothing in this crate performs I/O. Time and randomness always arrive
//! through the [`env::Environment`] trait or as explicit parameters.

pub mod auth;
pub mod connection;
pub mod env;
pub mod error;

pub use auth::{AuthError, CredentialVerifier, Ed25519Verifier};
pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState};
pub use env::Environment;
pub use error::ConnectionError;
