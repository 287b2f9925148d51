//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness) so the
//! same state machines run under real time in production and virtual time in
//! tests.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Invariants
///
/// - `now()` never goes backwards within one execution context
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; simulation
    /// environments may substitute virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time in unix milliseconds.
    ///
    /// Used for message timestamps and credential expiry; never for
    /// timeouts, which use the monotonic clock.
    fn wall_clock_ms(&self) -> u64;

    /// Sleep for the specified duration.
    ///
    /// The only async method in the trait; used by driver code, never by
    /// protocol logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill the buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generate a random `u64` (session ids).
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
