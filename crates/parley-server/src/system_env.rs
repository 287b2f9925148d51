//! Production environment: system time and OS cryptographic RNG.
//!
//! `SystemEnv` backs the relay in production with `std::time::Instant`,
//! `tokio::time::sleep`, the system wall clock, and getrandom. Tests drive
//! the same state machines with deterministic substitutes.

use std::time::Duration;

use parley_core::env::Environment;

/// Production [`Environment`].
///
/// # Panics
///
/// Panics if the OS RNG fails. A relay without functioning cryptographic
/// randomness cannot mint unguessable session ids; RNG failure indicates an
/// OS-level fault and continuing would be worse than crashing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn wall_clock_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after the Unix epoch")
            .as_millis() as u64
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable for a relay");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = env.now();

        assert!(t2 > t1);
    }

    #[test]
    fn wall_clock_is_after_2023() {
        let env = SystemEnv::new();
        assert!(env.wall_clock_ms() > 1_672_531_200_000);
    }

    #[test]
    fn random_u64_values_differ() {
        let env = SystemEnv::new();
        assert_ne!(env.random_u64(), env.random_u64());
    }
}
