//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` is the production implementation of the Environment trait using
//! the real wall clock and cryptographic RNG.
//!
//! # Capabilities
//!
//! - Real system time (`std::time::SystemTime`) for creation and expiry stamps
//! - OS cryptographic RNG (getrandom). Truly random, not reproducible

use crate::env::{Environment, Timestamp};

/// Production environment using system time and cryptographic RNG.
///
/// # Security
///
/// The RNG uses getrandom which provides OS-level cryptographic randomness
/// (e.g., /dev/urandom on Linux, `BCryptGenRandom` on Windows). Suitable for
/// generating key seeds, session keys and nonces.
///
/// # Panics
///
/// Panics if the OS RNG fails. Generating key material without functioning
/// cryptographic randomness would silently produce weak keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn wall_clock_secs(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)")
            .as_secs()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - cannot generate key material");
    }
}
