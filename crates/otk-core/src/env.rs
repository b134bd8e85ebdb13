//! Environment abstraction for deterministic testing.
//!
//! Decouples key lifecycle logic from system resources (wall clock,
//! randomness). Tests drive expiry with a controllable clock and reproduce
//! key material with a seeded RNG; production uses [`crate::SystemEnv`].

/// Seconds since the Unix epoch.
///
/// Subkey creation and expiry times are wall-clock values because they are
/// signed into binding signatures and must mean the same thing to every
/// correspondent.
pub type Timestamp = u64;

/// Abstract environment providing wall-clock time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time in seconds since the Unix epoch.
    ///
    /// Unlike a monotonic clock this may jump; expiry checks compare against
    /// whatever this returns at the moment of the check.
    fn wall_clock_secs(&self) -> Timestamp;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random fixed-size array.
    ///
    /// Convenience for key seeds and nonces.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}
