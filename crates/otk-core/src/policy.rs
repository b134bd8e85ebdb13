//! Forward-secrecy policy.
//!
//! An immutable value passed explicitly to every provisioning and selection
//! call. Embedding applications load it from their own configuration; the
//! serialized form is
//!
//! ```text
//! { enabled: bool, pool_size: u32, lifetime_secs: u64 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{env::Timestamp, error::OtkError};

/// Default number of one-time keys to keep provisioned.
pub const DEFAULT_POOL_SIZE: u32 = 1;

/// Default one-time key lifetime (one week).
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(604_800);

/// Whether forward secrecy is active, how many one-time keys to provision,
/// and how long each one lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardSecrecyPolicy {
    enabled: bool,
    pool_size: u32,
    #[serde(rename = "lifetime_secs", with = "duration_secs")]
    lifetime: Duration,
}

impl Default for ForwardSecrecyPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ForwardSecrecyPolicy {
    /// Forward secrecy on, with `pool_size` one-time keys of `lifetime`.
    pub fn enabled(pool_size: u32, lifetime: Duration) -> Self {
        Self { enabled: true, pool_size, lifetime }
    }

    /// Forward secrecy off. Senders always use the durable key.
    pub fn disabled() -> Self {
        Self { enabled: false, pool_size: DEFAULT_POOL_SIZE, lifetime: DEFAULT_LIFETIME }
    }

    /// Whether one-time keys are provisioned and preferred.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configured pool size, regardless of `enabled`.
    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    /// Lifetime of each one-time key.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Number of one-time keys to provision: the pool size when enabled,
    /// zero otherwise.
    pub fn num_forward_secrets(&self) -> u32 {
        if self.enabled { self.pool_size } else { 0 }
    }

    /// Expiry time for a one-time key created at `created_at`.
    pub fn expiry_from(&self, created_at: Timestamp) -> Timestamp {
        created_at.saturating_add(self.lifetime.as_secs())
    }

    /// Check that an enabled policy can produce usable keys.
    ///
    /// # Errors
    ///
    /// - `InvalidPolicy` if enabled with a lifetime shorter than one second,
    ///   which would create keys that are expired at birth
    pub fn validate(&self) -> Result<(), OtkError> {
        if self.enabled && self.lifetime.as_secs() == 0 {
            return Err(OtkError::InvalidPolicy {
                reason: "one-time key lifetime must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}

/// Serialize a `Duration` as whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
