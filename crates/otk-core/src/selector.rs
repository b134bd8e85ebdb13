//! Encryption key selection.
//!
//! Senders prefer the oldest unexpired one-time key and fall back to the
//! durable key when forward secrecy is off or the pool is exhausted. Fallback
//! is not an error.
//!
//! Selection is read-only. Nothing is marked in flight, so the same one-time
//! key may be chosen for several messages before the first is decrypted; only
//! the first of those will be readable.

use crate::{
    env::Timestamp,
    error::OtkError,
    identity::{Certificate, Identity},
    policy::ForwardSecrecyPolicy,
    subkey::{Fingerprint, PublicSubkey, Subkey},
};

/// Anything a sender can encrypt to.
pub trait Recipient {
    /// Primary fingerprint, for logging.
    fn fingerprint(&self) -> Fingerprint;

    /// Subkey to wrap the session key to.
    ///
    /// # Errors
    ///
    /// - `NoEncryptionKey` if the recipient offers no usable subkey
    fn encryption_key(
        &self,
        policy: &ForwardSecrecyPolicy,
        now: Timestamp,
    ) -> Result<PublicSubkey, OtkError>;
}

impl Recipient for Identity {
    fn fingerprint(&self) -> Fingerprint {
        Identity::fingerprint(self)
    }

    fn encryption_key(
        &self,
        policy: &ForwardSecrecyPolicy,
        now: Timestamp,
    ) -> Result<PublicSubkey, OtkError> {
        Ok(select_encryption_key(self, policy, now))
    }
}

impl Recipient for Certificate {
    fn fingerprint(&self) -> Fingerprint {
        Certificate::fingerprint(self)
    }

    fn encryption_key(
        &self,
        policy: &ForwardSecrecyPolicy,
        now: Timestamp,
    ) -> Result<PublicSubkey, OtkError> {
        self.select_encryption_key(policy, now)
    }
}

/// Choose the subkey a sender should encrypt to for `identity`.
///
/// Returns the earliest-inserted one-time key unexpired at `now` when the
/// policy is enabled, else the durable key. The pool is not modified.
pub fn select_encryption_key(
    identity: &Identity,
    policy: &ForwardSecrecyPolicy,
    now: Timestamp,
) -> PublicSubkey {
    let state = identity.state();
    let candidates = state.pool.iter().map(Subkey::public);
    select_from(candidates, identity.durable_key(), policy, now).clone()
}

/// Pure selection over `candidates` in FIFO order.
///
/// `candidates` must be in insertion order; non-forward-secret entries are
/// skipped, so the durable key may appear among them.
pub fn select_from<'a>(
    candidates: impl IntoIterator<Item = &'a PublicSubkey>,
    durable: &'a PublicSubkey,
    policy: &ForwardSecrecyPolicy,
    now: Timestamp,
) -> &'a PublicSubkey {
    if !policy.is_enabled() {
        tracing::debug!(
            subkey = %durable.fingerprint(),
            "Forward secrecy disabled, selecting durable key"
        );
        return durable;
    }

    let selected = candidates
        .into_iter()
        .find(|subkey| subkey.is_forward_secret() && subkey.is_usable_at(now));

    match selected {
        Some(subkey) => {
            tracing::debug!(subkey = %subkey.fingerprint(), "Selected one-time key");
            subkey
        },
        None => {
            tracing::debug!(
                subkey = %durable.fingerprint(),
                "No unexpired one-time key, falling back to durable key"
            );
            durable
        },
    }
}
