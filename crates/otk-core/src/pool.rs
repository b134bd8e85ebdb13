//! Ordered pool of an identity's encryption subkeys.
//!
//! Holds the durable subkey and every one-time key, keyed by a monotonically
//! increasing insertion sequence. Iteration is insertion order, which is the
//! order the selector uses to pick the oldest one-time key.
//!
//! # Invariants
//!
//! - Sequence numbers are never reused, so FIFO order is total even when two
//!   keys share a creation timestamp
//! - A fingerprint appears at most once
//! - Only forward-secret subkeys are ever removed; the durable key stays for
//!   the lifetime of the identity
//! - Removal zeroizes the secret before the entry is gone
//!
//! The pool is not synchronized. [`crate::Identity`] owns it behind the same
//! mutex as the primary secret.

use std::collections::{BTreeMap, HashMap};

use crate::{
    env::Timestamp,
    subkey::{Fingerprint, Subkey},
};

/// Whether an identity has one-time keys available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// At least one unexpired one-time key is available
    Provisioned {
        /// Number of unexpired one-time keys
        available: usize,
    },
    /// No unexpired one-time key; senders fall back to the durable key
    Exhausted,
}

impl PoolState {
    /// Classify an available-key count.
    pub fn from_available(available: usize) -> Self {
        if available == 0 { Self::Exhausted } else { Self::Provisioned { available } }
    }

    /// True if the pool is exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

/// Insertion-ordered subkey storage.
#[derive(Debug, Default)]
pub(crate) struct SubkeyPool {
    /// Subkeys by insertion sequence
    entries: BTreeMap<u64, Subkey>,
    /// Fingerprint to sequence index
    index: HashMap<Fingerprint, u64>,
    /// Next sequence number to hand out
    next_sequence: u64,
}

impl SubkeyPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a subkey at the end of the pool.
    ///
    /// Returns the assigned sequence number, or `None` if a subkey with the
    /// same fingerprint is already present (the new subkey is dropped and
    /// its secret zeroized).
    pub(crate) fn append(&mut self, subkey: Subkey) -> Option<u64> {
        let fingerprint = subkey.fingerprint();
        if self.index.contains_key(&fingerprint) {
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.index.insert(fingerprint, sequence);
        self.entries.insert(sequence, subkey);

        debug_assert_eq!(self.entries.len(), self.index.len());
        Some(sequence)
    }

    pub(crate) fn get(&self, fingerprint: &Fingerprint) -> Option<&Subkey> {
        self.index.get(fingerprint).and_then(|sequence| self.entries.get(sequence))
    }

    pub(crate) fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains_key(fingerprint)
    }

    /// Subkeys in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Subkey> {
        self.entries.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of one-time keys, expired or not.
    pub(crate) fn otk_count(&self) -> usize {
        self.iter().filter(|subkey| subkey.public().is_forward_secret()).count()
    }

    /// Number of one-time keys unexpired at `now`.
    pub(crate) fn live_otk_count(&self, now: Timestamp) -> usize {
        self.iter()
            .filter(|subkey| {
                subkey.public().is_forward_secret() && !subkey.public().is_expired_at(now)
            })
            .count()
    }

    /// Remove a one-time key and zeroize its secret.
    ///
    /// Returns false if the fingerprint is absent or names a subkey without
    /// the forward-secrecy flag.
    pub(crate) fn remove_and_erase(&mut self, fingerprint: &Fingerprint) -> bool {
        self.take_erased(fingerprint).is_some()
    }

    /// Detach a one-time key with its secret already zeroized in the
    /// allocation it occupied while pooled.
    fn take_erased(&mut self, fingerprint: &Fingerprint) -> Option<Subkey> {
        let &sequence = self.index.get(fingerprint)?;
        let stored = self.entries.get_mut(&sequence)?;
        if !stored.public().is_forward_secret() {
            return None;
        }

        stored.erase();
        self.index.remove(fingerprint);
        let Some(subkey) = self.entries.remove(&sequence) else {
            unreachable!("index and entries out of sync for sequence {sequence}");
        };

        debug_assert_eq!(self.entries.len(), self.index.len());
        Some(subkey)
    }

    /// Remove and zeroize every one-time key expired at `now`.
    ///
    /// Returns the fingerprints of the purged keys in insertion order.
    pub(crate) fn purge_expired(&mut self, now: Timestamp) -> Vec<Fingerprint> {
        let expired: Vec<Fingerprint> = self
            .iter()
            .filter(|subkey| {
                subkey.public().is_forward_secret() && subkey.public().is_expired_at(now)
            })
            .map(Subkey::fingerprint)
            .collect();

        for fingerprint in &expired {
            let removed = self.remove_and_erase(fingerprint);
            debug_assert!(removed);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use otk_crypto::EncryptionSecret;

    use super::*;
    use crate::subkey::{BindingSignature, KeyFlags, PublicSubkey};

    fn subkey(fill: u8, flags: KeyFlags, created_at: u64, expires_at: Option<u64>) -> Subkey {
        let primary = SigningKey::from_bytes(&[0x11; 32]);
        let secret = EncryptionSecret::from_random([fill; 32]).unwrap();
        let public = secret.public_key();
        let binding =
            BindingSignature::sign(&primary, &public, flags, created_at, expires_at).unwrap();
        Subkey::new(PublicSubkey::new(public, binding), secret)
    }

    fn otk(fill: u8, expires_at: u64) -> Subkey {
        subkey(fill, KeyFlags::one_time_encryption(), 100, Some(expires_at))
    }

    fn durable() -> Subkey {
        subkey(0xDD, KeyFlags::durable_encryption(), 100, None)
    }

    #[test]
    fn append_preserves_insertion_order() {
        let mut pool = SubkeyPool::new();
        let a = otk(1, 1_000);
        let b = otk(2, 1_000);
        let c = otk(3, 1_000);
        let expected = [a.fingerprint(), b.fingerprint(), c.fingerprint()];

        assert_eq!(pool.append(a), Some(0));
        assert_eq!(pool.append(b), Some(1));
        assert_eq!(pool.append(c), Some(2));

        let order: Vec<_> = pool.iter().map(Subkey::fingerprint).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn duplicate_fingerprint_rejected() {
        let mut pool = SubkeyPool::new();
        assert!(pool.append(otk(1, 1_000)).is_some());
        assert!(pool.append(otk(1, 1_000)).is_none());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn remove_from_middle_keeps_order() {
        let mut pool = SubkeyPool::new();
        let a = otk(1, 1_000);
        let b = otk(2, 1_000);
        let c = otk(3, 1_000);
        let (fa, fb, fc) = (a.fingerprint(), b.fingerprint(), c.fingerprint());
        pool.append(a);
        pool.append(b);
        pool.append(c);

        assert!(pool.remove_and_erase(&fb));
        assert!(!pool.contains(&fb));

        let order: Vec<_> = pool.iter().map(Subkey::fingerprint).collect();
        assert_eq!(order, vec![fa, fc]);
    }

    #[test]
    fn sequence_numbers_not_reused() {
        let mut pool = SubkeyPool::new();
        let a = otk(1, 1_000);
        let fa = a.fingerprint();
        pool.append(a);
        pool.remove_and_erase(&fa);

        assert_eq!(pool.append(otk(2, 1_000)), Some(1));
    }

    #[test]
    fn durable_key_cannot_be_removed() {
        let mut pool = SubkeyPool::new();
        let key = durable();
        let fingerprint = key.fingerprint();
        pool.append(key);

        assert!(!pool.remove_and_erase(&fingerprint));
        assert!(pool.contains(&fingerprint));
    }

    #[test]
    fn remove_unknown_fingerprint_is_noop() {
        let mut pool = SubkeyPool::new();
        pool.append(otk(1, 1_000));

        assert!(!pool.remove_and_erase(&Fingerprint::from_bytes([0; 32])));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn live_count_excludes_expired_and_durable() {
        let mut pool = SubkeyPool::new();
        pool.append(durable());
        pool.append(otk(1, 500));
        pool.append(otk(2, 1_000));

        assert_eq!(pool.otk_count(), 2);
        assert_eq!(pool.live_otk_count(499), 2);
        assert_eq!(pool.live_otk_count(500), 1);
        assert_eq!(pool.live_otk_count(1_000), 0);
    }

    #[test]
    fn purge_expired_keeps_durable_and_live() {
        let mut pool = SubkeyPool::new();
        let key = durable();
        let durable_fp = key.fingerprint();
        pool.append(key);
        let old = otk(1, 500);
        let old_fp = old.fingerprint();
        pool.append(old);
        pool.append(otk(2, 1_000));

        let purged = pool.purge_expired(600);

        assert_eq!(purged, vec![old_fp]);
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&durable_fp));
        assert!(pool.get(&old_fp).is_none());
    }

    #[test]
    fn secret_is_wiped_where_it_was_stored() {
        let mut pool = SubkeyPool::new();
        let keys: Vec<Subkey> = (1..=12).map(|fill| otk(fill, 1_000)).collect();
        let fingerprints: Vec<_> = keys.iter().map(Subkey::fingerprint).collect();
        for key in keys {
            pool.append(key);
        }
        let target = fingerprints[11];
        let storage = std::ptr::from_ref(pool.get(&target).unwrap().secret());

        // Earlier removals shift later entries within the map's nodes
        for fingerprint in &fingerprints[..6] {
            assert!(pool.remove_and_erase(fingerprint));
        }
        pool.append(otk(0x40, 1_000));
        assert!(std::ptr::eq(storage, pool.get(&target).unwrap().secret()));

        let taken = pool.take_erased(&target).unwrap();
        assert!(std::ptr::eq(storage, taken.secret()));
        assert!(taken.secret().is_erased());
        assert!(!pool.contains(&target));
    }

    #[test]
    fn pool_state_classification() {
        assert_eq!(PoolState::from_available(0), PoolState::Exhausted);
        assert_eq!(PoolState::from_available(2), PoolState::Provisioned { available: 2 });
        assert!(PoolState::Exhausted.is_exhausted());
    }
}
