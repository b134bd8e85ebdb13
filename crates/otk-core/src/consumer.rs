//! Session key recovery and one-time key consumption.
//!
//! A message carries one [`KeyWrapPacket`] per recipient. The recipient
//! finds the packet its pool can open, recovers the session key, and if the
//! opening subkey was a one-time key, removes and zeroizes it before
//! returning. After that no copy of the message, anywhere, can be unwrapped
//! again.
//!
//! # Atomicity
//!
//! Matching, unwrapping, removal and erasure happen under a single
//! acquisition of the identity mutex. Two racing decryptions of messages
//! wrapped to the same one-time key cannot both succeed; the loser finds the
//! key gone and gets `NoMatchingKey`.

use otk_crypto::{
    KEY_SIZE, SessionKey, WRAP_NONCE_SIZE, WrappedSessionKey, unwrap_session_key,
    wrap_session_key,
};
use serde::{Deserialize, Serialize};

use crate::{
    env::{Environment, Timestamp},
    error::OtkError,
    identity::Identity,
    pool::SubkeyPool,
    subkey::{Fingerprint, PublicSubkey},
};

/// A session key wrapped to one recipient subkey.
///
/// `recipient` names the subkey the sender selected. A packet without a
/// recipient is anonymous and is tried against every subkey in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWrapPacket {
    /// Fingerprint of the subkey this packet is wrapped to, if disclosed
    pub recipient: Option<Fingerprint>,
    /// Sender's ephemeral X25519 public key
    pub ephemeral_public: [u8; KEY_SIZE],
    /// Wrap nonce
    pub nonce: [u8; WRAP_NONCE_SIZE],
    /// Wrapped session key including authentication tag
    pub ciphertext: Vec<u8>,
}

impl KeyWrapPacket {
    /// Wrap `session_key` to `subkey`, naming it as the recipient.
    ///
    /// The subkey fingerprint is bound into the wrap, so the packet only
    /// opens with that exact subkey.
    ///
    /// # Errors
    ///
    /// - `Crypto` if the recipient public key is degenerate
    pub fn wrap<E: Environment>(
        session_key: &SessionKey,
        subkey: &PublicSubkey,
        env: &E,
    ) -> Result<Self, OtkError> {
        let fingerprint = subkey.fingerprint();
        let wrapped = wrap_session_key(
            session_key,
            &subkey.public_key(),
            fingerprint.as_bytes(),
            env.random_array(),
            env.random_array(),
        )?;

        Ok(Self {
            recipient: Some(fingerprint),
            ephemeral_public: wrapped.ephemeral_public,
            nonce: wrapped.nonce,
            ciphertext: wrapped.ciphertext,
        })
    }

    /// Drop the recipient fingerprint.
    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.recipient = None;
        self
    }

    fn to_wrapped(&self) -> WrappedSessionKey {
        WrappedSessionKey {
            ephemeral_public: self.ephemeral_public,
            nonce: self.nonce,
            ciphertext: self.ciphertext.clone(),
        }
    }
}

/// Recover a session key from `packets` and consume the one-time key that
/// opened it.
///
/// Packets are tried in order. A named packet is tried only against the
/// subkey it names; an anonymous packet against every subkey in pool order.
/// One-time keys expired at `now` are skipped as if absent.
///
/// On success with a one-time key, that key is removed from the pool and
/// its secret zeroized before this returns. On success with the durable key
/// the pool is unchanged.
///
/// # Errors
///
/// - `NoMatchingKey` if no unexpired subkey opens any packet; the pool is
///   unchanged
pub fn consume_and_decrypt(
    identity: &Identity,
    packets: &[KeyWrapPacket],
    now: Timestamp,
) -> Result<SessionKey, OtkError> {
    let mut state = identity.state();

    for packet in packets {
        let Some((fingerprint, session_key)) = try_unwrap(&state.pool, packet, now) else {
            continue;
        };

        if state.pool.remove_and_erase(&fingerprint) {
            tracing::info!(
                identity = %identity.fingerprint(),
                subkey = %fingerprint,
                remaining = state.pool.live_otk_count(now),
                "Consumed one-time key"
            );
        } else {
            tracing::debug!(
                identity = %identity.fingerprint(),
                subkey = %fingerprint,
                "Decrypted with durable key"
            );
        }
        return Ok(session_key);
    }

    tracing::debug!(
        identity = %identity.fingerprint(),
        packets = packets.len(),
        "No subkey opens any key-wrapping packet"
    );
    Err(OtkError::NoMatchingKey)
}

/// Find the first pool subkey that opens `packet`.
fn try_unwrap(
    pool: &SubkeyPool,
    packet: &KeyWrapPacket,
    now: Timestamp,
) -> Option<(Fingerprint, SessionKey)> {
    let wrapped = packet.to_wrapped();

    let candidates: Vec<_> = match &packet.recipient {
        Some(fingerprint) => pool.get(fingerprint).into_iter().collect(),
        None => pool.iter().collect(),
    };

    for subkey in candidates {
        let public = subkey.public();
        if !public.is_encryption_capable() {
            continue;
        }
        if public.is_expired_at(now) {
            tracing::warn!(
                subkey = %public.fingerprint(),
                expires_at = public.expires_at(),
                now,
                "Skipping expired subkey"
            );
            continue;
        }

        let fingerprint = public.fingerprint();
        if let Ok(session_key) =
            unwrap_session_key(&wrapped, subkey.secret(), fingerprint.as_bytes())
        {
            return Some((fingerprint, session_key));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::{identity::UserId, policy::ForwardSecrecyPolicy};

    #[derive(Clone)]
    struct TestEnv {
        rng: std::sync::Arc<Mutex<ChaCha20Rng>>,
    }

    impl TestEnv {
        fn new(seed: u64) -> Self {
            Self { rng: std::sync::Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
        }
    }

    impl Environment for TestEnv {
        fn wall_clock_secs(&self) -> Timestamp {
            1_000
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().unwrap().fill_bytes(buffer);
        }
    }

    fn provisioned(env: &TestEnv, pool_size: u32) -> Identity {
        let user_id = UserId::new("Bob", "", "bob@example.com");
        let identity = Identity::generate(user_id, env).unwrap();
        let policy = ForwardSecrecyPolicy::enabled(pool_size, Duration::from_secs(100));
        identity.replenish(&policy, env).unwrap();
        identity
    }

    fn session_key(env: &TestEnv) -> SessionKey {
        SessionKey::from_bytes(env.random_array())
    }

    #[test]
    fn otk_is_consumed_on_success() {
        let env = TestEnv::new(1);
        let bob = provisioned(&env, 2);
        let otk = bob.certificate().subkeys()[1].clone();
        let key = session_key(&env);
        let packet = KeyWrapPacket::wrap(&key, &otk, &env).unwrap();

        let recovered = bob.consume_and_decrypt(&[packet], 1_000).unwrap();

        assert_eq!(recovered.as_bytes(), key.as_bytes());
        assert!(!bob.contains_subkey(&otk.fingerprint()));
        assert_eq!(bob.otk_count(), 1);
    }

    #[test]
    fn second_decrypt_with_consumed_key_fails() {
        let env = TestEnv::new(2);
        let bob = provisioned(&env, 1);
        let otk = bob.certificate().subkeys()[1].clone();
        let packet = KeyWrapPacket::wrap(&session_key(&env), &otk, &env).unwrap();

        assert!(bob.consume_and_decrypt(std::slice::from_ref(&packet), 1_000).is_ok());
        assert!(matches!(bob.consume_and_decrypt(&[packet], 1_000), Err(OtkError::NoMatchingKey)));
    }

    #[test]
    fn durable_key_is_not_consumed() {
        let env = TestEnv::new(3);
        let bob = provisioned(&env, 1);
        let durable = bob.durable_key().clone();
        let packet = KeyWrapPacket::wrap(&session_key(&env), &durable, &env).unwrap();

        assert!(bob.consume_and_decrypt(std::slice::from_ref(&packet), 1_000).is_ok());
        assert!(bob.consume_and_decrypt(&[packet], 1_000).is_ok());
        assert_eq!(bob.subkey_count(), 2);
    }

    #[test]
    fn expired_otk_does_not_decrypt() {
        let env = TestEnv::new(4);
        let bob = provisioned(&env, 1);
        let otk = bob.certificate().subkeys()[1].clone();
        let packet = KeyWrapPacket::wrap(&session_key(&env), &otk, &env).unwrap();

        let expired_at = otk.expires_at().unwrap();
        let result = bob.consume_and_decrypt(&[packet], expired_at);
        assert!(matches!(result, Err(OtkError::NoMatchingKey)));
        assert!(bob.contains_subkey(&otk.fingerprint()));
    }

    #[test]
    fn anonymous_packet_is_tried_against_pool() {
        let env = TestEnv::new(5);
        let bob = provisioned(&env, 3);
        let otk = bob.certificate().subkeys()[3].clone();
        let key = session_key(&env);
        let packet = KeyWrapPacket::wrap(&key, &otk, &env).unwrap().anonymous();

        let recovered = bob.consume_and_decrypt(&[packet], 1_000).unwrap();

        assert_eq!(recovered.as_bytes(), key.as_bytes());
        assert!(!bob.contains_subkey(&otk.fingerprint()));
        assert_eq!(bob.otk_count(), 2);
    }

    #[test]
    fn foreign_packet_leaves_pool_unchanged() {
        let env = TestEnv::new(6);
        let bob = provisioned(&env, 2);
        let carol = provisioned(&TestEnv::new(7), 1);
        let packet = KeyWrapPacket::wrap(&session_key(&env), carol.durable_key(), &env)
            .unwrap()
            .anonymous();

        assert!(matches!(bob.consume_and_decrypt(&[packet], 1_000), Err(OtkError::NoMatchingKey)));
        assert_eq!(bob.subkey_count(), 3);
    }

    #[test]
    fn later_packet_matches_after_foreign_one() {
        let env = TestEnv::new(8);
        let bob = provisioned(&env, 1);
        let carol = provisioned(&TestEnv::new(9), 1);
        let key = session_key(&env);
        let packets = [
            KeyWrapPacket::wrap(&key, carol.durable_key(), &env).unwrap(),
            KeyWrapPacket::wrap(&key, bob.durable_key(), &env).unwrap(),
        ];

        let recovered = bob.consume_and_decrypt(&packets, 1_000).unwrap();
        assert_eq!(recovered.as_bytes(), key.as_bytes());
    }

    #[test]
    fn empty_packet_list_has_no_match() {
        let env = TestEnv::new(10);
        let bob = provisioned(&env, 1);
        assert!(matches!(bob.consume_and_decrypt(&[], 1_000), Err(OtkError::NoMatchingKey)));
    }
}
