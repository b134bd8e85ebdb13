//! Identities and their public certificates.
//!
//! An [`Identity`] is the private side: an Ed25519 primary key, a user ID
//! certified by that key, a durable encryption subkey, and the pool of
//! one-time keys. A [`Certificate`] is what correspondents see: the public
//! halves with every binding signature, exported in pool order.
//!
//! # Locking
//!
//! The primary secret and the pool share one mutex. Provisioning, selection
//! and consumption all serialize on it, so a one-time key can never be
//! handed to two decryptions and a binding is never signed by a primary key
//! that is concurrently being locked.
//!
//! # Passphrase protection
//!
//! [`Identity::lock`] seals the primary secret with a passphrase and drops
//! the plaintext key. While locked, nothing that needs a signature works
//! (provisioning fails with `Signing`); decryption still works because
//! subkey secrets are not passphrase-protected.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::sync::{Mutex, MutexGuard};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use otk_crypto::{
    CryptoError, EncryptionSecret, ProtectedSecret, SessionKey, protect_secret, unprotect_secret,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    binder,
    consumer::{self, KeyWrapPacket},
    env::{Environment, Timestamp},
    error::OtkError,
    policy::ForwardSecrecyPolicy,
    pool::{PoolState, SubkeyPool},
    selector,
    subkey::{BindingSignature, Fingerprint, KeyFlags, PublicSubkey, Subkey},
};

/// Label used for user-ID certification signatures
const CERTIFICATION_LABEL: &[u8] = b"otkUserIdCertificationV1";

/// Name, comment and email identifying the owner of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId {
    name: String,
    comment: String,
    email: String,
}

impl UserId {
    /// Build a user ID. Empty `comment` or `email` are omitted when
    /// rendered.
    pub fn new(
        name: impl Into<String>,
        comment: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), comment: comment.into(), email: email.into() }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form comment.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Email address.
    pub fn email(&self) -> &str {
        &self.email
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if !self.comment.is_empty() {
            write!(f, " ({})", self.comment)?;
        }
        if !self.email.is_empty() {
            write!(f, " <{}>", self.email)?;
        }
        Ok(())
    }
}

/// Primary signing key, either usable or sealed under a passphrase.
pub(crate) enum PrimarySecret {
    Unlocked(SigningKey),
    Locked(ProtectedSecret),
}

/// Everything guarded by the identity mutex.
pub(crate) struct IdentityState {
    pub(crate) primary: PrimarySecret,
    pub(crate) pool: SubkeyPool,
}

impl IdentityState {
    /// The primary signing key.
    ///
    /// # Errors
    ///
    /// - `Signing` if the primary key is locked
    pub(crate) fn signing_key(&self) -> Result<&SigningKey, OtkError> {
        match &self.primary {
            PrimarySecret::Unlocked(key) => Ok(key),
            PrimarySecret::Locked(_) => {
                Err(OtkError::Signing { reason: "primary key is locked".to_string() })
            },
        }
    }

    /// Erase every one-time key expired at `now`, logging each one under
    /// `identity`. Returns the number erased.
    pub(crate) fn purge_expired(&mut self, identity: Fingerprint, now: Timestamp) -> usize {
        let purged = self.pool.purge_expired(now);
        for fingerprint in &purged {
            tracing::info!(
                identity = %identity,
                subkey = %fingerprint,
                "Purged expired one-time key"
            );
        }
        purged.len()
    }
}

/// A private identity: primary key, user ID, durable subkey and one-time
/// key pool.
///
/// `Identity` is `Send + Sync`; share it across threads with `Arc`.
pub struct Identity {
    fingerprint: Fingerprint,
    created_at: Timestamp,
    primary_public: VerifyingKey,
    user_id: UserId,
    certification: Signature,
    durable: PublicSubkey,
    state: Mutex<IdentityState>,
}

impl Identity {
    /// Generate a new identity with a durable encryption subkey and no
    /// one-time keys.
    ///
    /// # Errors
    ///
    /// - `KeyGen` if the environment yields a degenerate subkey seed
    /// - `Signing` if the certification or binding signature fails
    pub fn generate<E: Environment>(user_id: UserId, env: &E) -> Result<Self, OtkError> {
        let created_at = env.wall_clock_secs();

        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(env.random_array());
        let primary = SigningKey::from_bytes(&seed);
        let primary_public = primary.verifying_key();
        let fingerprint = Fingerprint::of_primary(&primary_public, created_at);

        let certification = primary
            .try_sign(&certification_data(&primary_public, created_at, &user_id))
            .map_err(|e| OtkError::Signing { reason: format!("user ID certification: {e}") })?;

        let durable_secret = EncryptionSecret::from_random(env.random_array())
            .map_err(|e| OtkError::KeyGen { reason: format!("durable subkey: {e}") })?;
        let durable_public = durable_secret.public_key();
        let binding = BindingSignature::sign(
            &primary,
            &durable_public,
            KeyFlags::durable_encryption(),
            created_at,
            None,
        )?;
        let durable = PublicSubkey::new(durable_public, binding);

        let mut pool = SubkeyPool::new();
        let Some(_) = pool.append(Subkey::new(durable.clone(), durable_secret)) else {
            unreachable!("empty pool cannot contain a duplicate fingerprint");
        };

        tracing::info!(
            fingerprint = %fingerprint,
            user_id = %user_id,
            durable_key = %durable.fingerprint(),
            "Generated identity"
        );

        Ok(Self {
            fingerprint,
            created_at,
            primary_public,
            user_id,
            certification,
            durable,
            state: Mutex::new(IdentityState { primary: PrimarySecret::Unlocked(primary), pool }),
        })
    }

    /// Lock the shared state.
    pub(crate) fn state(&self) -> MutexGuard<'_, IdentityState> {
        self.state.lock().expect("Identity mutex poisoned")
    }

    /// Seal the primary secret under `passphrase` and drop the plaintext
    /// key. Locking an already locked identity does nothing.
    pub fn lock<E: Environment>(&self, passphrase: &[u8], env: &E) {
        let mut state = self.state();
        let PrimarySecret::Unlocked(primary) = &state.primary else {
            return;
        };

        let protected =
            protect_secret(primary.as_bytes(), passphrase, env.random_array(), env.random_array());
        state.primary = PrimarySecret::Locked(protected);

        tracing::debug!(fingerprint = %self.fingerprint, "Locked primary key");
    }

    /// Recover the primary secret with `passphrase`. Unlocking an unlocked
    /// identity succeeds without checking the passphrase.
    ///
    /// # Errors
    ///
    /// - `WrongPassphrase` if the passphrase does not open the sealed key
    pub fn unlock(&self, passphrase: &[u8]) -> Result<(), OtkError> {
        let mut state = self.state();
        let PrimarySecret::Locked(protected) = &state.primary else {
            return Ok(());
        };

        let seed = unprotect_secret(protected, passphrase).map_err(|e| match e {
            CryptoError::DecryptionFailed { .. } => OtkError::WrongPassphrase,
            other => OtkError::Crypto(other),
        })?;
        let primary = SigningKey::from_bytes(&seed);
        if primary.verifying_key() != self.primary_public {
            return Err(OtkError::Crypto(CryptoError::DecryptionFailed {
                reason: "unsealed key does not match primary public key".to_string(),
            }));
        }
        state.primary = PrimarySecret::Unlocked(primary);

        tracing::debug!(fingerprint = %self.fingerprint, "Unlocked primary key");
        Ok(())
    }

    /// True if the primary secret is sealed.
    pub fn is_locked(&self) -> bool {
        matches!(self.state().primary, PrimarySecret::Locked(_))
    }

    /// Generate and bind one forward-secret subkey. See
    /// [`binder::add_forward_secret`].
    pub fn add_forward_secret<E: Environment>(
        &self,
        policy: &ForwardSecrecyPolicy,
        env: &E,
    ) -> Result<PublicSubkey, OtkError> {
        binder::add_forward_secret(self, policy, env)
    }

    /// Purge expired one-time keys and top the pool up to the policy size.
    /// See [`binder::replenish`].
    pub fn replenish<E: Environment>(
        &self,
        policy: &ForwardSecrecyPolicy,
        env: &E,
    ) -> Result<usize, OtkError> {
        binder::replenish(self, policy, env)
    }

    /// Key a sender should encrypt to. See [`selector::select_encryption_key`].
    pub fn select_encryption_key(
        &self,
        policy: &ForwardSecrecyPolicy,
        now: Timestamp,
    ) -> PublicSubkey {
        selector::select_encryption_key(self, policy, now)
    }

    /// Unwrap a session key, consuming the one-time key that opened it. See
    /// [`consumer::consume_and_decrypt`].
    pub fn consume_and_decrypt(
        &self,
        packets: &[KeyWrapPacket],
        now: Timestamp,
    ) -> Result<SessionKey, OtkError> {
        consumer::consume_and_decrypt(self, packets, now)
    }

    /// Erase every one-time key expired at `now`. Returns the number erased.
    pub fn purge_expired(&self, now: Timestamp) -> usize {
        self.state().purge_expired(self.fingerprint, now)
    }

    /// Whether one-time keys are available at `now`.
    pub fn pool_state(&self, now: Timestamp) -> PoolState {
        PoolState::from_available(self.state().pool.live_otk_count(now))
    }

    /// Public certificate with every subkey in pool order.
    pub fn certificate(&self) -> Certificate {
        let subkeys = self.state().pool.iter().map(|subkey| subkey.public().clone()).collect();
        Certificate {
            primary_public: self.primary_public,
            created_at: self.created_at,
            user_id: self.user_id.clone(),
            certification: self.certification,
            subkeys,
        }
    }

    /// Primary key fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Primary public key.
    pub fn primary_public(&self) -> &VerifyingKey {
        &self.primary_public
    }

    /// Identity creation time.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Certified user ID.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Durable encryption subkey.
    pub fn durable_key(&self) -> &PublicSubkey {
        &self.durable
    }

    /// Number of subkeys, durable key included.
    pub fn subkey_count(&self) -> usize {
        self.state().pool.len()
    }

    /// Number of one-time keys, expired or not.
    pub fn otk_count(&self) -> usize {
        self.state().pool.otk_count()
    }

    /// Subkey fingerprints in pool order.
    pub fn subkey_fingerprints(&self) -> Vec<Fingerprint> {
        self.state().pool.iter().map(Subkey::fingerprint).collect()
    }

    /// True if the pool holds a subkey with `fingerprint`.
    pub fn contains_subkey(&self, fingerprint: &Fingerprint) -> bool {
        self.state().pool.contains(fingerprint)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint)
            .field("user_id", &self.user_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Public half of an identity, as published to correspondents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    primary_public: VerifyingKey,
    created_at: Timestamp,
    user_id: UserId,
    certification: Signature,
    subkeys: Vec<PublicSubkey>,
}

impl Certificate {
    /// Primary key fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_primary(&self.primary_public, self.created_at)
    }

    /// Primary public key.
    pub fn primary_public(&self) -> &VerifyingKey {
        &self.primary_public
    }

    /// Certified user ID.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Subkeys in the owner's pool order.
    pub fn subkeys(&self) -> &[PublicSubkey] {
        &self.subkeys
    }

    /// Number of one-time keys published in this certificate.
    pub fn otk_count(&self) -> usize {
        self.subkeys.iter().filter(|subkey| subkey.is_forward_secret()).count()
    }

    /// Check the user-ID certification and every subkey binding.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` naming the first signature that fails
    pub fn verify(&self) -> Result<(), OtkError> {
        let data = certification_data(&self.primary_public, self.created_at, &self.user_id);
        self.primary_public.verify_strict(&data, &self.certification).map_err(|_| {
            OtkError::InvalidSignature {
                reason: format!("user ID certification for {}", self.user_id),
            }
        })?;

        for subkey in &self.subkeys {
            subkey.verify(&self.primary_public)?;
        }
        Ok(())
    }

    /// Key a sender should encrypt to. See [`selector::select_from`].
    ///
    /// # Errors
    ///
    /// - `NoEncryptionKey` if the certificate carries no usable durable
    ///   encryption subkey
    pub fn select_encryption_key(
        &self,
        policy: &ForwardSecrecyPolicy,
        now: Timestamp,
    ) -> Result<PublicSubkey, OtkError> {
        let durable = self
            .subkeys
            .iter()
            .find(|subkey| !subkey.is_forward_secret() && subkey.is_usable_at(now))
            .ok_or(OtkError::NoEncryptionKey)?;

        Ok(selector::select_from(self.subkeys.iter(), durable, policy, now).clone())
    }

    /// Encode as CBOR.
    ///
    /// # Errors
    ///
    /// - `Encoding` if serialization fails
    pub fn to_cbor(&self) -> Result<Vec<u8>, OtkError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| OtkError::Encoding { reason: format!("certificate: {e}") })?;
        Ok(bytes)
    }

    /// Decode from CBOR. Does not verify signatures; call [`Self::verify`].
    ///
    /// # Errors
    ///
    /// - `Encoding` if the bytes are not a valid certificate
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, OtkError> {
        ciborium::from_reader(bytes)
            .map_err(|e| OtkError::Encoding { reason: format!("certificate: {e}") })
    }
}

/// Build the signed data for a user-ID certification.
///
/// Structure:
/// - label
/// - primary public key (32 bytes)
/// - `created_at` (8 bytes, big-endian)
/// - length-prefixed name, comment and email (u32 big-endian each)
fn certification_data(
    primary: &VerifyingKey,
    created_at: Timestamp,
    user_id: &UserId,
) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(CERTIFICATION_LABEL);
    data.extend_from_slice(primary.as_bytes());
    data.extend_from_slice(&created_at.to_be_bytes());
    for field in [&user_id.name, &user_id.comment, &user_id.email] {
        data.extend_from_slice(&(field.len() as u32).to_be_bytes());
        data.extend_from_slice(field.as_bytes());
    }
    data
}
