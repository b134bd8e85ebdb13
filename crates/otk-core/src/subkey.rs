//! Subkeys, capability flags, fingerprints and binding signatures.
//!
//! A subkey is an X25519 key pair bound to an identity by an Ed25519
//! signature from the primary key. The binding carries the capability flags
//! and validity window; a subkey with [`KeyFlags::FORWARD_SECRECY`] is a
//! one-time key.
//!
//! # Invariants
//!
//! - A fingerprint commits to the algorithm, creation time and public key
//! - A binding signature commits to the primary key, the subkey, the flags
//!   and both timestamps; none of them can change without invalidating it
//! - `Subkey` owns its secret exclusively, in a heap allocation that does
//!   not move while the subkey sits in a pool; `Subkey::erase` zeroizes
//!   that allocation in place

use std::ops::BitOr;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use otk_crypto::{EncryptionPublic, EncryptionSecret, KEY_SIZE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::{env::Timestamp, error::OtkError};

/// Label used for fingerprint computation
const FINGERPRINT_LABEL: &[u8] = b"otkFingerprintV1";

/// Label used for subkey binding signatures
const BINDING_LABEL: &[u8] = b"otkSubkeyBindingV1";

/// Algorithm identifier for Ed25519 primary keys
const ALGORITHM_ED25519: u8 = 0x01;

/// Algorithm identifier for X25519 subkeys
const ALGORITHM_X25519: u8 = 0x02;

/// Capability flags carried in a binding signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFlags(u8);

impl KeyFlags {
    /// Key may certify other keys
    pub const CERTIFY: Self = Self(0x01);
    /// Key may sign data
    pub const SIGN: Self = Self(0x02);
    /// Key may encrypt communications
    pub const ENCRYPT_COMMS: Self = Self(0x04);
    /// Key may encrypt storage
    pub const ENCRYPT_STORAGE: Self = Self(0x08);
    /// Key is a one-time key, deleted after its first successful decryption
    pub const FORWARD_SECRECY: Self = Self(0x40);

    /// Flags of the durable encryption subkey.
    pub const fn durable_encryption() -> Self {
        Self(Self::ENCRYPT_COMMS.0 | Self::ENCRYPT_STORAGE.0)
    }

    /// Flags of a one-time key.
    pub const fn one_time_encryption() -> Self {
        Self(Self::ENCRYPT_COMMS.0 | Self::ENCRYPT_STORAGE.0 | Self::FORWARD_SECRECY.0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if either encryption capability is set.
    pub const fn is_encryption_capable(self) -> bool {
        self.0 & (Self::ENCRYPT_COMMS.0 | Self::ENCRYPT_STORAGE.0) != 0
    }

    /// True if the forward-secrecy flag is set.
    pub const fn is_forward_secret(self) -> bool {
        self.contains(Self::FORWARD_SECRECY)
    }
}

impl BitOr for KeyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for KeyFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (Self::CERTIFY, "CERTIFY"),
            (Self::SIGN, "SIGN"),
            (Self::ENCRYPT_COMMS, "ENCRYPT_COMMS"),
            (Self::ENCRYPT_STORAGE, "ENCRYPT_STORAGE"),
            (Self::FORWARD_SECRECY, "FORWARD_SECRECY"),
        ];
        let set: Vec<&str> =
            names.iter().filter(|(flag, _)| self.contains(*flag)).map(|(_, name)| *name).collect();
        write!(f, "KeyFlags({})", set.join(" | "))
    }
}

/// SHA-256 fingerprint identifying a primary key or subkey.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of an X25519 subkey.
    pub fn of_subkey(public: &EncryptionPublic, created_at: Timestamp) -> Self {
        Self::compute(ALGORITHM_X25519, created_at, public.as_bytes())
    }

    /// Fingerprint of an Ed25519 primary key.
    pub fn of_primary(public: &VerifyingKey, created_at: Timestamp) -> Self {
        Self::compute(ALGORITHM_ED25519, created_at, public.as_bytes())
    }

    /// SHA-256(label || algorithm || `created_at` || key)
    fn compute(algorithm: u8, created_at: Timestamp, key: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_LABEL);
        hasher.update([algorithm]);
        hasher.update(created_at.to_be_bytes());
        hasher.update(key);
        Self(hasher.finalize().into())
    }

    /// Wrap raw fingerprint bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short 64-bit key ID (last eight fingerprint bytes), for log lines.
    pub fn key_id(&self) -> u64 {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[24..]);
        u64::from_be_bytes(id)
    }

    /// Parse an uppercase or lowercase hex fingerprint.
    pub fn from_hex(hex_str: &str) -> Result<Self, OtkError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)
            .map_err(|e| OtkError::Encoding { reason: format!("fingerprint: {e}") })?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({:016X})", self.key_id())
    }
}

/// Signature by the primary key binding a subkey to the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSignature {
    flags: KeyFlags,
    created_at: Timestamp,
    expires_at: Option<Timestamp>,
    signature: Signature,
}

impl BindingSignature {
    /// Sign a binding for `subkey` with the primary key.
    ///
    /// # Errors
    ///
    /// - `Signing` if the signature backend rejects the operation
    pub fn sign(
        primary: &SigningKey,
        subkey: &EncryptionPublic,
        flags: KeyFlags,
        created_at: Timestamp,
        expires_at: Option<Timestamp>,
    ) -> Result<Self, OtkError> {
        let data =
            Self::signing_data(&primary.verifying_key(), subkey, flags, created_at, expires_at);
        let signature = primary
            .try_sign(&data)
            .map_err(|e| OtkError::Signing { reason: format!("binding signature: {e}") })?;

        Ok(Self { flags, created_at, expires_at, signature })
    }

    /// Verify this binding against the primary public key and subkey.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` if the signature does not cover exactly these
    ///   keys, flags and timestamps
    pub fn verify(
        &self,
        primary: &VerifyingKey,
        subkey: &EncryptionPublic,
    ) -> Result<(), OtkError> {
        let data =
            Self::signing_data(primary, subkey, self.flags, self.created_at, self.expires_at);
        primary.verify_strict(&data, &self.signature).map_err(|_| OtkError::InvalidSignature {
            reason: "subkey binding signature does not verify".to_string(),
        })
    }

    /// Capability flags asserted by the binding.
    pub fn flags(&self) -> KeyFlags {
        self.flags
    }

    /// Subkey creation time.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Subkey expiry time, `None` for keys that never expire.
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// True if the subkey is expired at `now` (`now >= expires_at`).
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Build the signed data.
    ///
    /// Structure:
    /// - label
    /// - primary public key (32 bytes)
    /// - subkey public key (32 bytes)
    /// - flags (1 byte)
    /// - `created_at` (8 bytes, big-endian)
    /// - expiry marker (1 byte) and `expires_at` (8 bytes, big-endian)
    fn signing_data(
        primary: &VerifyingKey,
        subkey: &EncryptionPublic,
        flags: KeyFlags,
        created_at: Timestamp,
        expires_at: Option<Timestamp>,
    ) -> Vec<u8> {
        let mut data = Vec::with_capacity(BINDING_LABEL.len() + 2 * KEY_SIZE + 18);
        data.extend_from_slice(BINDING_LABEL);
        data.extend_from_slice(primary.as_bytes());
        data.extend_from_slice(subkey.as_bytes());
        data.push(flags.bits());
        data.extend_from_slice(&created_at.to_be_bytes());
        match expires_at {
            Some(expires_at) => {
                data.push(1);
                data.extend_from_slice(&expires_at.to_be_bytes());
            },
            None => {
                data.push(0);
                data.extend_from_slice(&[0u8; 8]);
            },
        }
        data
    }
}

/// Public half of a subkey with its binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSubkey {
    fingerprint: Fingerprint,
    public: [u8; KEY_SIZE],
    binding: BindingSignature,
}

impl PublicSubkey {
    /// Pair a public key with its binding. The fingerprint is derived from
    /// the binding's creation time.
    pub fn new(public: EncryptionPublic, binding: BindingSignature) -> Self {
        let fingerprint = Fingerprint::of_subkey(&public, binding.created_at());
        Self { fingerprint, public: public.to_bytes(), binding }
    }

    /// Subkey fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// X25519 public key used to wrap session keys.
    pub fn public_key(&self) -> EncryptionPublic {
        EncryptionPublic::from(self.public)
    }

    /// Binding signature.
    pub fn binding(&self) -> &BindingSignature {
        &self.binding
    }

    /// Capability flags.
    pub fn flags(&self) -> KeyFlags {
        self.binding.flags()
    }

    /// Creation time.
    pub fn created_at(&self) -> Timestamp {
        self.binding.created_at()
    }

    /// Expiry time.
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.binding.expires_at()
    }

    /// True for one-time keys.
    pub fn is_forward_secret(&self) -> bool {
        self.flags().is_forward_secret()
    }

    /// True if the subkey may encrypt.
    pub fn is_encryption_capable(&self) -> bool {
        self.flags().is_encryption_capable()
    }

    /// True if the subkey is expired at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.binding.is_expired_at(now)
    }

    /// Encryption-capable and unexpired at `now`.
    pub fn is_usable_at(&self, now: Timestamp) -> bool {
        self.is_encryption_capable() && !self.is_expired_at(now)
    }

    /// Check the stored fingerprint and the binding signature.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` on fingerprint mismatch or bad binding
    pub fn verify(&self, primary: &VerifyingKey) -> Result<(), OtkError> {
        let public = self.public_key();
        if Fingerprint::of_subkey(&public, self.created_at()) != self.fingerprint {
            return Err(OtkError::InvalidSignature {
                reason: format!("subkey {} fingerprint mismatch", self.fingerprint),
            });
        }
        self.binding.verify(primary, &public)
    }
}

/// A subkey with its secret, owned by exactly one identity's pool.
///
/// The secret is boxed. Pool entries get shifted and copied as the map
/// rebalances, and those moves must never leave secret bytes behind in
/// freed node memory.
pub(crate) struct Subkey {
    public: PublicSubkey,
    secret: Box<EncryptionSecret>,
}

impl Subkey {
    /// Pair a public subkey with its secret.
    pub(crate) fn new(public: PublicSubkey, secret: EncryptionSecret) -> Self {
        debug_assert_eq!(public.public_key(), secret.public_key());
        Self { public, secret: Box::new(secret) }
    }

    /// Public half.
    pub fn public(&self) -> &PublicSubkey {
        &self.public
    }

    /// Subkey fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint()
    }

    /// Secret half.
    pub(crate) fn secret(&self) -> &EncryptionSecret {
        &self.secret
    }

    /// Zeroize the secret where it is stored.
    pub(crate) fn erase(&mut self) {
        Zeroize::zeroize(&mut *self.secret);
        debug_assert!(self.secret.is_erased());
    }
}

impl std::fmt::Debug for Subkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subkey")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
