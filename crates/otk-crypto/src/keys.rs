//! X25519 encryption key pairs for subkeys
//!
//! Secrets are built from caller-provided random bytes and zeroized on drop.
//! `EncryptionSecret` is intentionally not `Clone`: a one-time key secret must
//! exist in exactly one place so that erasing it actually removes it.

use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

/// Size of X25519 public and secret keys (32 bytes)
pub const KEY_SIZE: usize = 32;

/// X25519 public key of an encryption subkey.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncryptionPublic {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionPublic {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Copy of the raw key bytes.
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.bytes
    }
}

impl From<[u8; KEY_SIZE]> for EncryptionPublic {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }
}

impl std::fmt::Debug for EncryptionPublic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EncryptionPublic({:02x}{:02x}{:02x}{:02x}..)",
            self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]
        )
    }
}

/// X25519 secret key of an encryption subkey.
///
/// # Security
///
/// - Zeroized on drop and on explicit [`Zeroize::zeroize`]
/// - Not `Clone`, never printed
pub struct EncryptionSecret {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionSecret {
    /// Build a secret from 32 random bytes.
    ///
    /// Caller MUST provide cryptographically secure random bytes in
    /// production. An all-zero input indicates a broken RNG and is rejected.
    pub fn from_random(mut random: [u8; KEY_SIZE]) -> Result<Self, CryptoError> {
        if random.iter().all(|&b| b == 0) {
            return Err(CryptoError::DegenerateKey);
        }

        let secret = StaticSecret::from(random);
        random.zeroize();

        Ok(Self { bytes: secret.to_bytes() })
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> EncryptionPublic {
        let secret = StaticSecret::from(self.bytes);
        EncryptionPublic { bytes: PublicKey::from(&secret).to_bytes() }
    }

    /// Perform X25519 with a peer public key.
    ///
    /// Returns `None` if the result is non-contributory (peer sent a
    /// low-order point), which callers must treat as a failure.
    pub(crate) fn diffie_hellman(
        &self,
        peer: &EncryptionPublic,
    ) -> Option<Zeroizing<[u8; KEY_SIZE]>> {
        let secret = StaticSecret::from(self.bytes);
        let shared = secret.diffie_hellman(&PublicKey::from(peer.bytes));
        if !shared.was_contributory() {
            return None;
        }
        Some(Zeroizing::new(shared.to_bytes()))
    }

    /// True once the secret has been erased.
    pub fn is_erased(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }
}

impl Zeroize for EncryptionSecret {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for EncryptionSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for EncryptionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionSecret([REDACTED])")
    }
}
