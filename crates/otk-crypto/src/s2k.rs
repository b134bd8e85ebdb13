//! Passphrase protection for long-term secrets
//!
//! Iterated and salted SHA-256 string-to-key, with the count encoded in one
//! byte the way OpenPGP S2K specifiers do. The derived key seals the secret
//! with `XChaCha20-Poly1305`, so a wrong passphrase is detected by the tag
//! instead of silently producing garbage key material.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Size of the S2K salt (8 bytes)
pub const S2K_SALT_SIZE: usize = 8;

/// Default coded iteration count (4 MiB of hashed input).
pub const DEFAULT_CODED_COUNT: u8 = 0xC0;

/// Size of a protected secret (32 bytes)
const SECRET_SIZE: usize = 32;

/// S2K parameters stored alongside a protected secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S2kParams {
    /// Random salt
    pub salt: [u8; S2K_SALT_SIZE],
    /// One-byte coded count of hashed octets
    pub coded_count: u8,
}

impl S2kParams {
    /// Parameters with the default iteration count.
    pub fn new(salt: [u8; S2K_SALT_SIZE]) -> Self {
        Self { salt, coded_count: DEFAULT_CODED_COUNT }
    }

    /// Number of octets fed to the hash.
    ///
    /// `(16 + (c & 15)) << ((c >> 4) + 6)`
    pub fn decoded_count(&self) -> usize {
        let c = usize::from(self.coded_count);
        (16 + (c & 15)) << ((c >> 4) + 6)
    }

    /// Derive a 32-byte key from `passphrase`.
    pub fn derive_key(&self, passphrase: &[u8]) -> Zeroizing<[u8; 32]> {
        let mut data = Zeroizing::new(Vec::with_capacity(S2K_SALT_SIZE + passphrase.len()));
        data.extend_from_slice(&self.salt);
        data.extend_from_slice(passphrase);

        let count = self.decoded_count().max(data.len());
        let mut hasher = Sha256::new();
        let mut remaining = count;
        while remaining > 0 {
            let take = remaining.min(data.len());
            hasher.update(&data[..take]);
            remaining -= take;
        }

        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&hasher.finalize());
        key
    }
}

/// A 32-byte secret sealed under a passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedSecret {
    /// S2K parameters
    pub s2k: S2kParams,
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; 24],
    /// Sealed secret including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

/// Seal `secret` under `passphrase`.
///
/// Caller MUST provide fresh random `salt` and `nonce` in production.
pub fn protect_secret(
    secret: &[u8; SECRET_SIZE],
    passphrase: &[u8],
    salt: [u8; S2K_SALT_SIZE],
    nonce: [u8; 24],
) -> ProtectedSecret {
    let s2k = S2kParams::new(salt);
    let key = s2k.derive_key(passphrase);

    let cipher = XChaCha20Poly1305::new((&*key).into());
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), secret.as_slice()) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    ProtectedSecret { s2k, nonce, ciphertext }
}

/// Recover a secret sealed with [`protect_secret`].
///
/// # Errors
///
/// - `DecryptionFailed`: wrong passphrase or corrupted data
pub fn unprotect_secret(
    protected: &ProtectedSecret,
    passphrase: &[u8],
) -> Result<Zeroizing<[u8; SECRET_SIZE]>, CryptoError> {
    let key = protected.s2k.derive_key(passphrase);

    let cipher = XChaCha20Poly1305::new((&*key).into());
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(&protected.nonce), protected.ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed {
                reason: "wrong passphrase or corrupted secret".to_string(),
            })?,
    );

    if plaintext.len() != SECRET_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: SECRET_SIZE,
            actual: plaintext.len(),
        });
    }

    let mut secret = Zeroizing::new([0u8; SECRET_SIZE]);
    secret.copy_from_slice(&plaintext);
    Ok(secret)
}
