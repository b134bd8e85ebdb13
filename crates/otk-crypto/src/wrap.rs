//! Session key wrapping to an X25519 subkey
//!
//! All functions are pure - random bytes must be provided by the caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    keys::{EncryptionPublic, EncryptionSecret, KEY_SIZE},
    session_key::{SESSION_KEY_SIZE, SessionKey},
};

/// Size of the `XChaCha20` nonce used for wrapping (24 bytes)
pub const WRAP_NONCE_SIZE: usize = 24;

/// Label used for key-encryption key derivation
const WRAP_LABEL: &[u8] = b"otkSessionKeyWrapV1";

/// A session key encrypted to one recipient subkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedSessionKey {
    /// Sender's ephemeral X25519 public key
    pub ephemeral_public: [u8; KEY_SIZE],
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; WRAP_NONCE_SIZE],
    /// Encrypted session key including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

/// Wrap `session_key` to `recipient`.
///
/// `context` is bound as associated data and into the key derivation; the
/// message layer passes the recipient subkey fingerprint so a wrap cannot be
/// replayed against another subkey.
///
/// # Security
///
/// - `ephemeral_random` MUST be fresh cryptographically secure randomness;
///   reusing it across wraps links the messages
/// - The ephemeral secret and derived key are zeroized before returning
///
/// # Errors
///
/// - `DegenerateKey`: the ephemeral seed is all zero or `recipient` is a
///   low-order point
pub fn wrap_session_key(
    session_key: &SessionKey,
    recipient: &EncryptionPublic,
    context: &[u8],
    ephemeral_random: [u8; KEY_SIZE],
    nonce: [u8; WRAP_NONCE_SIZE],
) -> Result<WrappedSessionKey, CryptoError> {
    let ephemeral = EncryptionSecret::from_random(ephemeral_random)?;
    let ephemeral_public = ephemeral.public_key();

    let shared = ephemeral.diffie_hellman(recipient).ok_or(CryptoError::DegenerateKey)?;
    let kek = derive_kek(&shared, &ephemeral_public, recipient, context);

    let cipher = XChaCha20Poly1305::new((&*kek).into());
    let payload = Payload { msg: session_key.as_bytes(), aad: context };
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), payload) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    Ok(WrappedSessionKey { ephemeral_public: ephemeral_public.to_bytes(), nonce, ciphertext })
}

/// Recover a session key with the recipient's subkey secret.
///
/// # Errors
///
/// - `UnwrapFailed`: wrong subkey, wrong context, tampered wrap, erased
///   secret, or a low-order ephemeral point
pub fn unwrap_session_key(
    wrapped: &WrappedSessionKey,
    secret: &EncryptionSecret,
    context: &[u8],
) -> Result<SessionKey, CryptoError> {
    if secret.is_erased() {
        return Err(CryptoError::UnwrapFailed);
    }

    let ephemeral_public = EncryptionPublic::from(wrapped.ephemeral_public);
    let shared = secret.diffie_hellman(&ephemeral_public).ok_or(CryptoError::UnwrapFailed)?;
    let kek = derive_kek(&shared, &ephemeral_public, &secret.public_key(), context);

    let cipher = XChaCha20Poly1305::new((&*kek).into());
    let payload = Payload { msg: wrapped.ciphertext.as_slice(), aad: context };
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(&wrapped.nonce), payload)
            .map_err(|_| CryptoError::UnwrapFailed)?,
    );

    let bytes: [u8; SESSION_KEY_SIZE] =
        plaintext.as_slice().try_into().map_err(|_| CryptoError::UnwrapFailed)?;
    Ok(SessionKey::from_bytes(bytes))
}

/// Derive the key-encryption key.
///
/// info = label || ephemeral public || recipient public || context
fn derive_kek(
    shared: &[u8; KEY_SIZE],
    ephemeral_public: &EncryptionPublic,
    recipient: &EncryptionPublic,
    context: &[u8],
) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(None, shared);

    let mut info = Vec::with_capacity(WRAP_LABEL.len() + 2 * KEY_SIZE + context.len());
    info.extend_from_slice(WRAP_LABEL);
    info.extend_from_slice(ephemeral_public.as_bytes());
    info.extend_from_slice(recipient.as_bytes());
    info.extend_from_slice(context);

    let mut kek = Zeroizing::new([0u8; 32]);
    let Ok(()) = hkdf.expand(&info, &mut kek[..]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    kek
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(fill: u8) -> EncryptionSecret {
        let mut bytes = [fill; KEY_SIZE];
        bytes[31] = 0x42;
        EncryptionSecret::from_random(bytes).unwrap()
    }

    fn session_key() -> SessionKey {
        let mut bytes = [0u8; SESSION_KEY_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = i as u8;
        }
        SessionKey::from_bytes(bytes)
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let recipient = secret(1);
        let key = session_key();

        let wrapped =
            wrap_session_key(&key, &recipient.public_key(), b"fp", [0xAA; 32], [0x01; 24]).unwrap();
        let recovered = unwrap_session_key(&wrapped, &recipient, b"fp").unwrap();

        assert_eq!(recovered.as_bytes(), key.as_bytes());
    }

    #[test]
    fn wrapped_key_has_tag() {
        let recipient = secret(1);
        let wrapped = wrap_session_key(
            &session_key(),
            &recipient.public_key(),
            b"",
            [0xAA; 32],
            [0x01; 24],
        )
        .unwrap();

        assert_eq!(wrapped.ciphertext.len(), SESSION_KEY_SIZE + 16);
    }

    #[test]
    fn wrong_secret_fails_unwrap() {
        let recipient = secret(1);
        let other = secret(2);

        let wrapped = wrap_session_key(
            &session_key(),
            &recipient.public_key(),
            b"fp",
            [0xAA; 32],
            [0x01; 24],
        )
        .unwrap();

        let result = unwrap_session_key(&wrapped, &other, b"fp");
        assert!(matches!(result, Err(CryptoError::UnwrapFailed)));
    }

    #[test]
    fn wrong_context_fails_unwrap() {
        let recipient = secret(1);
        let wrapped = wrap_session_key(
            &session_key(),
            &recipient.public_key(),
            b"fingerprint-a",
            [0xAA; 32],
            [0x01; 24],
        )
        .unwrap();

        let result = unwrap_session_key(&wrapped, &recipient, b"fingerprint-b");
        assert!(matches!(result, Err(CryptoError::UnwrapFailed)));
    }

    #[test]
    fn tampered_wrap_fails_unwrap() {
        let recipient = secret(1);
        let mut wrapped = wrap_session_key(
            &session_key(),
            &recipient.public_key(),
            b"fp",
            [0xAA; 32],
            [0x01; 24],
        )
        .unwrap();
        wrapped.ciphertext[0] ^= 0xFF;

        let result = unwrap_session_key(&wrapped, &recipient, b"fp");
        assert!(matches!(result, Err(CryptoError::UnwrapFailed)));
    }

    #[test]
    fn low_order_recipient_is_rejected() {
        let result = wrap_session_key(
            &session_key(),
            &EncryptionPublic::from([0u8; KEY_SIZE]),
            b"fp",
            [0xAA; 32],
            [0x01; 24],
        );
        assert!(matches!(result, Err(CryptoError::DegenerateKey)));
    }

    #[test]
    fn low_order_ephemeral_fails_unwrap() {
        let recipient = secret(1);
        let mut wrapped = wrap_session_key(
            &session_key(),
            &recipient.public_key(),
            b"fp",
            [0xAA; 32],
            [0x01; 24],
        )
        .unwrap();
        wrapped.ephemeral_public = [0u8; KEY_SIZE];

        let result = unwrap_session_key(&wrapped, &recipient, b"fp");
        assert!(matches!(result, Err(CryptoError::UnwrapFailed)));
    }

    #[test]
    fn fresh_ephemeral_produces_distinct_wraps() {
        let recipient = secret(1);
        let key = session_key();

        let a = wrap_session_key(&key, &recipient.public_key(), b"", [0xAA; 32], [0x01; 24])
            .unwrap();
        let b = wrap_session_key(&key, &recipient.public_key(), b"", [0xBB; 32], [0x01; 24])
            .unwrap();

        assert_ne!(a.ephemeral_public, b.ephemeral_public);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
