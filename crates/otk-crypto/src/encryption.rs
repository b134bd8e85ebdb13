//! Message body encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure - random bytes must be provided by the caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{error::CryptoError, session_key::SessionKey};

/// Size of the `XChaCha20` body nonce (24 bytes)
pub const BODY_NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// Associated data binding ciphertexts to this body format
const BODY_AAD: &[u8] = b"otkBodyV1";

/// An encrypted message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBody {
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; BODY_NONCE_SIZE],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

impl SealedBody {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(POLY1305_TAG_SIZE)
    }
}

/// Seal a message body under a session key.
///
/// # Security
///
/// - Each session key seals exactly one body, so a random nonce is never
///   reused under the same key
/// - Caller MUST provide cryptographically secure random bytes in production
pub fn seal_body(
    plaintext: &[u8],
    session_key: &SessionKey,
    nonce: [u8; BODY_NONCE_SIZE],
) -> SealedBody {
    let cipher = XChaCha20Poly1305::new(session_key.as_bytes().into());
    let payload = Payload { msg: plaintext, aad: BODY_AAD };

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), payload) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    SealedBody { nonce, ciphertext }
}

/// Open a sealed message body.
///
/// # Errors
///
/// - `DecryptionFailed`: If authentication tag or key is incorrect (tamper)
pub fn open_body(sealed: &SealedBody, session_key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(session_key.as_bytes().into());
    let payload = Payload { msg: sealed.ciphertext.as_slice(), aad: BODY_AAD };

    cipher.decrypt(XNonce::from_slice(&sealed.nonce), payload).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session_key(fill: u8) -> SessionKey {
        SessionKey::from_bytes([fill; 32])
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_session_key(0x11);
        let plaintext = b"Forward secrecy in action";

        let sealed = seal_body(plaintext, &key, [0xAB; BODY_NONCE_SIZE]);
        let opened = open_body(&sealed, &key).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn seal_open_empty_body() {
        let key = test_session_key(0x11);

        let sealed = seal_body(b"", &key, [0x00; BODY_NONCE_SIZE]);
        assert_eq!(sealed.ciphertext.len(), POLY1305_TAG_SIZE);
        assert_eq!(open_body(&sealed, &key).unwrap(), b"");
    }

    #[test]
    fn seal_open_large_body() {
        let key = test_session_key(0x22);
        let plaintext = vec![0x42u8; 64 * 1024];

        let sealed = seal_body(&plaintext, &key, [0xFF; BODY_NONCE_SIZE]);
        assert_eq!(open_body(&sealed, &key).unwrap(), plaintext);
    }

    #[test]
    fn plaintext_len_calculation() {
        let key = test_session_key(0x11);
        let sealed = seal_body(b"hello world", &key, [0x00; BODY_NONCE_SIZE]);
        assert_eq!(sealed.plaintext_len(), 11);
    }

    #[test]
    fn wrong_key_fails_open() {
        let sealed = seal_body(b"secret", &test_session_key(0x11), [0x00; BODY_NONCE_SIZE]);

        let result = open_body(&sealed, &test_session_key(0x12));
        assert!(matches!(
            result,
            Err(CryptoError::DecryptionFailed { reason }) if reason.contains("authentication")
        ));
    }

    #[test]
    fn tampered_body_fails_open() {
        let key = test_session_key(0x11);
        let mut sealed = seal_body(b"original message", &key, [0x00; BODY_NONCE_SIZE]);
        sealed.ciphertext[0] ^= 0xFF;

        assert!(open_body(&sealed, &key).is_err());
    }
}
