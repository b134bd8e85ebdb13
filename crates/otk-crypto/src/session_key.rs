//! Per-message session keys

use zeroize::Zeroize;

/// Size of a session key (32 bytes, XChaCha20-Poly1305 key)
pub const SESSION_KEY_SIZE: usize = 32;

/// Symmetric key that seals exactly one message body.
///
/// Zeroized on drop. Not `Clone`.
pub struct SessionKey {
    bytes: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Create a session key from caller-provided random bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}
