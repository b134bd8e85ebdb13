//! Error types for OTK cryptographic operations

use thiserror::Error;

/// Errors from cryptographic primitives
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Wrapped session key could not be recovered with the given secret.
    ///
    /// Either the wrap was made for a different subkey or it was tampered
    /// with. The two cases are deliberately indistinguishable.
    #[error("session key unwrap failed")]
    UnwrapFailed,

    /// AEAD decryption of a message body or protected secret failed
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Invalid key material length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// Key material is unusable (all-zero seed or low-order point)
    #[error("degenerate key material")]
    DegenerateKey,
}

impl CryptoError {
    /// Returns true if this error is fatal (unrecoverable)
    ///
    /// `UnwrapFailed` is expected whenever a message was not addressed to the
    /// tried key, so callers move on to the next candidate.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::DecryptionFailed { .. } => true,
            Self::InvalidKeyLength { .. } => true,
            Self::DegenerateKey => true,

            Self::UnwrapFailed => false,
        }
    }
}
