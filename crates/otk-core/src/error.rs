//! Error types for the one-time key lifecycle.
//!
//! Falling back to the durable key when no one-time key is available is not
//! an error and has no variant here.

use otk_crypto::CryptoError;
use thiserror::Error;

/// Errors from identity, subkey and message operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtkError {
    /// Forward-secret subkey generation requested while the policy is off
    #[error("forward secrecy is disabled by policy")]
    PolicyDisabled,

    /// Policy values are inconsistent
    #[error("invalid forward secrecy policy: {reason}")]
    InvalidPolicy {
        /// What is wrong with the policy
        reason: String,
    },

    /// Subkey key-pair generation failed
    #[error("key generation failed: {reason}")]
    KeyGen {
        /// Reason for the failure
        reason: String,
    },

    /// Primary key could not produce a signature (e.g., it is locked)
    #[error("signing failed: {reason}")]
    Signing {
        /// Reason for the failure
        reason: String,
    },

    /// No usable private key unwraps any key-wrapping packet.
    ///
    /// Covers expired one-time keys, already-consumed one-time keys and
    /// messages that were never addressed to this identity.
    #[error("no matching key for any key-wrapping packet")]
    NoMatchingKey,

    /// Recipient certificate offers no encryption-capable subkey
    #[error("recipient has no usable encryption key")]
    NoEncryptionKey,

    /// Passphrase does not unlock the primary key
    #[error("wrong passphrase")]
    WrongPassphrase,

    /// A certification or binding signature did not verify
    #[error("invalid signature: {reason}")]
    InvalidSignature {
        /// Which signature failed and why
        reason: String,
    },

    /// Message encryption requested with an empty recipient list
    #[error("no recipients")]
    NoRecipients,

    /// CBOR encoding or decoding failed
    #[error("encoding error: {reason}")]
    Encoding {
        /// Underlying codec error
        reason: String,
    },

    /// Underlying cryptographic primitive failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl OtkError {
    /// Returns true if this error is fatal (unrecoverable)
    ///
    /// Fatal errors abort the call that produced them and indicate broken
    /// input or key material. Recoverable errors are part of normal
    /// operation: the caller skips provisioning, reports the message as
    /// undecryptable, or prompts for the passphrase again.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidPolicy { .. } => true,
            Self::KeyGen { .. } => true,
            Self::Signing { .. } => true,
            Self::NoEncryptionKey => true,
            Self::InvalidSignature { .. } => true,
            Self::Encoding { .. } => true,
            Self::Crypto(err) => err.is_fatal(),

            Self::PolicyDisabled => false,
            Self::NoMatchingKey => false,
            Self::WrongPassphrase => false,
            Self::NoRecipients => false,
        }
    }
}
