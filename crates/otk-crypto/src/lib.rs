//! OTK Cryptographic Primitives
//!
//! Cryptographic building blocks for forward-secret one-time subkeys. Pure
//! functions with deterministic outputs. Callers provide random bytes for
//! deterministic testing.
//!
//! # Key Lifecycle
//!
//! A sender draws a fresh session key for every message, seals the body under
//! it, and wraps the session key to one public subkey of each recipient. The
//! wrapping uses an ephemeral X25519 key, so only the recipient's subkey
//! secret can recover the session key.
//!
//! ```text
//! Recipient Subkey (X25519 public)      Ephemeral Secret (per wrap)
//!        │                                     │
//!        └──────────── ECDH ───────────────────┘
//!                       │
//!                       ▼
//!              HKDF → Key-Encryption Key
//!                       │
//!                       ▼
//!      XChaCha20-Poly1305(Session Key) → WrappedSessionKey
//!
//! Session Key → XChaCha20-Poly1305(body) → SealedBody
//! ```
//!
//! When the recipient subkey is a one-time key, deleting its secret after the
//! first unwrap makes every ciphertext wrapped to it permanently unreadable.
//!
//! # Security
//!
//! Forward Secrecy:
//! - Subkey secrets are zeroized when dropped or explicitly erased
//! - Ephemeral secrets and key-encryption keys never outlive a single call
//! - Session keys are zeroized on drop
//!
//! Authenticity:
//! - XChaCha20-Poly1305 AEAD rejects tampered wraps and bodies
//! - The recipient fingerprint is bound into the wrap as associated data
//! - Non-contributory (low-order) ephemeral points are rejected
//!
//! Key Protection:
//! - Long-term secrets at rest are sealed under an iterated and salted S2K
//!   passphrase derivation

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod encryption;
pub mod error;
pub mod keys;
pub mod s2k;
pub mod session_key;
pub mod wrap;

pub use encryption::{BODY_NONCE_SIZE, SealedBody, open_body, seal_body};
pub use error::CryptoError;
pub use keys::{EncryptionPublic, EncryptionSecret, KEY_SIZE};
pub use s2k::{ProtectedSecret, S2K_SALT_SIZE, S2kParams, protect_secret, unprotect_secret};
pub use session_key::{SESSION_KEY_SIZE, SessionKey};
pub use wrap::{WRAP_NONCE_SIZE, WrappedSessionKey, unwrap_session_key, wrap_session_key};
