//! Forward-secret one-time subkeys for OpenPGP-style identities.
//!
//! An identity keeps a durable encryption subkey plus a pool of one-time
//! keys (OTKs). Senders encrypt to the oldest unexpired OTK; the recipient
//! deletes it on the first successful decryption. Once the key is gone, no
//! copy of the ciphertext can be decrypted again, even if the identity is
//! later compromised.
//!
//! # Lifecycle
//!
//! ```text
//!                  add_forward_secret / replenish
//!                 ┌────────────────────────────┐
//!                 ▼                            │
//!   Provisioned { available: n }          Exhausted
//!                 │                            ▲
//!                 └── last OTK consumed ───────┘
//!                     or expired
//! ```
//!
//! While exhausted, the selector falls back to the durable key. Fallback is
//! never an error.
//!
//! # Components
//!
//! - [`ForwardSecrecyPolicy`]: whether OTKs are used, how many, how long
//! - [`binder`]: generates and signs one OTK per call
//! - [`selector`]: picks the key a sender should encrypt to
//! - [`consumer`]: unwraps a session key and erases the OTK that opened it
//! - [`Identity`] / [`Certificate`]: private and public sides of a key
//! - [`message`]: whole-message encrypt and read on top of the above
//!
//! # Environment
//!
//! All time and randomness come from an [`Environment`]. [`SystemEnv`] is
//! the production implementation; tests substitute a controllable clock and
//! a seeded RNG.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod binder;
pub mod consumer;
pub mod env;
pub mod error;
pub mod identity;
pub mod message;
pub mod policy;
mod pool;
pub mod selector;
pub mod subkey;
mod system_env;

pub use binder::{add_forward_secret, replenish};
pub use consumer::{KeyWrapPacket, consume_and_decrypt};
pub use env::{Environment, Timestamp};
pub use error::OtkError;
pub use identity::{Certificate, Identity, UserId};
pub use message::{EncryptedMessage, encrypt_message, read_message};
pub use otk_crypto::SessionKey;
pub use policy::{DEFAULT_LIFETIME, DEFAULT_POOL_SIZE, ForwardSecrecyPolicy};
pub use pool::PoolState;
pub use selector::{Recipient, select_encryption_key, select_from};
pub use subkey::{BindingSignature, Fingerprint, KeyFlags, PublicSubkey};
pub use system_env::SystemEnv;
