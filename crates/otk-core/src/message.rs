//! Encrypted messages.
//!
//! A message is a body sealed under a fresh session key plus one
//! [`KeyWrapPacket`] per recipient. The sender asks each recipient for its
//! preferred subkey (a one-time key when available) and wraps the session
//! key to it.
//!
//! ```text
//! EncryptedMessage
//! ├─ key_wraps: [KeyWrapPacket; recipients]
//! ├─ nonce:     24 bytes
//! └─ ciphertext
//! ```
//!
//! Reading consumes the recipient's one-time key before the body is opened.
//! A message whose body fails authentication still costs the key.

use otk_crypto::{BODY_NONCE_SIZE, SealedBody, SessionKey, open_body, seal_body};
use serde::{Deserialize, Serialize};

use crate::{
    consumer::KeyWrapPacket,
    env::Environment,
    error::OtkError,
    identity::Identity,
    policy::ForwardSecrecyPolicy,
    selector::Recipient,
};

/// A sealed body with the session key wrapped to each recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    /// One packet per recipient
    pub key_wraps: Vec<KeyWrapPacket>,
    /// Body nonce
    pub nonce: [u8; BODY_NONCE_SIZE],
    /// Sealed body including authentication tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedMessage {
    /// Encode as CBOR.
    ///
    /// # Errors
    ///
    /// - `Encoding` if serialization fails
    pub fn to_cbor(&self) -> Result<Vec<u8>, OtkError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| OtkError::Encoding { reason: format!("message: {e}") })?;
        Ok(bytes)
    }

    /// Decode from CBOR.
    ///
    /// # Errors
    ///
    /// - `Encoding` if the bytes are not a valid message
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, OtkError> {
        ciborium::from_reader(bytes)
            .map_err(|e| OtkError::Encoding { reason: format!("message: {e}") })
    }

    fn sealed_body(&self) -> SealedBody {
        SealedBody { nonce: self.nonce, ciphertext: self.ciphertext.clone() }
    }
}

/// Encrypt `plaintext` to every recipient.
///
/// Each recipient's subkey is chosen by the selector under `policy` at the
/// environment's current time. Selection does not consume anything.
///
/// # Errors
///
/// - `NoRecipients` if `recipients` is empty
/// - `NoEncryptionKey` if a certificate offers no usable subkey
/// - `Crypto` if a selected public key is degenerate
pub fn encrypt_message<E: Environment>(
    recipients: &[&dyn Recipient],
    plaintext: &[u8],
    policy: &ForwardSecrecyPolicy,
    env: &E,
) -> Result<EncryptedMessage, OtkError> {
    if recipients.is_empty() {
        return Err(OtkError::NoRecipients);
    }

    let now = env.wall_clock_secs();
    let session_key = SessionKey::from_bytes(env.random_array());

    let mut key_wraps = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let subkey = recipient.encryption_key(policy, now)?;
        tracing::debug!(
            recipient = %recipient.fingerprint(),
            subkey = %subkey.fingerprint(),
            one_time = subkey.is_forward_secret(),
            "Wrapping session key"
        );
        key_wraps.push(KeyWrapPacket::wrap(&session_key, &subkey, env)?);
    }

    let sealed = seal_body(plaintext, &session_key, env.random_array());
    Ok(EncryptedMessage { key_wraps, nonce: sealed.nonce, ciphertext: sealed.ciphertext })
}

/// Decrypt `message` with the first identity in `keyring` that can unwrap
/// its session key.
///
/// # Errors
///
/// - `NoMatchingKey` if no identity opens any packet
/// - `Crypto` if the body fails authentication
pub fn read_message<E: Environment>(
    keyring: &[&Identity],
    message: &EncryptedMessage,
    env: &E,
) -> Result<Vec<u8>, OtkError> {
    let now = env.wall_clock_secs();

    for identity in keyring {
        match identity.consume_and_decrypt(&message.key_wraps, now) {
            Ok(session_key) => {
                let plaintext = open_body(&message.sealed_body(), &session_key)?;
                return Ok(plaintext);
            },
            Err(OtkError::NoMatchingKey) => {},
            Err(err) => return Err(err),
        }
    }
    Err(OtkError::NoMatchingKey)
}
