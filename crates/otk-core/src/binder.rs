//! One-time key generation and binding.
//!
//! Each call creates exactly one X25519 key pair, signs a binding for it
//! with the primary key (flags `ENCRYPT_COMMS | ENCRYPT_STORAGE |
//! FORWARD_SECRECY`, expiry `now + lifetime`) and appends it to the pool.
//!
//! The identity mutex is held from key generation to the append, and the
//! append is the last step. A failure at any point leaves the pool as it
//! was. Replenishing takes the mutex once for its purge, count and every
//! append.

use otk_crypto::EncryptionSecret;

use crate::{
    env::Environment,
    error::OtkError,
    identity::{Identity, IdentityState},
    policy::ForwardSecrecyPolicy,
    subkey::{BindingSignature, Fingerprint, KeyFlags, PublicSubkey, Subkey},
};

/// Generate, bind and store one forward-secret subkey.
///
/// # Errors
///
/// - `PolicyDisabled` if `policy` is off (nothing is generated)
/// - `InvalidPolicy` if `policy` fails validation
/// - `Signing` if the primary key is locked or the signature fails
/// - `KeyGen` if the environment yields a degenerate seed
pub fn add_forward_secret<E: Environment>(
    identity: &Identity,
    policy: &ForwardSecrecyPolicy,
    env: &E,
) -> Result<PublicSubkey, OtkError> {
    if !policy.is_enabled() {
        return Err(OtkError::PolicyDisabled);
    }
    policy.validate()?;

    let mut state = identity.state();
    bind_one(&mut state, identity.fingerprint(), policy, env)
}

/// Purge expired one-time keys and add new ones until the number of live
/// one-time keys equals `policy.num_forward_secrets()`.
///
/// Returns the number of keys added. A disabled policy adds nothing and
/// purges nothing. A pool already at or above the target is left alone.
/// The identity mutex is held for the whole call, so concurrent callers
/// never overshoot the target.
///
/// # Errors
///
/// Propagates the first generation or signing failure; keys added before
/// it stay in the pool.
pub fn replenish<E: Environment>(
    identity: &Identity,
    policy: &ForwardSecrecyPolicy,
    env: &E,
) -> Result<usize, OtkError> {
    if !policy.is_enabled() {
        return Ok(0);
    }
    policy.validate()?;

    let mut state = identity.state();
    let now = env.wall_clock_secs();
    state.purge_expired(identity.fingerprint(), now);

    let target = policy.num_forward_secrets() as usize;
    let missing = target.saturating_sub(state.pool.live_otk_count(now));

    for _ in 0..missing {
        bind_one(&mut state, identity.fingerprint(), policy, env)?;
    }

    if missing > 0 {
        tracing::info!(
            identity = %identity.fingerprint(),
            added = missing,
            target,
            "Replenished one-time key pool"
        );
    }
    Ok(missing)
}

/// Create one one-time key and append it. The caller holds the identity
/// mutex and has already checked `policy`.
fn bind_one<E: Environment>(
    state: &mut IdentityState,
    identity: Fingerprint,
    policy: &ForwardSecrecyPolicy,
    env: &E,
) -> Result<PublicSubkey, OtkError> {
    let primary = state.signing_key()?;

    let created_at = env.wall_clock_secs();
    let expires_at = policy.expiry_from(created_at);

    let secret = EncryptionSecret::from_random(env.random_array())
        .map_err(|e| OtkError::KeyGen { reason: format!("one-time subkey: {e}") })?;
    let public = secret.public_key();
    let binding = BindingSignature::sign(
        primary,
        &public,
        KeyFlags::one_time_encryption(),
        created_at,
        Some(expires_at),
    )?;
    let subkey = PublicSubkey::new(public, binding);

    if state.pool.append(Subkey::new(subkey.clone(), secret)).is_none() {
        return Err(OtkError::KeyGen {
            reason: format!("generated subkey {} already present", subkey.fingerprint()),
        });
    }

    tracing::info!(
        identity = %identity,
        subkey = %subkey.fingerprint(),
        expires_at,
        "Added one-time key"
    );

    Ok(subkey)
}
