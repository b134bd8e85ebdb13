//! Concurrency tests for one-time key consumption.
//!
//! Racing decryptions of the same ciphertext must consume the key exactly
//! once. Concurrent senders and receivers on one identity must never see a
//! half-updated pool.

use std::{
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use otk_core::{
    Environment, ForwardSecrecyPolicy, Identity, OtkError, Timestamp, UserId, encrypt_message,
    read_message,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

const THREADS: usize = 8;

// Test environment with a fixed clock and a shared seeded RNG
#[derive(Clone)]
struct TestEnv {
    clock: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl TestEnv {
    fn new(seed: u64) -> Self {
        Self {
            clock: Arc::new(AtomicU64::new(1_700_000_000)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }
}

impl Environment for TestEnv {
    fn wall_clock_secs(&self) -> Timestamp {
        self.clock.load(Ordering::SeqCst)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("rng mutex").fill_bytes(buffer);
    }
}

fn policy(pool_size: u32) -> ForwardSecrecyPolicy {
    ForwardSecrecyPolicy::enabled(pool_size, Duration::from_secs(3_600))
}

fn provisioned(env: &TestEnv, pool_size: u32) -> Arc<Identity> {
    let identity = Identity::generate(UserId::new("Bob", "", "bob@example.com"), env)
        .expect("generate identity");
    identity.replenish(&policy(pool_size), env).expect("replenish");
    Arc::new(identity)
}

#[test]
fn racing_decryptions_consume_once() {
    let env = TestEnv::new(1);
    let bob = provisioned(&env, 1);
    let message =
        Arc::new(encrypt_message(&[&*bob], b"race", &policy(1), &env).expect("encrypt"));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bob = Arc::clone(&bob);
            let message = Arc::clone(&message);
            let barrier = Arc::clone(&barrier);
            let env = env.clone();
            thread::spawn(move || {
                barrier.wait();
                read_message(&[&*bob], &message, &env)
            })
        })
        .collect();

    let results: Vec<_> =
        handles.into_iter().map(|handle| handle.join().expect("thread panicked")).collect();

    let successes = results.iter().filter(|result| result.is_ok()).count();
    let misses =
        results.iter().filter(|result| matches!(result, Err(OtkError::NoMatchingKey))).count();

    assert_eq!(successes, 1);
    assert_eq!(misses, THREADS - 1);
    assert_eq!(bob.otk_count(), 0);
}

#[test]
fn concurrent_round_trips_never_reuse_a_key() {
    let env = TestEnv::new(2);
    let bob = provisioned(&env, THREADS as u32);

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let bob = Arc::clone(&bob);
            let env = env.clone();
            thread::spawn(move || {
                let plaintext = format!("message {i}").into_bytes();
                let message = encrypt_message(&[&*bob], &plaintext, &policy(THREADS as u32), &env)
                    .expect("encrypt");
                (plaintext, read_message(&[&*bob], &message, &env))
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        let (plaintext, result) = handle.join().expect("thread panicked");
        match result {
            Ok(decrypted) => {
                assert_eq!(decrypted, plaintext);
                successes += 1;
            },
            // Another thread consumed the key this sender selected
            Err(err) => assert_eq!(err, OtkError::NoMatchingKey),
        }
    }

    // Every successful decryption removed exactly one distinct key
    assert!(successes > 0);
    assert_eq!(successes + bob.otk_count(), THREADS);
    assert!(bob.contains_subkey(&bob.durable_key().fingerprint()));
}

#[test]
fn racing_replenishers_fill_pool_exactly_once() {
    let env = TestEnv::new(4);
    let bob = Arc::new(
        Identity::generate(UserId::new("Bob", "", "bob@example.com"), &env)
            .expect("generate identity"),
    );
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bob = Arc::clone(&bob);
            let barrier = Arc::clone(&barrier);
            let env = env.clone();
            thread::spawn(move || {
                barrier.wait();
                bob.replenish(&policy(3), &env)
            })
        })
        .collect();

    let added: usize = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread panicked").expect("replenish"))
        .sum();

    assert_eq!(added, 3);
    assert_eq!(bob.otk_count(), 3);
}

#[test]
fn provisioning_races_with_consumption() {
    let env = TestEnv::new(3);
    let bob = provisioned(&env, 4);
    let message =
        Arc::new(encrypt_message(&[&*bob], b"hello", &policy(4), &env).expect("encrypt"));

    let provisioner = {
        let bob = Arc::clone(&bob);
        let env = env.clone();
        thread::spawn(move || {
            for _ in 0..4 {
                bob.add_forward_secret(&policy(8), &env).expect("add forward secret");
            }
        })
    };
    let reader = {
        let bob = Arc::clone(&bob);
        let env = env.clone();
        let message = Arc::clone(&message);
        thread::spawn(move || read_message(&[&*bob], &message, &env))
    };

    provisioner.join().expect("provisioner panicked");
    let plaintext = reader.join().expect("reader panicked").expect("decrypt");

    assert_eq!(plaintext, b"hello");
    assert_eq!(bob.otk_count(), 7);
}
