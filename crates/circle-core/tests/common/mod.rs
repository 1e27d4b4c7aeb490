//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use circle_core::{
    Environment, GroupProtocolCoordinator, MemoryStorage, PairwiseSessionManager, PeerPublicKeys,
    ProtocolConfig, Storage,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Seeded environment: reproducible keys, nonces and ids.
#[derive(Clone)]
pub struct SeededEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    now_millis: i64,
}

impl SeededEnv {
    /// Environment seeded with `seed`, clock fixed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            now_millis: 1_700_000_000_000,
        }
    }
}

impl Environment for SeededEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }

    fn wall_clock_millis(&self) -> i64 {
        self.now_millis
    }
}

/// Group coordinator on fresh in-memory storage.
pub fn group_device(seed: u64) -> GroupProtocolCoordinator<MemoryStorage, SeededEnv> {
    GroupProtocolCoordinator::new(
        MemoryStorage::new(),
        SeededEnv::new(seed),
        ProtocolConfig::default(),
    )
}

/// Sponsor manager on fresh in-memory storage.
pub fn sponsor_device(seed: u64) -> PairwiseSessionManager<MemoryStorage, SeededEnv> {
    PairwiseSessionManager::new(MemoryStorage::new(), SeededEnv::new(seed))
}

/// Run the public-key exchange for `sponsorship_id` between two managers.
pub async fn pair<S: Storage, T: Storage>(
    alice: &PairwiseSessionManager<S, SeededEnv>,
    bob: &PairwiseSessionManager<T, SeededEnv>,
    sponsorship_id: &str,
) -> (PeerPublicKeys, PeerPublicKeys) {
    let alice_keys = alice.create_session(sponsorship_id, "alice", "bob").await.unwrap();
    let bob_keys = bob.create_session(sponsorship_id, "bob", "alice").await.unwrap();

    // Relay through the backend's JSON encoding.
    let for_alice = PeerPublicKeys::from_json(&bob_keys.to_json()).unwrap();
    let for_bob = PeerPublicKeys::from_json(&alice_keys.to_json()).unwrap();
    alice.set_other_public_key(sponsorship_id, &for_alice).await.unwrap();
    bob.set_other_public_key(sponsorship_id, &for_bob).await.unwrap();

    (alice_keys, bob_keys)
}
