//! Property-based tests for the crypto primitives
//!
//! These tests verify the fundamental invariants of the ratchet and AEAD:
//!
//! 1. **Round-trip**: open(seal(m)) == m for all messages
//! 2. **Key uniqueness**: different chain indices produce different keys
//! 3. **One-wayness**: chain outputs are unrelated to their input
//! 4. **Tamper detection**: any flipped bit fails authentication

use circle_crypto::{
    ChainKey, CryptoError, DEFAULT_MAX_SKIP, NONCE_SIZE, derive_message_keys, kdf_chain_key, open,
    seal, sign, verify,
};
use proptest::prelude::*;

fn key_strategy() -> impl Strategy<Value = [u8; 32]> {
    prop::collection::vec(any::<u8>(), 32..=32).prop_map(|v| {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&v);
        arr
    })
}

fn hamming_distance(a: &[u8; 32], b: &[u8; 32]) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_seal_open_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..1000),
        message_key in key_strategy(),
        nonce_byte in any::<u8>(),
    ) {
        let keys = derive_message_keys(&message_key, [nonce_byte; NONCE_SIZE]);
        let payload = seal(&keys, &plaintext);

        prop_assert_eq!(open(&keys.cipher_key, &payload).unwrap(), plaintext);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_chain_keys_unique(seed in key_strategy(), num_keys in 2usize..20) {
        let mut chain = ChainKey::new(seed, 0);
        let mut keys = Vec::with_capacity(num_keys);

        for _ in 0..num_keys {
            keys.push(chain.advance().unwrap());
        }

        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                prop_assert_ne!(
                    keys[i].key(),
                    keys[j].key(),
                    "keys at index {} and {} must be different",
                    keys[i].index(),
                    keys[j].index()
                );
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_chain_step_outputs_look_independent(chain_key in key_strategy()) {
        let step = kdf_chain_key(&chain_key);

        // Outputs of a PRF differ from the input and from each other in
        // roughly half their bits. Anything near 0 or 256 would mean the
        // input leaks through.
        for output in [&step.next_chain_key, &step.message_key] {
            let distance = hamming_distance(output, &chain_key);
            prop_assert!((64..=192).contains(&distance), "distance {} out of range", distance);
        }
        let between = hamming_distance(&step.next_chain_key, &step.message_key);
        prop_assert!((64..=192).contains(&between));
    }

    #[test]
    fn prop_single_bit_change_avalanches(chain_key in key_strategy(), bit in 0usize..256) {
        let mut flipped = chain_key;
        flipped[bit / 8] ^= 1 << (bit % 8);

        let a = kdf_chain_key(&chain_key);
        let b = kdf_chain_key(&flipped);

        prop_assert!(hamming_distance(&a.next_chain_key, &b.next_chain_key) >= 64);
        prop_assert!(hamming_distance(&a.message_key, &b.message_key) >= 64);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_later_chain_key_never_reproduces_earlier_message_keys(
        seed in key_strategy(),
        n in 1u32..50,
    ) {
        let mut chain = ChainKey::new(seed, 0);
        let mut earlier = Vec::new();
        for _ in 0..n {
            earlier.push(*chain.advance().unwrap().key());
        }

        // Running the chain forward from index n only ever yields new keys.
        let mut resumed = ChainKey::new(*chain.key(), chain.index());
        for _ in 0..n {
            let key = resumed.advance().unwrap();
            prop_assert!(!earlier.contains(key.key()));
        }
    }

    #[test]
    fn prop_skip_matches_sequential(seed in key_strategy(), target in 0u32..200) {
        let mut sequential = ChainKey::new(seed, 0);
        let mut last = sequential.advance().unwrap();
        for _ in 0..target {
            last = sequential.advance().unwrap();
        }

        let mut skipping = ChainKey::new(seed, 0);
        let (skipped, key) = skipping.advance_to(target, DEFAULT_MAX_SKIP).unwrap();

        prop_assert_eq!(skipped.len() as u32, target);
        prop_assert_eq!(key.key(), last.key());
        prop_assert_eq!(skipping.index(), sequential.index());
    }

    #[test]
    fn prop_flipped_bit_fails_authentication(
        plaintext in prop::collection::vec(any::<u8>(), 1..200),
        message_key in key_strategy(),
        bit in any::<prop::sample::Index>(),
    ) {
        let keys = derive_message_keys(&message_key, [0x5A; NONCE_SIZE]);
        let mut payload = seal(&keys, &plaintext);

        let position = bit.index(payload.len() * 8);
        payload[position / 8] ^= 1 << (position % 8);

        prop_assert_eq!(open(&keys.cipher_key, &payload), Err(CryptoError::TagMismatch));
    }

    #[test]
    fn prop_signature_covers_every_byte(
        message in prop::collection::vec(any::<u8>(), 1..200),
        seed in key_strategy(),
        bit in any::<prop::sample::Index>(),
    ) {
        let pair = circle_crypto::generate_signing_key_pair(seed);
        let signature = sign(&pair.secret_bytes(), &message);
        prop_assert!(verify(&pair.public_key(), &message, &signature));

        let mut tampered = message.clone();
        let position = bit.index(tampered.len() * 8);
        tampered[position / 8] ^= 1 << (position % 8);

        prop_assert!(!verify(&pair.public_key(), &tampered, &signature));
    }
}
