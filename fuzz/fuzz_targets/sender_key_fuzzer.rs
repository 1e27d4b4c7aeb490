//! Fuzz target for the sender-key ratchet
//!
//! Drives a local sender session and its mirror with arbitrary sends,
//! deliveries in any order, replays, forged key indices, tampering and cache
//! eviction.
//!
//! # Invariants
//!
//! - Nothing panics
//! - A successful decrypt returns exactly what was sent
//! - A message never decrypts twice on the mirror
//! - Rejected messages leave the mirror's chain index untouched
//! - `advance_to(n)` yields the same key as n single steps

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use circle_core::{GroupMessage, SenderKeySession};
use circle_crypto::{ChainKey, DEFAULT_MAX_SKIP};
use libfuzzer_sys::fuzz_target;

const NOW: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    chain_seed: [u8; 32],
    signing_seed: [u8; 32],
    nonce: [u8; 12],
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Operation {
    /// Encrypt on the local session
    Send { message: Vec<u8> },
    /// Deliver a previously sent message to the mirror
    Deliver { pick: u16 },
    /// Deliver with a rewritten (unsigned) key index
    ForgeIndex { pick: u16, key_index: u32 },
    /// Flip bits in the encrypted payload
    Tamper { pick: u16, position: u16, mask: u8 },
    /// Evict old cached keys on both sides
    Cleanup { max_age: u16 },
    /// Compare jump and step-by-step chain advancement
    CompareAdvance { steps: u8 },
}

type Sent = (GroupMessage, Vec<u8>);

fn pick(sent: &[Sent], index: u16) -> Option<&Sent> {
    if sent.is_empty() {
        return None;
    }
    sent.get(index as usize % sent.len())
}

fuzz_target!(|scenario: Scenario| {
    let mut local =
        SenderKeySession::create_local("g", "alice", scenario.chain_seed, scenario.signing_seed);
    let mut mirror = SenderKeySession::from_bundle(&local.sender_key_bundle());
    let signing_key = local.signing_public_key();

    let mut sent: Vec<Sent> = Vec::new();
    let mut delivered = HashSet::new();

    for op in scenario.operations.into_iter().take(256) {
        match op {
            Operation::Send { message } => {
                let id = format!("m{}", sent.len());
                if let Ok(encrypted) = local.encrypt_message(&message, id, NOW, scenario.nonce) {
                    sent.push((encrypted, message));
                }
            },

            Operation::Deliver { pick: index } => {
                let Some((message, plaintext)) = pick(&sent, index) else { continue };
                let before = mirror.key_index();

                match mirror.decrypt_message(message, &signing_key) {
                    Ok(decrypted) => {
                        assert_eq!(&decrypted, plaintext, "decrypt must return what was sent");
                        assert!(
                            delivered.insert(message.key_index),
                            "index {} decrypted twice",
                            message.key_index
                        );
                    },
                    Err(_) => assert_eq!(mirror.key_index(), before, "rejection moved chain"),
                }
            },

            Operation::ForgeIndex { pick: index, key_index } => {
                let Some((message, _)) = pick(&sent, index) else { continue };
                if key_index == message.key_index {
                    continue;
                }
                let mut forged = message.clone();
                forged.key_index = key_index;
                let before = mirror.key_index();

                assert!(mirror.decrypt_message(&forged, &signing_key).is_err());
                assert_eq!(mirror.key_index(), before, "forged index moved chain");
            },

            Operation::Tamper { pick: index, position, mask } => {
                let Some((message, _)) = pick(&sent, index) else { continue };
                if mask == 0 {
                    continue;
                }
                let mut tampered = message.clone();
                let at = position as usize % tampered.encrypted_payload.len();
                tampered.encrypted_payload[at] ^= mask;

                assert!(mirror.decrypt_message(&tampered, &signing_key).is_err());
                assert!(local.decrypt_message(&tampered, &signing_key).is_err());
            },

            Operation::Cleanup { max_age } => {
                local.cleanup_old_keys(u32::from(max_age));
                mirror.cleanup_old_keys(u32::from(max_age));
            },

            Operation::CompareAdvance { steps } => {
                let mut jumped = ChainKey::new(scenario.chain_seed, 0);
                let mut stepped = ChainKey::new(scenario.chain_seed, 0);
                let target = u32::from(steps);

                let (skipped, key) = jumped.advance_to(target, DEFAULT_MAX_SKIP).unwrap();
                assert_eq!(skipped.len(), target as usize);
                for _ in 0..target {
                    stepped.advance().unwrap();
                }
                let expected = stepped.advance().unwrap();

                assert_eq!(key.key(), expected.key());
                assert_eq!(jumped.key(), stepped.key());
            },
        }
    }
});
