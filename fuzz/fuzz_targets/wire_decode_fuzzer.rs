//! Fuzz target for wire decoding
//!
//! Feeds arbitrary bytes to every JSON decoder the relay path uses.
//!
//! # Invariants
//!
//! - Decoding never panics, only returns `WireError`
//! - Anything that decodes re-encodes to JSON that decodes to the same value
//! - Decoded messages always carry a payload long enough for nonce and tag

#![no_main]

use circle_core::{GroupMessage, MIN_PAYLOAD_SIZE, PeerPublicKeys, SenderKeyBundle, SponsorMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(message) = GroupMessage::from_json(json) {
        assert!(message.encrypted_payload.len() >= MIN_PAYLOAD_SIZE);
        assert_eq!(GroupMessage::from_json(&message.to_json()).unwrap(), message);
    }

    if let Ok(message) = SponsorMessage::from_json(json) {
        assert!(message.encrypted_payload.len() >= MIN_PAYLOAD_SIZE);
        assert_eq!(SponsorMessage::from_json(&message.to_json()).unwrap(), message);
    }

    if let Ok(bundle) = SenderKeyBundle::from_json(json) {
        assert_eq!(SenderKeyBundle::from_json(&bundle.to_json()).unwrap(), bundle);
    }

    if let Ok(keys) = PeerPublicKeys::from_json(json) {
        assert_eq!(PeerPublicKeys::from_json(&keys.to_json()).unwrap(), keys);
    }
});
