//! Wire types exchanged through the relay and the backend.
//!
//! Messages travel as JSON with byte fields encoded as arrays of 0-255
//! integers. Each type deserializes through a raw mirror struct whose byte
//! fields are plain `Vec<u8>`; the `TryFrom` conversion checks every length
//! before the value reaches a session, so the AEAD and signature layers only
//! ever see well-formed input.
//!
//! # Signing input
//!
//! ```text
//! group:   messageId ‖ groupId ‖ senderId   ‖ timestamp (i64 BE) ‖ encryptedPayload
//! sponsor: messageId ‖ senderId ‖ receiverId ‖ timestamp (i64 BE) ‖ encryptedPayload
//! ```

use std::fmt;

use circle_crypto::{KEY_SIZE, NONCE_SIZE, SIGNATURE_SIZE, TAG_SIZE};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{env::Environment, error::WireError};

/// Smallest valid encrypted payload: nonce plus tag, empty plaintext.
pub const MIN_PAYLOAD_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Fresh message id: 16 random bytes, hex-encoded.
pub fn new_message_id<E: Environment>(env: &E) -> String {
    hex::encode(env.random_array::<16>())
}

/// Signed, encrypted group message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawGroupMessage", into = "RawGroupMessage")]
pub struct GroupMessage {
    /// Random hex id
    pub message_id: String,
    /// Sender wall clock, milliseconds since the epoch
    pub timestamp: i64,
    /// Destination group
    pub group_id: String,
    /// Author
    pub sender_id: String,
    /// `nonce ‖ ciphertext ‖ tag`
    pub encrypted_payload: Vec<u8>,
    /// Ed25519 signature over [`GroupMessage::signing_input`]
    pub signature: [u8; SIGNATURE_SIZE],
    /// Index of the author's chain that produced the message key
    pub key_index: u32,
}

impl GroupMessage {
    /// Canonical bytes covered by the signature. `key_index` is not covered.
    pub fn signing_input(&self) -> Vec<u8> {
        group_signing_input(
            &self.message_id,
            &self.group_id,
            &self.sender_id,
            self.timestamp,
            &self.encrypted_payload,
        )
    }

    /// Serialize for the transport.
    pub fn to_json(&self) -> String {
        to_json(self)
    }

    /// Parse and validate a transport payload.
    ///
    /// # Errors
    ///
    /// - `Json`: not a group message
    /// - `InvalidLength` / `PayloadTooShort` / `EmptyField`: malformed fields
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        let raw: RawGroupMessage =
            serde_json::from_str(json).map_err(|e| WireError::Json(e.to_string()))?;
        Self::try_from(raw)
    }
}

/// Signed, encrypted 1:1 sponsor message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSponsorMessage", into = "RawSponsorMessage")]
pub struct SponsorMessage {
    /// Random hex id
    pub message_id: String,
    /// Sender wall clock, milliseconds since the epoch
    pub timestamp: i64,
    /// Author
    pub sender_id: String,
    /// Recipient
    pub receiver_id: String,
    /// `nonce ‖ ciphertext ‖ tag`
    pub encrypted_payload: Vec<u8>,
    /// Ed25519 signature over [`SponsorMessage::signing_input`]
    pub signature: [u8; SIGNATURE_SIZE],
}

impl SponsorMessage {
    /// Canonical bytes covered by the signature.
    pub fn signing_input(&self) -> Vec<u8> {
        sponsor_signing_input(
            &self.message_id,
            &self.sender_id,
            &self.receiver_id,
            self.timestamp,
            &self.encrypted_payload,
        )
    }

    /// Serialize for the transport.
    pub fn to_json(&self) -> String {
        to_json(self)
    }

    /// Parse and validate a transport payload.
    ///
    /// # Errors
    ///
    /// Same as [`GroupMessage::from_json`].
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        let raw: RawSponsorMessage =
            serde_json::from_str(json).map_err(|e| WireError::Json(e.to_string()))?;
        Self::try_from(raw)
    }
}

/// Export of a sender-key chain for one (group, author).
///
/// Holding a bundle lets the receiver decrypt every message of that author
/// from `key_index` onward. Only distribute it over an authenticated channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSenderKeyBundle", into = "RawSenderKeyBundle")]
pub struct SenderKeyBundle {
    /// Author
    pub user_id: String,
    /// Group
    pub group_id: String,
    /// Chain key at `key_index`
    pub chain_key: [u8; KEY_SIZE],
    /// Author's Ed25519 public key
    pub signing_public_key: [u8; KEY_SIZE],
    /// Next index the author will send with
    pub key_index: u32,
}

impl SenderKeyBundle {
    /// Serialize for the backend relay.
    pub fn to_json(&self) -> String {
        to_json(self)
    }

    /// Parse and validate a bundle.
    ///
    /// # Errors
    ///
    /// - `Json`: not a bundle
    /// - `InvalidLength` / `EmptyField`: malformed fields
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        let raw: RawSenderKeyBundle =
            serde_json::from_str(json).map_err(|e| WireError::Json(e.to_string()))?;
        Self::try_from(raw)
    }
}

impl fmt::Debug for SenderKeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderKeyBundle")
            .field("user_id", &self.user_id)
            .field("group_id", &self.group_id)
            .field("chain_key", &"[REDACTED]")
            .field("signing_public_key", &hex::encode(self.signing_public_key))
            .field("key_index", &self.key_index)
            .finish()
    }
}

impl Drop for SenderKeyBundle {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

/// Public halves a sponsor session hands to its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPeerPublicKeys", into = "RawPeerPublicKeys")]
pub struct PeerPublicKeys {
    /// X25519 public key for the session DH
    pub agreement_key: [u8; KEY_SIZE],
    /// Ed25519 public key for message signatures
    pub signing_key: [u8; KEY_SIZE],
}

impl PeerPublicKeys {
    /// Serialize for the backend relay.
    pub fn to_json(&self) -> String {
        to_json(self)
    }

    /// Parse and validate public keys.
    ///
    /// # Errors
    ///
    /// - `Json`: not a key pair
    /// - `InvalidLength`: a key is not 32 bytes
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        let raw: RawPeerPublicKeys =
            serde_json::from_str(json).map_err(|e| WireError::Json(e.to_string()))?;
        Self::try_from(raw)
    }
}

/// Signing input for a group message.
pub fn group_signing_input(
    message_id: &str,
    group_id: &str,
    sender_id: &str,
    timestamp: i64,
    encrypted_payload: &[u8],
) -> Vec<u8> {
    canonical_bytes(&[message_id, group_id, sender_id], timestamp, encrypted_payload)
}

/// Signing input for a sponsor message.
pub fn sponsor_signing_input(
    message_id: &str,
    sender_id: &str,
    receiver_id: &str,
    timestamp: i64,
    encrypted_payload: &[u8],
) -> Vec<u8> {
    canonical_bytes(&[message_id, sender_id, receiver_id], timestamp, encrypted_payload)
}

fn canonical_bytes(ids: &[&str], timestamp: i64, encrypted_payload: &[u8]) -> Vec<u8> {
    let ids_len: usize = ids.iter().map(|id| id.len()).sum();
    let mut input = Vec::with_capacity(ids_len + 8 + encrypted_payload.len());
    for id in ids {
        input.extend_from_slice(id.as_bytes());
    }
    input.extend_from_slice(&timestamp.to_be_bytes());
    input.extend_from_slice(encrypted_payload);
    input
}

fn to_json<T: Serialize>(value: &T) -> String {
    let Ok(json) = serde_json::to_string(value) else {
        unreachable!("wire types contain only strings, integers and byte arrays");
    };
    json
}

fn fixed<const N: usize>(field: &'static str, bytes: &[u8]) -> Result<[u8; N], WireError> {
    bytes
        .try_into()
        .map_err(|_| WireError::InvalidLength { field, expected: N, actual: bytes.len() })
}

fn non_empty(field: &'static str, value: String) -> Result<String, WireError> {
    if value.is_empty() {
        return Err(WireError::EmptyField { field });
    }
    Ok(value)
}

fn checked_payload(payload: Vec<u8>) -> Result<Vec<u8>, WireError> {
    if payload.len() < MIN_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooShort { actual: payload.len(), minimum: MIN_PAYLOAD_SIZE });
    }
    Ok(payload)
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroupMessage {
    message_id: String,
    timestamp: i64,
    group_id: String,
    sender_id: String,
    encrypted_payload: Vec<u8>,
    signature: Vec<u8>,
    key_index: u32,
}

impl TryFrom<RawGroupMessage> for GroupMessage {
    type Error = WireError;

    fn try_from(raw: RawGroupMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            signature: fixed("signature", &raw.signature)?,
            message_id: non_empty("messageId", raw.message_id)?,
            timestamp: raw.timestamp,
            group_id: non_empty("groupId", raw.group_id)?,
            sender_id: non_empty("senderId", raw.sender_id)?,
            encrypted_payload: checked_payload(raw.encrypted_payload)?,
            key_index: raw.key_index,
        })
    }
}

impl From<GroupMessage> for RawGroupMessage {
    fn from(msg: GroupMessage) -> Self {
        Self {
            message_id: msg.message_id,
            timestamp: msg.timestamp,
            group_id: msg.group_id,
            sender_id: msg.sender_id,
            encrypted_payload: msg.encrypted_payload,
            signature: msg.signature.to_vec(),
            key_index: msg.key_index,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSponsorMessage {
    message_id: String,
    timestamp: i64,
    sender_id: String,
    receiver_id: String,
    encrypted_payload: Vec<u8>,
    signature: Vec<u8>,
}

impl TryFrom<RawSponsorMessage> for SponsorMessage {
    type Error = WireError;

    fn try_from(raw: RawSponsorMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            signature: fixed("signature", &raw.signature)?,
            message_id: non_empty("messageId", raw.message_id)?,
            timestamp: raw.timestamp,
            sender_id: non_empty("senderId", raw.sender_id)?,
            receiver_id: non_empty("receiverId", raw.receiver_id)?,
            encrypted_payload: checked_payload(raw.encrypted_payload)?,
        })
    }
}

impl From<SponsorMessage> for RawSponsorMessage {
    fn from(msg: SponsorMessage) -> Self {
        Self {
            message_id: msg.message_id,
            timestamp: msg.timestamp,
            sender_id: msg.sender_id,
            receiver_id: msg.receiver_id,
            encrypted_payload: msg.encrypted_payload,
            signature: msg.signature.to_vec(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSenderKeyBundle {
    user_id: String,
    group_id: String,
    chain_key: Vec<u8>,
    signing_public_key: Vec<u8>,
    key_index: u32,
}

impl Drop for RawSenderKeyBundle {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

impl TryFrom<RawSenderKeyBundle> for SenderKeyBundle {
    type Error = WireError;

    fn try_from(raw: RawSenderKeyBundle) -> Result<Self, Self::Error> {
        Ok(Self {
            chain_key: fixed("chainKey", &raw.chain_key)?,
            signing_public_key: fixed("signingPublicKey", &raw.signing_public_key)?,
            user_id: non_empty("userId", raw.user_id.clone())?,
            group_id: non_empty("groupId", raw.group_id.clone())?,
            key_index: raw.key_index,
        })
    }
}

impl From<SenderKeyBundle> for RawSenderKeyBundle {
    fn from(bundle: SenderKeyBundle) -> Self {
        Self {
            user_id: bundle.user_id.clone(),
            group_id: bundle.group_id.clone(),
            chain_key: bundle.chain_key.to_vec(),
            signing_public_key: bundle.signing_public_key.to_vec(),
            key_index: bundle.key_index,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPeerPublicKeys {
    agreement_key: Vec<u8>,
    signing_key: Vec<u8>,
}

impl TryFrom<RawPeerPublicKeys> for PeerPublicKeys {
    type Error = WireError;

    fn try_from(raw: RawPeerPublicKeys) -> Result<Self, Self::Error> {
        Ok(Self {
            agreement_key: fixed("agreementKey", &raw.agreement_key)?,
            signing_key: fixed("signingKey", &raw.signing_key)?,
        })
    }
}

impl From<PeerPublicKeys> for RawPeerPublicKeys {
    fn from(keys: PeerPublicKeys) -> Self {
        Self { agreement_key: keys.agreement_key.to_vec(), signing_key: keys.signing_key.to_vec() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_group_message() -> GroupMessage {
        GroupMessage {
            message_id: "00112233445566778899aabbccddeeff".to_string(),
            timestamp: 1_700_000_000_000,
            group_id: "circle-7".to_string(),
            sender_id: "alice".to_string(),
            encrypted_payload: vec![0xAB; MIN_PAYLOAD_SIZE + 5],
            signature: [0x11; SIGNATURE_SIZE],
            key_index: 3,
        }
    }

    #[test]
    fn group_message_uses_camel_case_and_byte_arrays() {
        let json = sample_group_message().to_json();

        assert!(json.contains("\"messageId\""));
        assert!(json.contains("\"encryptedPayload\":[171,"));
        assert!(json.contains("\"keyIndex\":3"));
    }

    #[test]
    fn group_message_json_roundtrip() {
        let msg = sample_group_message();
        assert_eq!(GroupMessage::from_json(&msg.to_json()).unwrap(), msg);
    }

    #[test]
    fn rejects_short_signature() {
        let mut json: serde_json::Value =
            serde_json::from_str(&sample_group_message().to_json()).unwrap();
        json["signature"] = serde_json::json!([1, 2, 3]);

        let result = GroupMessage::from_json(&json.to_string());
        assert_eq!(
            result,
            Err(WireError::InvalidLength { field: "signature", expected: 64, actual: 3 })
        );
    }

    #[test]
    fn rejects_payload_without_tag() {
        let mut msg = sample_group_message();
        msg.encrypted_payload = vec![0; NONCE_SIZE];

        let result = GroupMessage::from_json(&msg.to_json());
        assert_eq!(result, Err(WireError::PayloadTooShort { actual: 12, minimum: 28 }));
    }

    #[test]
    fn rejects_out_of_range_bytes() {
        let mut json: serde_json::Value =
            serde_json::from_str(&sample_group_message().to_json()).unwrap();
        json["encryptedPayload"] = serde_json::json!(vec![256; 40]);

        assert!(matches!(GroupMessage::from_json(&json.to_string()), Err(WireError::Json(_))));
    }

    #[test]
    fn rejects_empty_sender() {
        let mut msg = sample_group_message();
        msg.sender_id = String::new();

        assert_eq!(
            GroupMessage::from_json(&msg.to_json()),
            Err(WireError::EmptyField { field: "senderId" })
        );
    }

    #[test]
    fn serde_path_validates_too() {
        let mut msg = sample_group_message();
        msg.encrypted_payload.truncate(4);

        let result: Result<GroupMessage, _> = serde_json::from_str(&msg.to_json());
        assert!(result.is_err());
    }

    #[test]
    fn signing_input_layout() {
        let msg = sample_group_message();
        let input = msg.signing_input();

        let ids = "00112233445566778899aabbccddeeffcircle-7alice";
        assert!(input.starts_with(ids.as_bytes()));
        assert_eq!(&input[ids.len()..ids.len() + 8], &1_700_000_000_000i64.to_be_bytes());
        assert_eq!(&input[ids.len() + 8..], msg.encrypted_payload.as_slice());
    }

    #[test]
    fn signing_input_ignores_key_index() {
        let a = sample_group_message();
        let mut b = a.clone();
        b.key_index = 99;

        assert_eq!(a.signing_input(), b.signing_input());
    }

    #[test]
    fn sponsor_signing_input_orders_sender_before_receiver() {
        let a = sponsor_signing_input("m", "alice", "bob", 1, &[]);
        let b = sponsor_signing_input("m", "bob", "alice", 1, &[]);

        assert_ne!(a, b);
        assert!(a.starts_with(b"malicebob"));
    }

    #[test]
    fn sponsor_message_roundtrip() {
        let msg = SponsorMessage {
            message_id: "ab".to_string(),
            timestamp: -5,
            sender_id: "alice".to_string(),
            receiver_id: "bob".to_string(),
            encrypted_payload: vec![7; 40],
            signature: [9; SIGNATURE_SIZE],
        };
        let json = msg.to_json();

        assert!(json.contains("\"receiverId\":\"bob\""));
        assert!(!json.contains("groupId"));
        assert_eq!(SponsorMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn bundle_debug_redacts_chain_key() {
        let bundle = SenderKeyBundle {
            user_id: "alice".to_string(),
            group_id: "g".to_string(),
            chain_key: [0x5A; KEY_SIZE],
            signing_public_key: [0x01; KEY_SIZE],
            key_index: 0,
        };

        let debug = format!("{bundle:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("90, 90"));
        assert_eq!(SenderKeyBundle::from_json(&bundle.to_json()).unwrap(), bundle);
    }

    #[test]
    fn bundle_rejects_short_chain_key() {
        let json = r#"{"userId":"alice","groupId":"g","chainKey":[1,2],
            "signingPublicKey":[],"keyIndex":0}"#;

        assert_eq!(
            SenderKeyBundle::from_json(json),
            Err(WireError::InvalidLength { field: "chainKey", expected: 32, actual: 2 })
        );
    }

    #[test]
    fn peer_public_keys_roundtrip() {
        let keys = PeerPublicKeys { agreement_key: [1; KEY_SIZE], signing_key: [2; KEY_SIZE] };
        assert_eq!(PeerPublicKeys::from_json(&keys.to_json()).unwrap(), keys);
    }

    #[test]
    fn message_ids_are_hex_and_unique() {
        let env = crate::env::testing::TestEnv::seeded(1);
        let a = new_message_id(&env);
        let b = new_message_id(&env);

        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
