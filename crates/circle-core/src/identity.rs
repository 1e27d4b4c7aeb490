//! Device identity keys.
//!
//! Generated once per device, persisted under `identity` and loaded at
//! protocol start. The identity key is an Ed25519 pair; it signs the X25519
//! signed pre-key so peers can check that the pre-key belongs to this device.

use circle_crypto::{
    AgreementKeyPair, KEY_SIZE, SIGNATURE_SIZE, SigningKeyPair, generate_key_pair,
    generate_signing_key_pair, verify,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroize;

use crate::{
    env::Environment,
    error::ProtocolError,
    storage::{IDENTITY_KEY, Storage, load_state, save_state},
};

/// Upper bound for registration ids (14-bit, non-zero).
const MAX_REGISTRATION_ID: u32 = 16380;

/// Long-lived keys of this device.
#[derive(Clone)]
pub struct IdentityKeys {
    identity_key: SigningKeyPair,
    signed_pre_key: AgreementKeyPair,
    signed_pre_key_signature: [u8; SIGNATURE_SIZE],
    pre_keys: Vec<AgreementKeyPair>,
    registration_id: u32,
}

/// Public halves of [`IdentityKeys`], safe to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPublicBundle {
    /// Ed25519 identity key
    pub identity_key: [u8; KEY_SIZE],
    /// X25519 signed pre-key
    pub signed_pre_key: [u8; KEY_SIZE],
    /// Identity signature over `signed_pre_key`
    pub signed_pre_key_signature: [u8; SIGNATURE_SIZE],
    /// X25519 one-time pre-keys
    pub pre_keys: Vec<[u8; KEY_SIZE]>,
    /// Device registration id
    pub registration_id: u32,
}

impl IdentityPublicBundle {
    /// Check the identity signature on the signed pre-key.
    pub fn verify_signed_pre_key(&self) -> bool {
        verify(&self.identity_key, &self.signed_pre_key, &self.signed_pre_key_signature)
    }
}

impl IdentityKeys {
    /// Generate a fresh identity with `pre_key_count` one-time pre-keys.
    pub fn generate<E: Environment>(env: &E, pre_key_count: usize) -> Self {
        let identity_key = generate_signing_key_pair(env.random_array());
        let signed_pre_key = generate_key_pair(env.random_array());
        let signed_pre_key_signature = identity_key.sign(&signed_pre_key.public_key());

        let pre_keys = (0..pre_key_count).map(|_| generate_key_pair(env.random_array())).collect();
        let registration_id = env.random_u32() % MAX_REGISTRATION_ID + 1;

        Self { identity_key, signed_pre_key, signed_pre_key_signature, pre_keys, registration_id }
    }

    /// Load the persisted identity, or generate and persist a new one.
    ///
    /// # Errors
    ///
    /// - `PersistenceFailure`: storage read or write failed
    /// - `CorruptState`: stored identity cannot be decoded
    pub async fn load_or_generate<S: Storage, E: Environment>(
        storage: &S,
        env: &E,
        pre_key_count: usize,
    ) -> Result<Self, ProtocolError> {
        if let Some(stored) = load_state::<_, StoredIdentity>(storage, IDENTITY_KEY).await? {
            let identity = Self::from_stored(&stored)?;
            info!(registration_id = identity.registration_id, "loaded device identity");
            return Ok(identity);
        }

        let identity = Self::generate(env, pre_key_count);
        save_state(storage, IDENTITY_KEY, &identity.to_stored()).await.map_err(|source| {
            ProtocolError::PersistenceFailure { key: IDENTITY_KEY.to_string(), source }
        })?;

        info!(
            registration_id = identity.registration_id,
            pre_keys = identity.pre_keys.len(),
            "generated device identity"
        );
        Ok(identity)
    }

    /// Export the public halves.
    pub fn public_bundle(&self) -> IdentityPublicBundle {
        IdentityPublicBundle {
            identity_key: self.identity_key.public_key(),
            signed_pre_key: self.signed_pre_key.public_key(),
            signed_pre_key_signature: self.signed_pre_key_signature,
            pre_keys: self.pre_keys.iter().map(AgreementKeyPair::public_key).collect(),
            registration_id: self.registration_id,
        }
    }

    /// Ed25519 identity public key.
    pub fn identity_public_key(&self) -> [u8; KEY_SIZE] {
        self.identity_key.public_key()
    }

    /// Device registration id in `1..=16380`.
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// Number of one-time pre-keys.
    pub fn pre_key_count(&self) -> usize {
        self.pre_keys.len()
    }

    fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            identity_secret: *self.identity_key.secret_bytes(),
            signed_pre_key_secret: *self.signed_pre_key.secret_bytes(),
            signed_pre_key_signature: self.signed_pre_key_signature.to_vec(),
            pre_key_secrets: self.pre_keys.iter().map(|key| *key.secret_bytes()).collect(),
            registration_id: self.registration_id,
        }
    }

    fn from_stored(stored: &StoredIdentity) -> Result<Self, ProtocolError> {
        let signed_pre_key_signature: [u8; SIGNATURE_SIZE] =
            stored.signed_pre_key_signature.as_slice().try_into().map_err(|_| {
                ProtocolError::CorruptState {
                    key: IDENTITY_KEY.to_string(),
                    reason: format!(
                        "signed pre-key signature is {} bytes",
                        stored.signed_pre_key_signature.len()
                    ),
                }
            })?;

        Ok(Self {
            identity_key: SigningKeyPair::from_secret_bytes(stored.identity_secret),
            signed_pre_key: AgreementKeyPair::from_secret_bytes(stored.signed_pre_key_secret),
            signed_pre_key_signature,
            pre_keys: stored
                .pre_key_secrets
                .iter()
                .map(|secret| AgreementKeyPair::from_secret_bytes(*secret))
                .collect(),
            registration_id: stored.registration_id,
        })
    }
}

/// Persisted form of [`IdentityKeys`].
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    identity_secret: [u8; KEY_SIZE],
    signed_pre_key_secret: [u8; KEY_SIZE],
    signed_pre_key_signature: Vec<u8>,
    pre_key_secrets: Vec<[u8; KEY_SIZE]>,
    registration_id: u32,
}

impl Drop for StoredIdentity {
    fn drop(&mut self) {
        self.identity_secret.zeroize();
        self.signed_pre_key_secret.zeroize();
        self.pre_key_secrets.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::testing::TestEnv,
        storage::{ChaoticStorage, MemoryStorage},
    };

    #[test]
    fn generated_identity_is_well_formed() {
        let identity = IdentityKeys::generate(&TestEnv::seeded(1), 10);
        let bundle = identity.public_bundle();

        assert_eq!(bundle.pre_keys.len(), 10);
        assert!((1..=MAX_REGISTRATION_ID).contains(&bundle.registration_id));
        assert!(bundle.verify_signed_pre_key());
    }

    #[test]
    fn tampered_pre_key_fails_verification() {
        let mut bundle = IdentityKeys::generate(&TestEnv::seeded(2), 1).public_bundle();
        bundle.signed_pre_key[0] ^= 1;

        assert!(!bundle.verify_signed_pre_key());
    }

    #[tokio::test]
    async fn identity_is_generated_once() {
        let storage = MemoryStorage::new();
        let env = TestEnv::seeded(3);

        let first = IdentityKeys::load_or_generate(&storage, &env, 10).await.unwrap();
        let second = IdentityKeys::load_or_generate(&storage, &env, 10).await.unwrap();

        assert!(storage.contains(IDENTITY_KEY));
        assert_eq!(first.public_bundle(), second.public_bundle());
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 1.0).writes_only();
        let env = TestEnv::seeded(4);

        let result = IdentityKeys::load_or_generate(&storage, &env, 10).await;
        assert!(matches!(result, Err(ProtocolError::PersistenceFailure { .. })));
        assert!(storage.inner().is_empty());
    }
}
