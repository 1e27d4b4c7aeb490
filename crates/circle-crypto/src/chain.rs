//! Forward-secure chain key ratchet
//!
//! # Security Properties
//!
//! - Forward Secrecy: the old chain key is zeroized when advancing
//! - Key Uniqueness: each index produces a unique message key
//! - Determinism: the same starting key always produces the same sequence

use zeroize::Zeroize;

use crate::{error::CryptoError, kdf::kdf_chain_key, keys::KEY_SIZE};

/// Default bound on how many indices a chain may skip in one call.
pub const DEFAULT_MAX_SKIP: u32 = 1000;

/// A message key derived from the chain.
///
/// Used for a single message encryption/decryption and then discarded.
pub struct MessageKey {
    key: [u8; KEY_SIZE],
    index: u32,
}

impl MessageKey {
    /// 32-byte message key.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Chain index this key was derived at.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Chain key with its position in the chain.
///
/// Each [`advance()`](Self::advance) call:
/// 1. Derives the message key for the current index
/// 2. Derives the next chain key
/// 3. Overwrites the old chain key
/// 4. Increments the index
///
/// # Invariants
///
/// - `index` never decreases
/// - The key at `index` cannot be derived from any later key
pub struct ChainKey {
    key: [u8; KEY_SIZE],
    index: u32,
}

impl ChainKey {
    /// Start (or resume) a chain at `index`.
    pub fn new(key: [u8; KEY_SIZE], index: u32) -> Self {
        Self { key, index }
    }

    /// Current chain key.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Index of the next message key this chain will produce.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Advance one step and return the message key for the current index.
    pub fn advance(&mut self) -> Result<MessageKey, CryptoError> {
        if self.index == u32::MAX {
            return Err(CryptoError::ChainIndexOverflow { current: self.index });
        }

        let step = kdf_chain_key(&self.key);

        self.key.zeroize();
        self.key = step.next_chain_key;

        let current = self.index;
        self.index += 1;

        Ok(MessageKey { key: step.message_key, index: current })
    }

    /// Advance to `target`, returning the skipped keys and the key at
    /// `target`.
    ///
    /// Skipped keys (indices `index..target`) are returned so the caller can
    /// cache them for messages that arrive late.
    pub fn advance_to(
        &mut self,
        target: u32,
        max_skip: u32,
    ) -> Result<(Vec<MessageKey>, MessageKey), CryptoError> {
        if target < self.index {
            return Err(CryptoError::ChainTooFarBehind { current: self.index, requested: target });
        }

        let skip_count = target - self.index;
        if skip_count > max_skip {
            return Err(CryptoError::TooManySkippedKeys {
                current: self.index,
                requested: target,
                max_skip,
            });
        }

        let mut skipped = Vec::with_capacity(skip_count as usize);
        while self.index < target {
            skipped.push(self.advance()?);
        }

        let message_key = self.advance()?;
        Ok((skipped, message_key))
    }
}

impl Drop for ChainKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn new_chain_starts_at_given_index() {
        assert_eq!(ChainKey::new(test_key(), 0).index(), 0);
        assert_eq!(ChainKey::new(test_key(), 42).index(), 42);
    }

    #[test]
    fn advance_increments_index() {
        let mut chain = ChainKey::new(test_key(), 0);

        let key0 = chain.advance().unwrap();
        assert_eq!(key0.index(), 0);
        assert_eq!(chain.index(), 1);

        let key1 = chain.advance().unwrap();
        assert_eq!(key1.index(), 1);
        assert_eq!(chain.index(), 2);
    }

    #[test]
    fn advance_replaces_chain_key() {
        let mut chain = ChainKey::new(test_key(), 0);
        chain.advance().unwrap();
        assert_ne!(chain.key(), &test_key());
    }

    #[test]
    fn advance_produces_unique_keys() {
        let mut chain = ChainKey::new(test_key(), 0);

        let key0 = chain.advance().unwrap();
        let key1 = chain.advance().unwrap();
        let key2 = chain.advance().unwrap();

        assert_ne!(key0.key(), key1.key(), "keys must be unique");
        assert_ne!(key1.key(), key2.key(), "keys must be unique");
        assert_ne!(key0.key(), key2.key(), "keys must be unique");
    }

    #[test]
    fn resumed_chain_matches_original() {
        let mut original = ChainKey::new(test_key(), 0);
        original.advance().unwrap();
        original.advance().unwrap();

        let mut resumed = ChainKey::new(*original.key(), original.index());

        let a = original.advance().unwrap();
        let b = resumed.advance().unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.index(), b.index());
    }

    #[test]
    fn advance_to_current_index() {
        let mut chain = ChainKey::new(test_key(), 0);

        let (skipped, key) = chain.advance_to(0, DEFAULT_MAX_SKIP).unwrap();
        assert!(skipped.is_empty());
        assert_eq!(key.index(), 0);
        assert_eq!(chain.index(), 1);
    }

    #[test]
    fn advance_to_returns_skipped_keys() {
        let mut chain = ChainKey::new(test_key(), 0);

        let (skipped, key) = chain.advance_to(5, DEFAULT_MAX_SKIP).unwrap();
        assert_eq!(skipped.len(), 5);
        assert_eq!(skipped.iter().map(MessageKey::index).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(key.index(), 5);
        assert_eq!(chain.index(), 6);
    }

    #[test]
    fn advance_to_matches_sequential_advance() {
        let mut sequential = ChainKey::new(test_key(), 0);
        for _ in 0..5 {
            sequential.advance().unwrap();
        }
        let key_sequential = sequential.advance().unwrap();

        let mut skipping = ChainKey::new(test_key(), 0);
        let (_, key_skip) = skipping.advance_to(5, DEFAULT_MAX_SKIP).unwrap();

        assert_eq!(key_sequential.key(), key_skip.key(), "skip and sequential must match");
    }

    #[test]
    fn advance_to_rejects_past_index() {
        let mut chain = ChainKey::new(test_key(), 0);
        chain.advance_to(5, DEFAULT_MAX_SKIP).unwrap();

        match chain.advance_to(3, DEFAULT_MAX_SKIP) {
            Err(CryptoError::ChainTooFarBehind { current, requested }) => {
                assert_eq!(current, 6);
                assert_eq!(requested, 3);
            },
            _ => unreachable!("expected ChainTooFarBehind error"),
        }
    }

    #[test]
    fn advance_to_rejects_too_far_ahead() {
        let mut chain = ChainKey::new(test_key(), 0);

        let result = chain.advance_to(DEFAULT_MAX_SKIP + 100, DEFAULT_MAX_SKIP);
        assert!(matches!(result, Err(CryptoError::TooManySkippedKeys { .. })));
        assert_eq!(chain.index(), 0, "failed skip must not move the chain");
    }

    #[test]
    fn advance_at_max_index_overflows() {
        let mut chain = ChainKey::new(test_key(), u32::MAX);
        assert_eq!(
            chain.advance().err(),
            Some(CryptoError::ChainIndexOverflow { current: u32::MAX })
        );
    }
}
