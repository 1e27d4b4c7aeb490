//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations to test the
//! persist-before-release path of the coordinator and the pairwise manager.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use super::{Storage, StorageError};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but randomly fails
/// operations based on a configured failure rate. The rate can be changed at
/// runtime so a test can break storage mid-conversation and then heal it.
/// All mutable state sits behind Arc<Mutex<>>, so clones share the same dice.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: Arc<Mutex<f64>>,
    /// Only `set` and `delete` fail when true
    writes_only: bool,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<Mutex<usize>>,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator so chaos tests are reproducible with the
/// same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate: Arc::new(Mutex::new(failure_rate)),
            writes_only: false,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Restrict fault injection to `set` and `delete`.
    #[must_use]
    pub fn writes_only(mut self) -> Self {
        self.writes_only = true;
        self
    }

    /// Change the failure rate for this wrapper and all its clones.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn set_failure_rate(&self, failure_rate: f64) {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        #[allow(clippy::expect_used)]
        let mut rate = self.failure_rate.lock().expect("failure_rate mutex poisoned");
        *rate = failure_rate;
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    fn increment_operation_count(&self) {
        #[allow(clippy::expect_used)]
        let mut count = self.operation_count.lock().expect("operation_count mutex poisoned");
        *count += 1;
    }

    /// Roll the dice for one operation. Reads are spared in writes-only mode.
    fn inject(&self, is_write: bool) -> Result<(), StorageError> {
        self.increment_operation_count();
        if self.writes_only && !is_write {
            return Ok(());
        }

        #[allow(clippy::expect_used)]
        let rate = *self.failure_rate.lock().expect("failure_rate mutex poisoned");
        #[allow(clippy::expect_used)]
        let fail = self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(rate);

        if fail {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inject(false)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.inject(true)?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inject(true)?;
        self.inner.delete(key).await
    }
}
