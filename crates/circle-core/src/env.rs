//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (wall clock, randomness).
//! Production code uses [`SystemEnv`]; tests plug in a seeded RNG and a fixed
//! clock so every key, nonce and message id is reproducible.

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Milliseconds since the Unix epoch, used for message timestamps.
    fn wall_clock_millis(&self) -> i64;

    /// Random fixed-size array (key seeds, nonces).
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }

    /// Generates a random `u32`.
    fn random_u32(&self) -> u32 {
        u32::from_be_bytes(self.random_array())
    }
}

/// Production environment using the system clock and OS RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A device without working randomness cannot
/// generate keys or nonces safely, so there is nothing sensible to fall back
/// to.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - keys cannot be generated");
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_millis(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
    }
}
