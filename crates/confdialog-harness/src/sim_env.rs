//! [`Environment`] for simulations: Turmoil's clock and a seeded ChaCha20 stream.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use confdialog_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Environment whose time and randomness are both reproducible.
///
/// - **Virtual Time**: `now()` reads tokio's clock, which Turmoil drives;
///   `sleep()` advances it instantly inside a simulation.
/// - **Seeded RNG**: every key pair, session key and IV comes from one
///   ChaCha20 stream, so a seed replays a session byte for byte.
///
/// The default seed is 0. Use [`SimEnv::with_seed`] to explore other key
/// material while staying reproducible.
#[derive(Clone)]
pub struct SimEnv {
    /// Shared across clones so the sequence is not forked.
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Seed 0
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment whose ChaCha20 stream starts from `seed`
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        self.rng
            .lock()
            .unwrap_or_else(|e| {
                // Turmoil is single threaded; poisoning needs a panic while
                // the lock is held on another thread.
                unreachable!("simulation RNG lock poisoned: {e}")
            })
            .fill_bytes(dest);
    }
}
