//! Explicit run context handed to every component that needs randomness or threads.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Library-wide settings for a single workflow run.
///
/// There is no process-wide instance; callers build one and pass it to
/// `fit`, the data splitters and the batch predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlContext {
    /// Base seed for every random stream derived from this context.
    pub seed: u64,
    /// Worker threads used by parallel prediction.
    pub threads: usize,
}

impl MlContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            threads: default_threads(),
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Deterministic RNG for an independent stream (one per tree, split, ...).
    pub fn rng(&self, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

impl Default for MlContext {
    fn default() -> Self {
        Self::new(0)
    }
}

pub(crate) fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
