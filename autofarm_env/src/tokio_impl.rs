//! Production implementation of FarmContext.

use crate::FarmContext;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by the system clock.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Operator seed; a non-zero value makes simulation ids reproducible
    seed: u64,
}

impl TokioContext {
    /// Creates a new unseeded TokioContext.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Creates a context carrying an operator-chosen seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            start: Instant::now(),
            seed,
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FarmContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
