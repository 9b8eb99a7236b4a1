//! Clock and seed context shared by AutoFarm services.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The central interface for reading time.
///
/// Lifecycle timestamps and tick completion times all come from here, so a
/// test can swap in a virtual clock and get reproducible descriptors.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - system clock
/// - **Simulation**: `SimContext` (autofarm_sim) - manually advanced clock
pub trait FarmContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for descriptor and tick timestamps.
    fn system_time(&self) -> SystemTime;

    /// Returns the context's seed; the registry derives simulation ids from it.
    ///
    /// In production this is whatever the operator configured, 0 if unset
    /// (random ids).
    fn seed(&self) -> u64;

    /// Wall-clock time as milliseconds since the Unix epoch.
    fn timestamp_ms(&self) -> u64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
