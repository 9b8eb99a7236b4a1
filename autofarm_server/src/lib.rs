//! AutoFarm Processes
//!
//! The three networked processes of a farm, each an axum router that the
//! binaries serve and the end-to-end tests bind to ephemeral ports:
//!
//! ```text
//!            HTTP lifecycle                 WS /worker
//! client ─────────────────► orchestrator ─────────────► node
//!                               │ WS /streams/simulations/{id}
//!                               ▼
//! observer ◄──── WS /ws/simulations/{id} ──── gateway
//! ```
//!
//! [`ws_worker`] and [`ws_ticks`] are the WebSocket implementations of the
//! worker exchange and the result stream.

pub mod frames;
pub mod gateway;
pub mod node;
pub mod orchestrator;
pub mod ws_ticks;
pub mod ws_worker;

pub use gateway::GatewayState;
pub use orchestrator::ApiError;
pub use ws_ticks::WsTickSource;
pub use ws_worker::WsWorkerConnector;

use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Seed 0 means "pick one from the clock".
pub fn resolve_seed(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
        .max(1)
}
