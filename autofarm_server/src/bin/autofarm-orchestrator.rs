//! AutoFarm Orchestrator
//!
//! Serves the lifecycle API and the per-simulation result streams, and
//! drives every running simulation against a worker node.

use autofarm_core::{
    MemoryStore, OrchestratorConfig, PersistPolicy, SimulationRegistry, SimulationStore, SledStore,
};
use autofarm_env::TokioContext;
use autofarm_server::{init_tracing, orchestrator, shutdown_signal, WsWorkerConnector};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "autofarm-orchestrator")]
#[command(about = "AutoFarm simulation orchestrator", long_about = None)]
struct Args {
    /// HTTP listen address
    #[arg(long, env = "ORCHESTRATOR_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: String,

    /// Worker node base address
    #[arg(long, env = "WORKER_ADDR", default_value = "ws://127.0.0.1:8081")]
    worker_addr: String,

    /// sled database directory; in-memory store when unset
    #[arg(long, env = "STORE_PATH")]
    store_path: Option<String>,

    /// Tick persistence policy (inline, detached)
    #[arg(long, default_value = "inline")]
    persist_policy: PersistPolicy,

    /// Upper bound on one persistence write, in milliseconds
    #[arg(long, default_value = "2000")]
    persist_timeout_ms: u64,

    /// Per-subscriber buffer, in ticks
    #[arg(long, default_value = "64")]
    subscriber_capacity: usize,

    /// Id seed (0 = random v4 ids)
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    info!("AutoFarm Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn SimulationStore> = match &args.store_path {
        Some(path) => {
            info!("persisting to sled at {}", path);
            Arc::new(SledStore::open(path)?)
        }
        None => {
            warn!("STORE_PATH not set, simulations are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let config = OrchestratorConfig {
        subscriber_capacity: args.subscriber_capacity,
        persist_timeout: Duration::from_millis(args.persist_timeout_ms),
        persist_policy: args.persist_policy,
        ..OrchestratorConfig::default()
    };
    let connector = Arc::new(WsWorkerConnector::new(args.worker_addr.as_str()));
    info!("worker at {}, persist policy {}", args.worker_addr, config.persist_policy);

    let registry = SimulationRegistry::new(
        Arc::new(TokioContext::with_seed(args.seed)),
        connector,
        store,
        config,
    );

    let listener = tokio::net::TcpListener::bind(&args.http_addr).await?;
    info!("orchestrator listening on http://{}", listener.local_addr()?);
    axum::serve(listener, orchestrator::router(registry.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    info!("orchestrator stopped");
    Ok(())
}
