//! AutoFarm Worker Node
//!
//! Executes simulation steps for any orchestrator that connects to it.

use autofarm_core::WorkerNode;
use autofarm_server::{init_tracing, node, resolve_seed, shutdown_signal};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "autofarm-node")]
#[command(about = "AutoFarm worker node", long_about = None)]
struct Args {
    /// WebSocket listen address
    #[arg(long, env = "NODE_ADDR", default_value = "0.0.0.0:8081")]
    addr: String,

    /// Entity initialization seed (0 = random from time)
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

    let seed = resolve_seed(args.seed);
    info!("AutoFarm Node v{} (seed={})", env!("CARGO_PKG_VERSION"), seed);

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    info!("node listening on ws://{}/worker", listener.local_addr()?);
    axum::serve(listener, node::router(Arc::new(WorkerNode::new(seed))))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
