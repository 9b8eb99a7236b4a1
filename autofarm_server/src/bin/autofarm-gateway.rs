//! AutoFarm Gateway
//!
//! Relays orchestrator result streams to external WebSocket observers.

use autofarm_core::{BridgeConfig, ProtocolBridge};
use autofarm_server::{gateway, init_tracing, shutdown_signal, GatewayState, WsTickSource};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "autofarm-gateway")]
#[command(about = "AutoFarm observer gateway", long_about = None)]
struct Args {
    /// HTTP listen address
    #[arg(long, env = "GATEWAY_HTTP_ADDR", default_value = "0.0.0.0:8082")]
    http_addr: String,

    /// Orchestrator base address
    #[arg(long, env = "ORCHESTRATOR_URL", default_value = "ws://127.0.0.1:8080")]
    orchestrator_url: String,

    /// Liveness probe period in seconds
    #[arg(long, default_value = "30")]
    probe_secs: u64,

    /// Write deadline in seconds
    #[arg(long, default_value = "10")]
    write_deadline_secs: u64,

    /// Read deadline in seconds
    #[arg(long, default_value = "60")]
    read_deadline_secs: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    info!("AutoFarm Gateway v{}", env!("CARGO_PKG_VERSION"));

    let bridge = ProtocolBridge::new(BridgeConfig {
        probe_interval: Duration::from_secs(args.probe_secs),
        write_deadline: Duration::from_secs(args.write_deadline_secs),
        read_deadline: Duration::from_secs(args.read_deadline_secs),
    });
    let (stop_tx, stop_rx) = watch::channel(false);
    let state = GatewayState {
        source: Arc::new(WsTickSource::new(args.orchestrator_url.as_str())),
        bridge,
        shutdown: stop_rx,
    };

    let listener = tokio::net::TcpListener::bind(&args.http_addr).await?;
    info!(
        "gateway listening on ws://{}/ws/simulations/{{id}}, upstream {}",
        listener.local_addr()?,
        args.orchestrator_url
    );
    axum::serve(listener, gateway::router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stop_tx.send(true);
        })
        .await?;
    Ok(())
}
