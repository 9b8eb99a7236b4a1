//! Relay of one simulation's tick stream onto an external duplex connection.
//!
//! # Tasks
//!
//! ```text
//!               ┌──────────── inbound task ─────────────┐
//!  peer ──────► │ drain frames, each one resets the      │
//!               │ read deadline; Close/EOF/silence: exit │
//!               └────────────────────────────────────────┘
//!               ┌──────────── outbound task ────────────┐
//!  peer ◄────── │ sole owner of the sink:                │ ◄── TickStream
//!               │ tick -> Text(json), probe -> Ping      │
//!               │ every write bounded by write deadline  │
//!               └────────────────────────────────────────┘
//! ```
//!
//! The bridge returns as soon as either task ends or the caller's shutdown
//! future resolves, and tears down the other task on the way out. The
//! upstream subscription is owned by the outbound task, so it is released
//! on every exit path.

use crate::config::BridgeConfig;

use autofarm_env::{EnvError, SimulationId, TickSource, TickStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::future::Future;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Transport-neutral view of an observer connection frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

/// Why a bridge session ended.
#[derive(Debug, Error)]
pub enum BridgeExit {
    /// The observer closed the connection
    #[error("observer closed the connection")]
    PeerClosed,

    /// Nothing arrived from the observer within the read deadline
    #[error("observer read deadline expired")]
    PeerTimedOut,

    /// The observer's side of the connection errored
    #[error("observer connection error: {0}")]
    PeerError(String),

    /// The tick source closed the stream
    #[error("tick stream ended")]
    UpstreamEnded,

    /// The tick stream broke
    #[error("tick stream failed: {0}")]
    UpstreamFailed(EnvError),

    /// Writing to the observer failed
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A write did not finish within the write deadline
    #[error("write deadline expired")]
    WriteTimedOut,

    /// The tick stream could not be opened
    #[error("could not open tick stream: {0}")]
    OpenFailed(EnvError),

    /// The owning request went away
    #[error("cancelled")]
    Cancelled,

    /// One of the bridge tasks panicked or was aborted
    #[error("bridge task failed: {0}")]
    TaskFailed(String),
}

/// Bridges a [`TickSource`] onto observer connections.
#[derive(Debug, Clone, Default)]
pub struct ProtocolBridge {
    config: BridgeConfig,
}

impl ProtocolBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Serves one observer connection until it ends.
    ///
    /// `sink` and `stream` are the two halves of an already upgraded
    /// connection. `shutdown` resolves when the owning request is cancelled.
    pub async fn run<S, Tx, Rx, E, F>(
        &self,
        simulation_id: SimulationId,
        source: &S,
        mut sink: Tx,
        stream: Rx,
        shutdown: F,
    ) -> BridgeExit
    where
        S: TickSource + ?Sized,
        Tx: Sink<ObserverFrame> + Unpin + Send + 'static,
        Tx::Error: Display,
        Rx: Stream<Item = Result<ObserverFrame, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let config = self.config.clone();
        let mut inbound = tokio::spawn(drain_inbound(stream, config.read_deadline));

        let opening = tokio::select! {
            biased;
            _ = &mut shutdown => Opening::Cancelled,
            joined = &mut inbound => Opening::PeerGone(flatten(joined)),
            opened = source.open(simulation_id) => match opened {
                Ok(upstream) => Opening::Ready(upstream),
                Err(e) => Opening::Failed(e),
            },
        };
        let upstream = match opening {
            Opening::Ready(upstream) => upstream,
            Opening::PeerGone(exit) => {
                info!("simulation {}: observer left before stream opened: {}", simulation_id, exit);
                return exit;
            }
            Opening::Failed(e) => {
                return abandon(simulation_id, inbound, &mut sink, &config, BridgeExit::OpenFailed(e)).await
            }
            Opening::Cancelled => {
                return abandon(simulation_id, inbound, &mut sink, &config, BridgeExit::Cancelled).await
            }
        };
        info!("simulation {}: observer bridge open", simulation_id);

        let (stop, stopped) = oneshot::channel();
        let mut outbound = tokio::spawn(relay_outbound(sink, upstream, stopped, config.clone()));

        let exit = tokio::select! {
            joined = &mut inbound => {
                // The peer is gone; a Close frame would have nowhere to go.
                outbound.abort();
                let _ = outbound.await;
                flatten(joined)
            }
            joined = &mut outbound => {
                inbound.abort();
                let _ = inbound.await;
                flatten(joined)
            }
            _ = &mut shutdown => {
                inbound.abort();
                let _ = inbound.await;
                let _ = stop.send(());
                if timeout(config.write_deadline, &mut outbound).await.is_err() {
                    outbound.abort();
                    let _ = outbound.await;
                }
                BridgeExit::Cancelled
            }
        };

        info!("simulation {}: observer bridge closed: {}", simulation_id, exit);
        exit
    }
}

enum Opening {
    Ready(Box<dyn TickStream>),
    Failed(EnvError),
    Cancelled,
    PeerGone(BridgeExit),
}

/// Ends a session that never got a stream: stop reading, say goodbye.
async fn abandon<Tx>(
    simulation_id: SimulationId,
    inbound: JoinHandle<BridgeExit>,
    sink: &mut Tx,
    config: &BridgeConfig,
    exit: BridgeExit,
) -> BridgeExit
where
    Tx: Sink<ObserverFrame> + Unpin,
    Tx::Error: Display,
{
    inbound.abort();
    let _ = inbound.await;
    let _ = write_frame(sink, ObserverFrame::Close, config.write_deadline).await;
    info!("simulation {}: observer bridge not opened: {}", simulation_id, exit);
    exit
}

fn flatten(joined: Result<BridgeExit, JoinError>) -> BridgeExit {
    joined.unwrap_or_else(|e| BridgeExit::TaskFailed(e.to_string()))
}

/// Reads and discards inbound frames, watching for disconnects.
async fn drain_inbound<Rx, E>(mut stream: Rx, read_deadline: std::time::Duration) -> BridgeExit
where
    Rx: Stream<Item = Result<ObserverFrame, E>> + Unpin,
    E: Display,
{
    loop {
        match timeout(read_deadline, stream.next()).await {
            Err(_) => return BridgeExit::PeerTimedOut,
            Ok(None) | Ok(Some(Ok(ObserverFrame::Close))) => return BridgeExit::PeerClosed,
            Ok(Some(Err(e))) => return BridgeExit::PeerError(e.to_string()),
            Ok(Some(Ok(frame))) => debug!("observer frame ignored: {:?}", frame_kind(&frame)),
        }
    }
}

fn frame_kind(frame: &ObserverFrame) -> &'static str {
    match frame {
        ObserverFrame::Text(_) => "text",
        ObserverFrame::Binary(_) => "binary",
        ObserverFrame::Ping => "ping",
        ObserverFrame::Pong => "pong",
        ObserverFrame::Close => "close",
    }
}

/// Sole writer: relays ticks and interleaves liveness probes.
async fn relay_outbound<Tx>(
    mut sink: Tx,
    mut upstream: Box<dyn TickStream>,
    mut stop: oneshot::Receiver<()>,
    config: BridgeConfig,
) -> BridgeExit
where
    Tx: Sink<ObserverFrame> + Unpin,
    Tx::Error: Display,
{
    let mut probe = tokio::time::interval_at(
        Instant::now() + config.probe_interval,
        config.probe_interval,
    );
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut stop => {
                let _ = write_frame(&mut sink, ObserverFrame::Close, config.write_deadline).await;
                return BridgeExit::Cancelled;
            }
            _ = probe.tick() => ObserverFrame::Ping,
            next = upstream.next_tick() => match next {
                Ok(Some(tick)) => match serde_json::to_string(tick.as_ref()) {
                    Ok(text) => ObserverFrame::Text(text),
                    Err(e) => {
                        warn!("Skipping tick {} that failed to encode: {}", tick.tick, e);
                        continue;
                    }
                },
                Ok(None) => {
                    let _ = write_frame(&mut sink, ObserverFrame::Close, config.write_deadline).await;
                    return BridgeExit::UpstreamEnded;
                }
                Err(e) => {
                    let _ = write_frame(&mut sink, ObserverFrame::Close, config.write_deadline).await;
                    return BridgeExit::UpstreamFailed(e);
                }
            },
        };

        if let Err(exit) = write_frame(&mut sink, frame, config.write_deadline).await {
            return exit;
        }
    }
}

async fn write_frame<Tx>(
    sink: &mut Tx,
    frame: ObserverFrame,
    deadline: std::time::Duration,
) -> Result<(), BridgeExit>
where
    Tx: Sink<ObserverFrame> + Unpin,
    Tx::Error: Display,
{
    match timeout(deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BridgeExit::WriteFailed(e.to_string())),
        Err(_) => Err(BridgeExit::WriteTimedOut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use autofarm_env::AggregatedTick;
    use futures::channel::mpsc;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::sync::mpsc as tokio_mpsc;

    type PeerFrames = mpsc::Sender<Result<ObserverFrame, Infallible>>;

    /// Hands out a single prepared stream, then reports NotFound.
    struct ScriptedSource {
        stream: Mutex<Option<tokio_mpsc::Receiver<Arc<AggregatedTick>>>>,
    }

    struct ChannelStream(tokio_mpsc::Receiver<Arc<AggregatedTick>>);

    #[async_trait]
    impl TickStream for ChannelStream {
        async fn next_tick(&mut self) -> Result<Option<Arc<AggregatedTick>>, EnvError> {
            Ok(self.0.recv().await)
        }
    }

    #[async_trait]
    impl TickSource for ScriptedSource {
        async fn open(&self, id: SimulationId) -> Result<Box<dyn TickStream>, EnvError> {
            match self.stream.lock().unwrap().take() {
                Some(rx) => Ok(Box::new(ChannelStream(rx))),
                None => Err(EnvError::not_found(id)),
            }
        }
    }

    /// Sink whose writes never complete.
    struct StuckSink;

    impl Sink<ObserverFrame> for StuckSink {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: ObserverFrame) -> Result<(), Infallible> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }
    }

    fn source() -> (Arc<ScriptedSource>, tokio_mpsc::Sender<Arc<AggregatedTick>>) {
        let (tx, rx) = tokio_mpsc::channel(16);
        let source = Arc::new(ScriptedSource {
            stream: Mutex::new(Some(rx)),
        });
        (source, tx)
    }

    fn tick(n: u64) -> Arc<AggregatedTick> {
        Arc::new(AggregatedTick {
            simulation_id: SimulationId::from_seed(1),
            tick: n,
            entities: Vec::new(),
            avg_compute_ms: 0.25,
            worker_count: 1,
            completed_at_ms: 1_000 + n,
        })
    }

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            probe_interval: Duration::from_secs(30),
            write_deadline: Duration::from_millis(50),
            read_deadline: Duration::from_secs(5),
        }
    }

    fn connection() -> (
        PeerFrames,
        mpsc::Receiver<Result<ObserverFrame, Infallible>>,
        mpsc::Sender<ObserverFrame>,
        mpsc::Receiver<ObserverFrame>,
    ) {
        let (peer_tx, inbound) = mpsc::channel(16);
        let (outbound, observed) = mpsc::channel(16);
        (peer_tx, inbound, outbound, observed)
    }

    fn spawn_bridge(
        config: BridgeConfig,
        source: Arc<ScriptedSource>,
        sink: mpsc::Sender<ObserverFrame>,
        inbound: mpsc::Receiver<Result<ObserverFrame, Infallible>>,
    ) -> (tokio::task::JoinHandle<BridgeExit>, oneshot::Sender<()>) {
        let (cancel, cancelled) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            ProtocolBridge::new(config)
                .run(SimulationId::from_seed(1), source.as_ref(), sink, inbound, async {
                    let _ = cancelled.await;
                })
                .await
        });
        (task, cancel)
    }

    #[tokio::test]
    async fn test_relays_ticks_as_json_text() {
        let (source, ticks) = source();
        let (peer_tx, inbound, sink, mut observed) = connection();
        let (task, _cancel) = spawn_bridge(fast_config(), source, sink, inbound);

        for n in 1..=3 {
            ticks.send(tick(n)).await.unwrap();
        }
        for n in 1..=3 {
            match observed.next().await.unwrap() {
                ObserverFrame::Text(text) => {
                    let relayed: AggregatedTick = serde_json::from_str(&text).unwrap();
                    assert_eq!(relayed.tick, n);
                    assert_eq!(relayed.worker_count, 1);
                }
                other => panic!("unexpected frame {:?}", other),
            }
        }

        drop(peer_tx);
        assert!(matches!(task.await.unwrap(), BridgeExit::PeerClosed));
        // The subscription went with the outbound task.
        assert!(ticks.is_closed());
    }

    #[tokio::test]
    async fn test_open_failure_closes_connection() {
        let (source, _ticks) = source();
        source.stream.lock().unwrap().take();
        let (_peer_tx, inbound, sink, mut observed) = connection();
        let (task, _cancel) = spawn_bridge(fast_config(), source, sink, inbound);

        let exit = task.await.unwrap();
        assert!(matches!(exit, BridgeExit::OpenFailed(EnvError::NotFound(_))));
        assert_eq!(observed.next().await, Some(ObserverFrame::Close));
    }

    #[test]
    fn test_exit_reasons_render_for_logs() {
        let exit = BridgeExit::OpenFailed(EnvError::not_found("farm"));
        assert_eq!(exit.to_string(), "could not open tick stream: Simulation not found: farm");
        assert_eq!(BridgeExit::WriteTimedOut.to_string(), "write deadline expired");
        assert_eq!(
            BridgeExit::PeerError("reset".into()).to_string(),
            "observer connection error: reset"
        );
    }

    #[tokio::test]
    async fn test_probes_are_sent_while_idle() {
        let (source, _ticks) = source();
        let (_peer_tx, inbound, sink, mut observed) = connection();
        let config = BridgeConfig {
            probe_interval: Duration::from_millis(20),
            ..fast_config()
        };
        let (task, cancel) = spawn_bridge(config, source, sink, inbound);

        for _ in 0..3 {
            assert_eq!(observed.next().await, Some(ObserverFrame::Ping));
        }
        cancel.send(()).unwrap();
        assert!(matches!(task.await.unwrap(), BridgeExit::Cancelled));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_and_inbound_frames_extend_deadline() {
        let (source, ticks) = source();
        let (mut peer_tx, inbound, sink, _observed) = connection();
        let config = BridgeConfig {
            read_deadline: Duration::from_millis(60),
            ..fast_config()
        };
        let (task, _cancel) = spawn_bridge(config, source, sink, inbound);

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            peer_tx.send(Ok(ObserverFrame::Pong)).await.unwrap();
        }
        assert!(!task.is_finished());

        let exit = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(matches!(exit, BridgeExit::PeerTimedOut));
        assert!(ticks.is_closed());
    }

    #[tokio::test]
    async fn test_stuck_write_breaches_deadline() {
        let (source, ticks) = source();
        let (_peer_tx, inbound) = mpsc::channel::<Result<ObserverFrame, Infallible>>(1);
        let task = tokio::spawn(async move {
            ProtocolBridge::new(fast_config())
                .run(
                    SimulationId::from_seed(1),
                    source.as_ref(),
                    StuckSink,
                    inbound,
                    futures::future::pending::<()>(),
                )
                .await
        });

        ticks.send(tick(1)).await.unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(matches!(exit, BridgeExit::WriteTimedOut));
    }

    #[tokio::test]
    async fn test_upstream_end_closes_connection() {
        let (source, ticks) = source();
        let (_peer_tx, inbound, sink, mut observed) = connection();
        let (task, _cancel) = spawn_bridge(fast_config(), source, sink, inbound);

        ticks.send(tick(1)).await.unwrap();
        drop(ticks);

        assert!(matches!(observed.next().await, Some(ObserverFrame::Text(_))));
        assert_eq!(observed.next().await, Some(ObserverFrame::Close));
        assert!(matches!(task.await.unwrap(), BridgeExit::UpstreamEnded));
    }

    #[tokio::test]
    async fn test_cancellation_sends_close() {
        let (source, _ticks) = source();
        let (_peer_tx, inbound, sink, mut observed) = connection();
        let (task, cancel) = spawn_bridge(fast_config(), source, sink, inbound);

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.send(()).unwrap();
        assert!(matches!(task.await.unwrap(), BridgeExit::Cancelled));
        assert_eq!(observed.next().await, Some(ObserverFrame::Close));
    }
}
