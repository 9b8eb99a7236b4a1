//! In-process worker transport with fault injection.

use async_trait::async_trait;
use autofarm_core::WorkerNode;
use autofarm_env::{EnvError, StepRequest, StepResponse, WorkerConnector, WorkerExchange};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Shared fault and accounting state behind a [`LocalWorker`].
#[derive(Default)]
struct Faults {
    /// Fixed delay before each response, in milliseconds
    latency_ms: AtomicU64,

    /// Extra random delay up to this many milliseconds
    jitter_ms: AtomicU64,

    /// Steps served before every exchange starts failing (0 = never)
    fail_after_steps: AtomicU64,

    /// Reject new connections
    refuse_connections: AtomicBool,

    connections: AtomicU64,
    steps: AtomicU64,
    open_exchanges: AtomicUsize,
    max_open_exchanges: AtomicUsize,
}

/// Fault-injection and inspection handle for a [`LocalWorker`].
#[derive(Clone)]
pub struct LocalWorkerController {
    faults: Arc<Faults>,
}

impl LocalWorkerController {
    /// Sets a fixed response delay.
    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sets the upper bound of the random extra delay.
    pub fn set_jitter(&self, jitter: Duration) {
        self.faults
            .jitter_ms
            .store(jitter.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes every exchange fail once `steps` steps have been served in total.
    pub fn fail_after_steps(&self, steps: u64) {
        self.faults.fail_after_steps.store(steps, Ordering::SeqCst);
    }

    /// Rejects (or accepts again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.faults.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Clears every injected fault.
    pub fn heal(&self) {
        self.faults.latency_ms.store(0, Ordering::SeqCst);
        self.faults.jitter_ms.store(0, Ordering::SeqCst);
        self.faults.fail_after_steps.store(0, Ordering::SeqCst);
        self.faults.refuse_connections.store(false, Ordering::SeqCst);
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> u64 {
        self.faults.connections.load(Ordering::SeqCst)
    }

    /// Steps served so far.
    pub fn steps(&self) -> u64 {
        self.faults.steps.load(Ordering::SeqCst)
    }

    /// Exchanges currently open.
    pub fn open_exchanges(&self) -> usize {
        self.faults.open_exchanges.load(Ordering::SeqCst)
    }

    /// Highest number of exchanges ever open at once.
    pub fn max_open_exchanges(&self) -> usize {
        self.faults.max_open_exchanges.load(Ordering::SeqCst)
    }
}

/// Worker connector that serves steps from an in-process [`WorkerNode`].
pub struct LocalWorker {
    node: Arc<WorkerNode>,
    faults: Arc<Faults>,
    jitter: Arc<Mutex<ChaCha8Rng>>,
}

impl LocalWorker {
    /// Creates a worker and its controller.
    ///
    /// Jitter is drawn from an RNG seeded with the node's seed.
    pub fn new(node: Arc<WorkerNode>) -> (Self, LocalWorkerController) {
        let faults = Arc::new(Faults::default());
        let jitter = Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(node.seed())));
        let controller = LocalWorkerController {
            faults: Arc::clone(&faults),
        };
        (Self { node, faults, jitter }, controller)
    }

    pub fn node(&self) -> &Arc<WorkerNode> {
        &self.node
    }
}

#[async_trait]
impl WorkerConnector for LocalWorker {
    async fn connect(&self) -> Result<Box<dyn WorkerExchange>, EnvError> {
        if self.faults.refuse_connections.load(Ordering::SeqCst) {
            return Err(EnvError::network("connection refused (injected)"));
        }

        self.faults.connections.fetch_add(1, Ordering::SeqCst);
        let open = self.faults.open_exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        self.faults.max_open_exchanges.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(LocalExchange {
            node: Arc::clone(&self.node),
            faults: Arc::clone(&self.faults),
            jitter: Arc::clone(&self.jitter),
            pending: None,
        }))
    }

    fn address(&self) -> String {
        "local".to_string()
    }
}

struct LocalExchange {
    node: Arc<WorkerNode>,
    faults: Arc<Faults>,
    jitter: Arc<Mutex<ChaCha8Rng>>,
    pending: Option<StepRequest>,
}

impl LocalExchange {
    fn delay(&self) -> Duration {
        let latency = self.faults.latency_ms.load(Ordering::SeqCst);
        let jitter = self.faults.jitter_ms.load(Ordering::SeqCst);
        let extra = if jitter > 0 {
            self.jitter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_range(0..=jitter)
        } else {
            0
        };
        Duration::from_millis(latency + extra)
    }
}

#[async_trait]
impl WorkerExchange for LocalExchange {
    async fn send(&mut self, request: StepRequest) -> Result<(), EnvError> {
        let limit = self.faults.fail_after_steps.load(Ordering::SeqCst);
        if limit > 0 && self.faults.steps.load(Ordering::SeqCst) >= limit {
            return Err(EnvError::network("worker crashed (injected)"));
        }
        self.pending = Some(request);
        Ok(())
    }

    async fn recv(&mut self) -> Result<StepResponse, EnvError> {
        let request = self
            .pending
            .take()
            .ok_or_else(|| EnvError::closed("no request in flight"))?;

        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.faults.steps.fetch_add(1, Ordering::SeqCst);
        Ok(self.node.step(&request))
    }
}

impl Drop for LocalExchange {
    fn drop(&mut self) {
        self.faults.open_exchanges.fetch_sub(1, Ordering::SeqCst);
    }
}
