//! Asynchronous publisher for invalid transactions.
//!
//! [`InvalidTxPublisher`] owns the byte-budgeted queue, the sink list and one
//! worker thread. Validation threads call [`publish`](InvalidTxPublisher::publish),
//! which never blocks; the worker pops records in admission order and hands
//! each one to every sink. A failing or panicking sink is logged and skipped
//! for that record, nothing more.
//!
//! Lifecycle: `new` → `initialize` (once) → `publish`* → `stop`. Every
//! operation other than `stop` fails with `NotInitialized` before
//! `initialize`. `stop` is idempotent, a no-op before `initialize`, and also
//! runs on drop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::InvalidTxConfig;
use crate::error::PublisherError;
use crate::queue::{ByteBudgetQueue, PushOutcome};
use crate::record::InvalidTxRecord;
#[cfg(feature = "bus")]
use crate::sink::bus::{MessageBus, MessageBusSink};
use crate::sink::{FileSink, InvalidTxSink, SinkOutcome};

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "invalidtx-pub";

type SinkList = Arc<RwLock<Vec<Arc<dyn InvalidTxSink>>>>;

#[derive(Debug, Default)]
struct PublisherStats {
    queued: AtomicU64,
    degraded: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    sink_drops: AtomicU64,
    sink_failures: AtomicU64,
}

/// Snapshot of publisher activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublisherCounters {
    /// Records admitted to the queue (including degraded ones).
    pub queued: u64,
    /// Records degraded to fit the queue.
    pub degraded: u64,
    /// Records refused by the queue (over budget or closed).
    pub dropped: u64,
    /// Records the worker has handed to all sinks.
    pub processed: u64,
    /// Sink writes refused by a sink's own policy.
    pub sink_drops: u64,
    /// Sink writes that failed with an error or panic.
    pub sink_failures: u64,
}

/// Publishes invalid transaction records to the configured sinks.
pub struct InvalidTxPublisher {
    queue: OnceLock<Arc<ByteBudgetQueue<InvalidTxRecord>>>,
    sinks: SinkList,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<PublisherStats>,
    #[cfg(feature = "bus")]
    bus: Option<Arc<dyn MessageBus>>,
}

impl Default for InvalidTxPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidTxPublisher {
    /// An uninitialized publisher.
    pub fn new() -> Self {
        Self {
            queue: OnceLock::new(),
            sinks: Arc::new(RwLock::new(Vec::new())),
            worker: Mutex::new(None),
            stats: Arc::new(PublisherStats::default()),
            #[cfg(feature = "bus")]
            bus: None,
        }
    }

    /// Attach the message bus used by a configured bus sink.
    #[cfg(feature = "bus")]
    pub fn with_message_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Build the configured sinks and start the worker.
    ///
    /// Sinks are built before anything else; if one fails the publisher is
    /// left uninitialized. Calling this a second time is an error.
    pub fn initialize(&self, config: &InvalidTxConfig) -> Result<(), PublisherError> {
        let mut worker = self.worker.lock();
        if self.queue.get().is_some() {
            return Err(PublisherError::AlreadyInitialized);
        }

        let built = self.build_sinks(config)?;
        let sink_names: Vec<&'static str> = built.iter().map(|s| s.name()).collect();
        self.sinks.write().extend(built);

        let queue = Arc::new(ByteBudgetQueue::new(config.queue_max_bytes));
        if self.queue.set(Arc::clone(&queue)).is_err() {
            return Err(PublisherError::AlreadyInitialized);
        }

        let spawned = {
            let queue = Arc::clone(&queue);
            let sinks = Arc::clone(&self.sinks);
            let stats = Arc::clone(&self.stats);
            thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .spawn(move || run_worker(&queue, &sinks, &stats))
        };
        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                queue.close();
                return Err(PublisherError::WorkerSpawn(e));
            }
        }

        info!(
            sinks = ?sink_names,
            queue_max_bytes = config.queue_max_bytes,
            "invalidtx: publisher started"
        );
        Ok(())
    }

    fn build_sinks(
        &self,
        config: &InvalidTxConfig,
    ) -> Result<Vec<Arc<dyn InvalidTxSink>>, PublisherError> {
        let mut sinks: Vec<Arc<dyn InvalidTxSink>> = Vec::new();

        if let Some(file) = &config.file {
            sinks.push(Arc::new(FileSink::open(file)?));
        }

        if let Some(bus_config) = &config.bus {
            #[cfg(feature = "bus")]
            {
                let bus = self.bus.clone().ok_or(PublisherError::MissingMessageBus)?;
                sinks.push(Arc::new(MessageBusSink::new(bus, bus_config)));
            }
            #[cfg(not(feature = "bus"))]
            {
                let _ = bus_config;
                warn!("invalidtx: bus sink configured but built without bus support, skipping");
            }
        }

        Ok(sinks)
    }

    /// Queue a record for the sinks. Never blocks.
    ///
    /// Running out of queue budget is reported through the returned outcome
    /// and the counters. The only error is publishing before `initialize`.
    pub fn publish(&self, record: InvalidTxRecord) -> Result<PushOutcome, PublisherError> {
        let queue = self.queue.get().ok_or(PublisherError::NotInitialized)?;
        let txid = record.txid();
        let outcome = queue.try_push(record);
        match outcome {
            PushOutcome::Admitted => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::AdmittedDegraded => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                self.stats.degraded.fetch_add(1, Ordering::Relaxed);
                debug!(%txid, "invalidtx: queue full, record degraded");
            }
            PushOutcome::Dropped | PushOutcome::Closed => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(%txid, ?outcome, "invalidtx: record dropped");
            }
        }
        Ok(outcome)
    }

    /// Close the queue and wait for the worker to drain it and exit.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        if let Some(queue) = self.queue.get() {
            queue.close();
        }
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!("invalidtx: publisher worker panicked");
            }
            info!("invalidtx: publisher stopped");
        }
    }

    /// Add a sink at runtime. Takes effect from the next record.
    pub fn add_sink(&self, sink: Arc<dyn InvalidTxSink>) -> Result<(), PublisherError> {
        if !self.is_initialized() {
            return Err(PublisherError::NotInitialized);
        }
        debug!(sink = sink.name(), "invalidtx: sink added");
        self.sinks.write().push(sink);
        Ok(())
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_initialized(&self) -> bool {
        self.queue.get().is_some()
    }

    /// Ask every sink to delete what it has stored. Returns bytes released.
    pub fn clear_stored(&self) -> Result<u64, PublisherError> {
        if !self.is_initialized() {
            return Err(PublisherError::NotInitialized);
        }
        let sinks = self.sinks.read().clone();
        let freed = sinks
            .iter()
            .map(|sink| match sink.clear() {
                Ok(freed) => freed,
                Err(e) => {
                    warn!(sink = sink.name(), "invalidtx: clear failed: {e}");
                    0
                }
            })
            .sum();
        Ok(freed)
    }

    /// Accounted bytes waiting in the queue.
    pub fn queued_bytes(&self) -> usize {
        self.queue.get().map_or(0, |q| q.used_bytes())
    }

    pub fn counters(&self) -> PublisherCounters {
        let s = &self.stats;
        PublisherCounters {
            queued: s.queued.load(Ordering::Relaxed),
            degraded: s.degraded.load(Ordering::Relaxed),
            dropped: s.dropped.load(Ordering::Relaxed),
            processed: s.processed.load(Ordering::Relaxed),
            sink_drops: s.sink_drops.load(Ordering::Relaxed),
            sink_failures: s.sink_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for InvalidTxPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(queue: &ByteBudgetQueue<InvalidTxRecord>, sinks: &SinkList, stats: &PublisherStats) {
    debug!("invalidtx: publisher worker running");
    while let Some(record) = queue.pop() {
        let snapshot: Vec<Arc<dyn InvalidTxSink>> = sinks.read().clone();
        for sink in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| sink.write(&record))) {
                Ok(Ok(SinkOutcome::Dropped)) => {
                    stats.sink_drops.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(sink = sink.name(), txid = %record.txid(), "invalidtx: sink write failed: {e}");
                }
                Err(_) => {
                    stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                    error!(sink = sink.name(), txid = %record.txid(), "invalidtx: sink panicked");
                }
            }
        }
        stats.processed.fetch_add(1, Ordering::Relaxed);
    }
    debug!("invalidtx: publisher worker exiting");
}
