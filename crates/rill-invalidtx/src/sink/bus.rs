//! Message-bus sink.
//!
//! Records are serialized to JSON and published on a topic through a
//! [`MessageBus`]. A message over `max_message_bytes` is retried once
//! without the transaction body; if that is still too large it is dropped.
//!
//! [`BroadcastBus`] is the in-process bus: a `tokio::sync::broadcast`
//! channel that any number of subscribers (RPC notifiers, tests) can read.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::debug;

use super::{InvalidTxSink, SinkCounters, SinkOutcome, SinkStats};
use crate::config::BusSinkConfig;
use crate::error::{BusError, SinkError};
use crate::record::InvalidTxRecord;

/// Capacity of the broadcast channel; slow subscribers lag past this.
pub const DEFAULT_BUS_CAPACITY: usize = 1_024;

/// Publish-socket primitive.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;
}

/// A message as seen by [`BroadcastBus`] subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// In-process message bus on a broadcast channel.
pub struct BroadcastBus {
    tx: broadcast::Sender<BusMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl MessageBus for BroadcastBus {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };
        // Like a PUB socket, a message with no subscribers is simply gone.
        if self.tx.send(message).is_err() {
            debug!(topic, "invalidtx: no bus subscribers");
        }
        Ok(())
    }
}

/// Sink publishing each record on a message bus.
pub struct MessageBusSink {
    bus: Arc<dyn MessageBus>,
    topic: String,
    max_message_bytes: usize,
    write_hex: bool,
    stats: SinkStats,
}

impl MessageBusSink {
    pub fn new(bus: Arc<dyn MessageBus>, config: &BusSinkConfig) -> Self {
        Self {
            bus,
            topic: config.topic.clone(),
            max_message_bytes: config.max_message_bytes,
            write_hex: config.write_hex,
            stats: SinkStats::default(),
        }
    }
}

impl InvalidTxSink for MessageBusSink {
    fn name(&self) -> &'static str {
        "bus"
    }

    fn write(&self, record: &InvalidTxRecord) -> Result<SinkOutcome, SinkError> {
        let mut outcome = SinkOutcome::Written;
        let mut message = record.to_json(self.write_hex)?;

        if message.len() > self.max_message_bytes {
            if record.is_degraded() {
                return Ok(self.stats.record(SinkOutcome::Dropped, message.len()));
            }
            debug!(
                txid = %record.txid(),
                bytes = message.len(),
                max = self.max_message_bytes,
                "invalidtx: bus message too large, sending without transaction"
            );
            message = record.degraded_copy().to_json(self.write_hex)?;
            if message.len() > self.max_message_bytes {
                debug!(txid = %record.txid(), bytes = message.len(), "invalidtx: bus message dropped");
                return Ok(self.stats.record(SinkOutcome::Dropped, message.len()));
            }
            outcome = SinkOutcome::Degraded;
        }

        let len = message.len();
        self.bus.publish(&self.topic, Bytes::from(message))?;
        Ok(self.stats.record(outcome, len))
    }

    fn counters(&self) -> SinkCounters {
        self.stats.snapshot()
    }
}
