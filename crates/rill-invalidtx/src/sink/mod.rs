//! Output destinations for invalid transaction records.
//!
//! Every sink applies its own admission policy. Running out of room is a
//! [`SinkOutcome::Dropped`], not an error; [`SinkError`] is reserved for I/O
//! and transport failures.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SinkError;
use crate::record::InvalidTxRecord;

#[cfg(feature = "bus")]
pub mod bus;
pub mod file;

#[cfg(feature = "bus")]
pub use bus::{BroadcastBus, BusMessage, MessageBus, MessageBusSink};
pub use file::FileSink;

/// What a sink did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Written,
    /// Written without the transaction body.
    Degraded,
    /// Refused by the sink's size or capacity policy.
    Dropped,
}

/// An output destination for records.
pub trait InvalidTxSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Write one record.
    fn write(&self, record: &InvalidTxRecord) -> Result<SinkOutcome, SinkError>;

    /// Remove everything stored so far. Returns bytes released.
    fn clear(&self) -> Result<u64, SinkError> {
        Ok(0)
    }

    fn counters(&self) -> SinkCounters;
}

/// Snapshot of a sink's outcome counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkCounters {
    pub written: u64,
    pub degraded: u64,
    pub dropped: u64,
    pub bytes_written: u64,
}

/// Live counters shared by the sink implementations.
#[derive(Debug, Default)]
pub(crate) struct SinkStats {
    written: AtomicU64,
    degraded: AtomicU64,
    dropped: AtomicU64,
    bytes_written: AtomicU64,
}

impl SinkStats {
    pub(crate) fn record(&self, outcome: SinkOutcome, bytes: usize) -> SinkOutcome {
        match outcome {
            SinkOutcome::Written => self.written.fetch_add(1, Ordering::Relaxed),
            SinkOutcome::Degraded => self.degraded.fetch_add(1, Ordering::Relaxed),
            SinkOutcome::Dropped => self.dropped.fetch_add(1, Ordering::Relaxed),
        };
        if outcome != SinkOutcome::Dropped {
            self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        }
        outcome
    }

    pub(crate) fn snapshot(&self) -> SinkCounters {
        SinkCounters {
            written: self.written.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}
