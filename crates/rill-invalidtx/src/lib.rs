//! # rill-invalidtx — Invalid transaction reporting.
//!
//! Captures transactions rejected by validation, together with where they
//! came from, and exports them to disk and/or a message bus without ever
//! blocking the validating thread:
//! - [`record::InvalidTxRecord`]: one rejected transaction plus context
//! - [`queue::ByteBudgetQueue`]: non-blocking FIFO bounded by bytes
//! - [`registry::BlockOriginRegistry`]: which sources a block is being validated for
//! - [`sink`]: disk and message-bus outputs
//! - [`publisher::InvalidTxPublisher`]: queue + worker thread fanning out to sinks
//! - [`scoped::ScopedInvalidTxSender`]: publish-on-failure guard for validation code

pub mod config;
pub mod error;
pub mod publisher;
pub mod queue;
pub mod record;
pub mod registry;
pub mod scoped;
pub mod sink;

pub use config::{BusSinkConfig, EvictionPolicy, FileSinkConfig, InvalidTxConfig, SinkKind};
pub use error::{BusError, ConfigError, PublisherError, SinkError};
pub use publisher::{InvalidTxPublisher, PublisherCounters};
pub use queue::{ByteBudgetQueue, ByteCost, PushOutcome};
pub use record::{BlockOrigin, BlockRef, InvalidTxRecord, PeerId, RecordOrigin, TxDetails, TxSource};
pub use registry::{BlockOriginRegistry, OriginHandle, ScopedBlockOrigin};
pub use scoped::ScopedInvalidTxSender;
pub use sink::{FileSink, InvalidTxSink, SinkCounters, SinkOutcome};
