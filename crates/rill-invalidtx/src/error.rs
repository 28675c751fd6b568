//! Error types for the invalid transaction pipeline.
//!
//! Capacity exhaustion is never an error here: it shows up as a
//! `Dropped`/`Degraded` outcome and a counter. Only sink failures and
//! publisher misuse are modelled as errors.
use thiserror::Error;

/// Failure inside a single sink write. Logged by the worker, never retried.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io: {0}")] Io(#[from] std::io::Error),
    #[error("serialization: {0}")] Serialization(String),
    #[error(transparent)] Bus(#[from] BusError),
}

/// Message-bus transport failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("bus closed")] Closed,
    #[error("transport: {0}")] Transport(String),
}

/// Misuse of the publisher lifecycle, or a failure to bring it up.
#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("publisher already initialized")] AlreadyInitialized,
    #[error("publisher not initialized")] NotInitialized,
    #[error("bus sink configured but no message bus attached")] MissingMessageBus,
    #[error("sink init: {0}")] SinkInit(#[from] SinkError),
    #[error("worker spawn: {0}")] WorkerSpawn(std::io::Error),
}

/// Unrecognised configuration token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown eviction policy: {0} (expected IGNORE_NEW or DELETE_OLD)")] UnknownEvictionPolicy(String),
    #[error("unknown sink: {0} (expected FILE or BUS)")] UnknownSink(String),
}
