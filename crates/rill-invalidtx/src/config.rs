//! Configuration for the invalid transaction publisher and its sinks.
//!
//! Values are consumed here, not parsed from the command line; the host node
//! fills an [`InvalidTxConfig`] from its own flags or config file. Token
//! parsing for the eviction policy and sink list is provided via `FromStr`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

pub const ONE_MEGABYTE: u64 = 1024 * 1024;
pub const ONE_GIGABYTE: u64 = 1024 * ONE_MEGABYTE;

/// Default disk budget for the file sink (3 GiB).
pub const DEFAULT_FILE_SINK_DISK_USAGE: u64 = 3 * ONE_GIGABYTE;

/// Default policy once the file sink is full.
pub const DEFAULT_EVICTION_POLICY: EvictionPolicy = EvictionPolicy::IgnoreNew;

/// Default size at which the file sink starts a new segment (64 MiB).
pub const DEFAULT_SEGMENT_BYTES: u64 = 64 * ONE_MEGABYTE;

/// Default cap on a single message-bus message (500 MiB).
pub const DEFAULT_BUS_MAX_MESSAGE_SIZE: usize = 500 * ONE_MEGABYTE as usize;

/// Default byte budget of the publisher queue (1 GiB).
pub const DEFAULT_QUEUE_MAX_BYTES: usize = ONE_GIGABYTE as usize;

/// Directory name for file sink segments, under the node data directory.
pub const INVALID_TX_DIR: &str = "invalidtxs";

/// Message-bus topic invalid transactions are published on.
pub const INVALID_TX_TOPIC: &str = "invalidtx";

/// What the file sink does once its disk budget is used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvictionPolicy {
    /// Refuse new records until space frees up.
    #[default]
    IgnoreNew,
    /// Delete the oldest segments to make room.
    DeleteOld,
}

impl FromStr for EvictionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IGNORE_NEW" => Ok(Self::IgnoreNew),
            "DELETE_OLD" => Ok(Self::DeleteOld),
            _ => Err(ConfigError::UnknownEvictionPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IgnoreNew => f.write_str("IGNORE_NEW"),
            Self::DeleteOld => f.write_str("DELETE_OLD"),
        }
    }
}

/// Sink selector as written in node configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    File,
    Bus,
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FILE" => Ok(Self::File),
            "BUS" => Ok(Self::Bus),
            _ => Err(ConfigError::UnknownSink(s.to_string())),
        }
    }
}

/// Disk sink settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileSinkConfig {
    /// Directory holding the segment files.
    pub dir: PathBuf,
    /// Cap on the total size of all segments.
    pub max_disk_usage: u64,
    pub eviction_policy: EvictionPolicy,
    /// Preferred segment size before rotation.
    pub segment_bytes: u64,
    /// Include raw transaction hex in each record.
    pub write_hex: bool,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rill")
            .join(INVALID_TX_DIR);

        Self {
            dir,
            max_disk_usage: DEFAULT_FILE_SINK_DISK_USAGE,
            eviction_policy: DEFAULT_EVICTION_POLICY,
            segment_bytes: DEFAULT_SEGMENT_BYTES,
            write_hex: true,
        }
    }
}

impl FileSinkConfig {
    /// Defaults with segments placed under `data_dir`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(INVALID_TX_DIR),
            ..Self::default()
        }
    }
}

/// Message-bus sink settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusSinkConfig {
    /// Largest message published; bigger records are degraded or dropped.
    pub max_message_bytes: usize,
    pub topic: String,
    pub write_hex: bool,
}

impl Default for BusSinkConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_BUS_MAX_MESSAGE_SIZE,
            topic: INVALID_TX_TOPIC.to_string(),
            write_hex: true,
        }
    }
}

/// Publisher settings. A `None` sink section disables that sink.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InvalidTxConfig {
    pub queue_max_bytes: usize,
    pub file: Option<FileSinkConfig>,
    pub bus: Option<BusSinkConfig>,
}

impl Default for InvalidTxConfig {
    fn default() -> Self {
        Self {
            queue_max_bytes: DEFAULT_QUEUE_MAX_BYTES,
            file: None,
            bus: None,
        }
    }
}

impl InvalidTxConfig {
    /// Enable the listed sinks with default settings, files under `data_dir`.
    pub fn with_sinks(kinds: &[SinkKind], data_dir: &Path) -> Self {
        let mut config = Self::default();
        for kind in kinds {
            match kind {
                SinkKind::File => config.file = Some(FileSinkConfig::in_data_dir(data_dir)),
                SinkKind::Bus => config.bus = Some(BusSinkConfig::default()),
            }
        }
        config
    }

    pub fn has_sinks(&self) -> bool {
        self.file.is_some() || self.bus.is_some()
    }
}
