//! Invalid transaction records.
//!
//! An [`InvalidTxRecord`] describes one rejected transaction together with the
//! context it arrived in: either the block that contained it or the peer / RPC
//! caller that relayed it on its own. Records are built on validation threads,
//! handed to the publisher, and rendered as JSON by the sinks.
//!
//! The transaction payload can be *degraded*: the full transaction is dropped
//! and only its txid and size are kept. The queue does this under memory
//! pressure and the message-bus sink does it (on a copy) for oversized
//! messages.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use rill_core::error::TransactionError;
use rill_core::types::{Hash256, Transaction};
use rill_core::validation::ValidationState;

use crate::error::SinkError;
use crate::queue::ByteCost;

/// Identifier a peer connection is tracked under.
pub type PeerId = i64;

/// Accounted byte cost of a record whose transaction has been degraded.
pub const DEGRADED_RECORD_COST: usize = 64;

/// How a standalone transaction reached the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxSource {
    #[default]
    Unknown,
    File,
    Reorg,
    Wallet,
    Rpc,
    P2p,
    Finalised,
}

/// Identity of a block whose transactions are being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub hash: Hash256,
    pub height: u64,
    /// Block timestamp, Unix seconds.
    pub time: i64,
}

/// One source a block was received from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOrigin {
    /// Subsystem that delivered the block, e.g. `"p2p"` or `"rpc"`.
    pub source: String,
    /// Remote address, empty when not applicable.
    pub address: String,
    pub peer_id: PeerId,
}

/// Context for a transaction found inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockDetails {
    /// Every source currently validating this block, in registration order.
    pub origins: Vec<BlockOrigin>,
    pub hash: Hash256,
    pub height: u64,
    pub time: i64,
}

impl From<BlockRef> for BlockDetails {
    fn from(block: BlockRef) -> Self {
        Self {
            origins: Vec::new(),
            hash: block.hash,
            height: block.height,
            time: block.time,
        }
    }
}

/// Context for a transaction received on its own.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxDetails {
    pub source: TxSource,
    pub peer_id: PeerId,
    pub address: String,
}

/// Where a rejected transaction came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOrigin {
    Block(BlockDetails),
    Tx(TxDetails),
}

/// Minimal description of a transaction whose body was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSummary {
    /// Serialized size of the dropped transaction.
    pub size: usize,
    pub txid: Hash256,
}

/// Transaction body, or what is left of it after degradation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxPayload {
    Full {
        tx: Transaction,
        txid: Hash256,
        size: usize,
    },
    Summary(TxSummary),
}

impl TxPayload {
    fn summary(&self) -> TxSummary {
        match self {
            Self::Full { txid, size, .. } => TxSummary { size: *size, txid: *txid },
            Self::Summary(summary) => *summary,
        }
    }
}

/// One captured invalid-transaction event with its context.
///
/// Everything except the payload is fixed at construction. The payload may
/// move from full to summary once, via [`degrade`](Self::degrade).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTxRecord {
    payload: TxPayload,
    state: ValidationState,
    origin: RecordOrigin,
    rejection_time: i64,
}

impl InvalidTxRecord {
    /// Build a record, computing the txid and size from a single encoding.
    pub fn new(
        tx: Transaction,
        origin: RecordOrigin,
        rejection_time: i64,
        state: ValidationState,
    ) -> Result<Self, TransactionError> {
        let (txid, size) = tx.id_and_size()?;
        Ok(Self {
            payload: TxPayload::Full { tx, txid, size },
            state,
            origin,
            rejection_time,
        })
    }

    /// Record for a transaction rejected while validating `block`.
    /// No origins are attached; see [`crate::registry`] for those.
    pub fn from_block(
        tx: Transaction,
        block: BlockRef,
        state: ValidationState,
    ) -> Result<Self, TransactionError> {
        Self::new(tx, RecordOrigin::Block(block.into()), now(), state)
    }

    /// Record for a standalone transaction rejected on arrival.
    pub fn from_tx(
        tx: Transaction,
        details: TxDetails,
        state: ValidationState,
    ) -> Result<Self, TransactionError> {
        Self::new(tx, RecordOrigin::Tx(details), now(), state)
    }

    pub fn txid(&self) -> Hash256 {
        self.payload.summary().txid
    }

    /// Serialized size of the transaction, known in both payload forms.
    pub fn size(&self) -> usize {
        self.payload.summary().size
    }

    pub fn payload(&self) -> &TxPayload {
        &self.payload
    }

    /// The full transaction, unless the record was degraded.
    pub fn transaction(&self) -> Option<&Transaction> {
        match &self.payload {
            TxPayload::Full { tx, .. } => Some(tx),
            TxPayload::Summary(_) => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.payload, TxPayload::Summary(_))
    }

    pub fn state(&self) -> &ValidationState {
        &self.state
    }

    pub fn origin(&self) -> &RecordOrigin {
        &self.origin
    }

    /// Rejection time, Unix seconds.
    pub fn rejection_time(&self) -> i64 {
        self.rejection_time
    }

    /// Bytes this record is charged against a byte budget: the transaction
    /// (or [`DEGRADED_RECORD_COST`] once degraded) plus the strings and origin
    /// list carried alongside it.
    pub fn estimated_byte_cost(&self) -> usize {
        let payload = match &self.payload {
            TxPayload::Full { size, .. } => *size,
            TxPayload::Summary(_) => DEGRADED_RECORD_COST,
        };
        payload + self.context_cost()
    }

    /// Heap bytes held outside the payload. Degradation leaves these alone.
    fn context_cost(&self) -> usize {
        let state = self.state.reject_reason.len() + self.state.debug_message.len();
        let origin = match &self.origin {
            RecordOrigin::Block(block) => block
                .origins
                .iter()
                .map(|o| std::mem::size_of::<BlockOrigin>() + o.source.len() + o.address.len())
                .sum(),
            RecordOrigin::Tx(details) => details.address.len(),
        };
        state + origin
    }

    /// Replace the full transaction with its summary.
    ///
    /// Returns `false` without changing anything if already degraded.
    pub fn degrade(&mut self) -> bool {
        if self.is_degraded() {
            return false;
        }
        self.payload = TxPayload::Summary(self.payload.summary());
        true
    }

    /// A degraded clone. The transaction body is never copied.
    pub fn degraded_copy(&self) -> Self {
        Self {
            payload: TxPayload::Summary(self.payload.summary()),
            state: self.state.clone(),
            origin: self.origin.clone(),
            rejection_time: self.rejection_time,
        }
    }

    /// Render as a single-line JSON document.
    ///
    /// `write_hex` includes the raw transaction bytes when the payload is
    /// still full; degraded records never carry `hex`.
    pub fn to_json(&self, write_hex: bool) -> Result<String, SinkError> {
        let hex = match (&self.payload, write_hex) {
            (TxPayload::Full { tx, .. }, true) => Some(hex::encode(
                tx.encode().map_err(|e| SinkError::Serialization(e.to_string()))?,
            )),
            _ => None,
        };

        let origin = match &self.origin {
            RecordOrigin::Block(block) => OriginDocument::Block {
                hash: block.hash.to_string(),
                height: block.height,
                time: block.time,
                origins: &block.origins,
            },
            RecordOrigin::Tx(details) => OriginDocument::Tx {
                source: details.source,
                peer_id: details.peer_id,
                address: &details.address,
            },
        };

        let doc = RecordDocument {
            txid: self.txid().to_string(),
            size: self.size(),
            hex,
            rejection_time: self.rejection_time,
            validation_state: &self.state,
            origin,
        };
        serde_json::to_string(&doc).map_err(|e| SinkError::Serialization(e.to_string()))
    }
}

impl ByteCost for InvalidTxRecord {
    fn byte_cost(&self) -> usize {
        self.estimated_byte_cost()
    }

    fn degrade(&mut self) -> bool {
        InvalidTxRecord::degrade(self)
    }
}

/// Current wall-clock time, Unix seconds.
pub fn now() -> i64 {
    Utc::now().timestamp()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordDocument<'a> {
    txid: String,
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    hex: Option<String>,
    rejection_time: i64,
    validation_state: &'a ValidationState,
    #[serde(flatten)]
    origin: OriginDocument<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum OriginDocument<'a> {
    Block {
        hash: String,
        height: u64,
        time: i64,
        origins: &'a [BlockOrigin],
    },
    #[serde(rename_all = "camelCase")]
    Tx {
        source: TxSource,
        peer_id: PeerId,
        address: &'a str,
    },
}
