//! Publish-on-failure guard for validation code with many exits.
//!
//! [`ScopedInvalidTxSender`] wraps the validation state of one transaction.
//! Validation writes to the state through the guard; when the guard goes out
//! of scope (return, `?`, or unwinding) it publishes a record if and only if
//! the state ended up not valid. The transaction is borrowed and only cloned
//! when there is something to report.

use std::ops::{Deref, DerefMut};

use tracing::{error, warn};

use rill_core::types::Transaction;
use rill_core::validation::ValidationState;

use crate::error::PublisherError;
use crate::publisher::InvalidTxPublisher;
use crate::record::{self, BlockDetails, BlockRef, InvalidTxRecord, RecordOrigin, TxDetails};
use crate::registry::BlockOriginRegistry;

enum Context<'a> {
    Block {
        registry: &'a BlockOriginRegistry,
        block: Option<BlockRef>,
    },
    Tx(TxDetails),
}

/// Reports a transaction on scope exit if its validation failed.
#[must_use = "the guard reports on drop; binding it to `_` drops it immediately"]
pub struct ScopedInvalidTxSender<'a> {
    publisher: &'a InvalidTxPublisher,
    tx: &'a Transaction,
    context: Context<'a>,
    state: &'a mut ValidationState,
}

impl<'a> ScopedInvalidTxSender<'a> {
    /// Guard for a transaction validated as part of `block`. Origins are
    /// looked up in `registry` at report time; with no block the record
    /// carries an empty block context.
    pub fn for_block(
        publisher: &'a InvalidTxPublisher,
        registry: &'a BlockOriginRegistry,
        tx: &'a Transaction,
        block: Option<BlockRef>,
        state: &'a mut ValidationState,
    ) -> Self {
        Self {
            publisher,
            tx,
            context: Context::Block { registry, block },
            state,
        }
    }

    /// Guard for a standalone transaction from a peer or RPC caller.
    pub fn for_tx(
        publisher: &'a InvalidTxPublisher,
        tx: &'a Transaction,
        details: TxDetails,
        state: &'a mut ValidationState,
    ) -> Self {
        Self {
            publisher,
            tx,
            context: Context::Tx(details),
            state,
        }
    }

    fn origin(&mut self) -> RecordOrigin {
        match &mut self.context {
            Context::Block { registry, block } => {
                let details = match block {
                    Some(block) => BlockDetails {
                        origins: registry.origins_for(&block.hash),
                        ..BlockDetails::from(*block)
                    },
                    None => BlockDetails::default(),
                };
                RecordOrigin::Block(details)
            }
            Context::Tx(details) => RecordOrigin::Tx(std::mem::take(details)),
        }
    }
}

impl Deref for ScopedInvalidTxSender<'_> {
    type Target = ValidationState;

    fn deref(&self) -> &ValidationState {
        &*self.state
    }
}

impl DerefMut for ScopedInvalidTxSender<'_> {
    fn deref_mut(&mut self) -> &mut ValidationState {
        &mut *self.state
    }
}

impl Drop for ScopedInvalidTxSender<'_> {
    fn drop(&mut self) {
        if self.state.is_valid() {
            return;
        }

        let origin = self.origin();
        let record = match InvalidTxRecord::new(self.tx.clone(), origin, record::now(), self.state.clone()) {
            Ok(record) => record,
            Err(e) => {
                warn!("invalidtx: cannot build record for rejected transaction: {e}");
                return;
            }
        };
        match self.publisher.publish(record) {
            Ok(_) => {}
            Err(PublisherError::NotInitialized) => {
                error!("invalidtx: rejected transaction reported before publisher initialization");
            }
            Err(e) => error!("invalidtx: publish failed: {e}"),
        }
    }
}
