//! Block origin registry.
//!
//! Transaction validation deep inside block connection has no idea which peer
//! or RPC call delivered the block. Callers that start validating a block
//! register where it came from and unregister when they are done; the
//! reporter looks the origins up by block hash when a transaction fails.
//!
//! The same block may be validated concurrently for several sources, so one
//! hash can have several entries. Each registration gets its own
//! [`OriginHandle`]; handles are move-only, so an entry cannot be removed
//! twice and removing one never touches another. A handle also names the
//! registry that issued it and is ignored by any other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{trace, warn};

use rill_core::types::Hash256;

use crate::record::{BlockOrigin, PeerId};

/// Proof of one registration. Pass it back to
/// [`BlockOriginRegistry::unregister`] to remove exactly that entry.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an origin stays registered until its handle is unregistered"]
pub struct OriginHandle {
    registry: u64,
    id: u64,
}

/// Source of registry instance ids.
static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Default)]
struct Table {
    /// Registration id → entry. Ids increase monotonically, which gives
    /// registration order.
    entries: HashMap<u64, (Hash256, BlockOrigin)>,
    next_id: u64,
}

/// Process-scoped table of blocks currently being validated and where they
/// came from. Share it with `Arc`.
pub struct BlockOriginRegistry {
    instance: u64,
    table: Mutex<Table>,
}

impl Default for BlockOriginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockOriginRegistry {
    pub fn new() -> Self {
        Self {
            instance: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            table: Mutex::new(Table::default()),
        }
    }

    /// Record that `hash` is being validated on behalf of a source.
    pub fn register(
        &self,
        hash: Hash256,
        source: impl Into<String>,
        address: impl Into<String>,
        peer_id: PeerId,
    ) -> OriginHandle {
        let origin = BlockOrigin {
            source: source.into(),
            address: address.into(),
            peer_id,
        };
        let mut table = self.table.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.insert(id, (hash, origin));
        trace!(%hash, id, "invalidtx: block origin registered");
        OriginHandle { registry: self.instance, id }
    }

    /// Remove the entry behind `handle`. A handle issued by another registry
    /// removes nothing.
    pub fn unregister(&self, handle: OriginHandle) {
        if handle.registry != self.instance {
            warn!(id = handle.id, "invalidtx: origin handle from another registry ignored");
            return;
        }
        self.table.lock().entries.remove(&handle.id);
    }

    /// Copy of every origin registered for `hash`, oldest registration first.
    /// Empty when nothing is tracked, e.g. for locally mined blocks.
    pub fn origins_for(&self, hash: &Hash256) -> Vec<BlockOrigin> {
        let table = self.table.lock();
        let mut matches: Vec<(u64, BlockOrigin)> = table
            .entries
            .iter()
            .filter(|(_, (h, _))| h == hash)
            .map(|(id, (_, origin))| (*id, origin.clone()))
            .collect();
        drop(table);
        matches.sort_unstable_by_key(|(id, _)| *id);
        matches.into_iter().map(|(_, origin)| origin).collect()
    }

    /// Register and get a guard that unregisters on drop.
    pub fn scoped(
        &self,
        hash: Hash256,
        source: impl Into<String>,
        address: impl Into<String>,
        peer_id: PeerId,
    ) -> ScopedBlockOrigin<'_> {
        ScopedBlockOrigin {
            registry: self,
            handle: Some(self.register(hash, source, address, peer_id)),
        }
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a block origin registered for the lifetime of a validation scope.
#[must_use = "the origin is unregistered as soon as the guard is dropped"]
pub struct ScopedBlockOrigin<'a> {
    registry: &'a BlockOriginRegistry,
    handle: Option<OriginHandle>,
}

impl Drop for ScopedBlockOrigin<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.registry.unregister(handle);
        }
    }
}
