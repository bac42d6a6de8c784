//! Entity locks for the commit path and relationship-chain surgery. Locks
//! are reentrant within a thread, so a commit may lock the same node for a
//! node command and again for a property command it owns.

use std::sync::Arc;

use parking_lot::lock_api::ArcReentrantMutexGuard;
use parking_lot::{Mutex, RawMutex, RawThreadId, ReentrantMutex};
use rustc_hash::FxHashMap;

use crate::store::records::{NodeId, RelId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Read,
    Write,
}

/// A held lock. Released when dropped.
pub struct LockHandle {
    _guard: ArcReentrantMutexGuard<RawMutex, RawThreadId, ()>,
}

#[derive(Default)]
struct LockTable {
    locks: Mutex<FxHashMap<u64, Arc<ReentrantMutex<()>>>>,
}

impl LockTable {
    fn acquire(&self, id: u64) -> LockHandle {
        let mutex = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(id).or_default())
        };
        LockHandle {
            _guard: ReentrantMutex::lock_arc(&mutex),
        }
    }
}

/// Per-node and per-relationship lock tables shared by every transaction of
/// an engine.
#[derive(Default)]
pub struct LockService {
    nodes: LockTable,
    rels: LockTable,
}

impl LockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node-level lock taken while commands touching the node execute. The
    /// in-memory table is exclusive regardless of the requested type.
    pub fn acquire_node_lock(&self, node_id: NodeId, _lock_type: LockType) -> LockHandle {
        self.nodes.acquire(node_id)
    }

    /// Fine-grained mutex guarding a single relationship record during chain
    /// surgery on its neighbors.
    pub fn lock_relationship(&self, rel_id: RelId) -> LockHandle {
        self.rels.acquire(rel_id)
    }
}

/// Every lock acquired during one commit; all of them are released together
/// when the group drops, on success and failure alike.
#[derive(Default)]
pub struct LockGroup {
    handles: Vec<LockHandle>,
}

impl LockGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: LockHandle) {
        self.handles.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_locks_are_reentrant() {
        let locks = LockService::new();
        let first = locks.acquire_node_lock(7, LockType::Write);
        let second = locks.acquire_node_lock(7, LockType::Write);
        drop(first);
        drop(second);
    }

    #[test]
    fn lock_group_releases_on_drop() {
        let locks = LockService::new();
        {
            let mut group = LockGroup::new();
            group.add(locks.acquire_node_lock(1, LockType::Write));
            group.add(locks.lock_relationship(2));
        }
        let _reacquired = locks.acquire_node_lock(1, LockType::Write);
    }
}
