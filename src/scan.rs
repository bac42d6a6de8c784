//! Label-scan index contract. Commit hands the writer one update per node
//! whose label set changed, sorted by node id; the writer commits its batch
//! when it goes out of scope.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::store::records::{NodeId, TokenId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLabelUpdate {
    pub node_id: NodeId,
    pub labels_before: Vec<TokenId>,
    pub labels_after: Vec<TokenId>,
}

pub trait LabelScanStore: Send + Sync {
    fn new_writer(&self) -> Box<dyn LabelScanWriter + '_>;
}

pub trait LabelScanWriter {
    fn write(&mut self, update: &NodeLabelUpdate) -> Result<()>;
}

/// In-memory label-scan index: label id to the sorted set of node ids.
#[derive(Default)]
pub struct InMemoryLabelScanStore {
    index: RwLock<FxHashMap<TokenId, BTreeSet<NodeId>>>,
}

impl InMemoryLabelScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes_with_label(&self, label: TokenId) -> Vec<NodeId> {
        self.index
            .read()
            .get(&label)
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl LabelScanStore for InMemoryLabelScanStore {
    fn new_writer(&self) -> Box<dyn LabelScanWriter + '_> {
        Box::new(InMemoryLabelScanWriter {
            store: self,
            pending: Vec::new(),
        })
    }
}

struct InMemoryLabelScanWriter<'a> {
    store: &'a InMemoryLabelScanStore,
    pending: Vec<NodeLabelUpdate>,
}

impl LabelScanWriter for InMemoryLabelScanWriter<'_> {
    fn write(&mut self, update: &NodeLabelUpdate) -> Result<()> {
        self.pending.push(update.clone());
        Ok(())
    }
}

impl Drop for InMemoryLabelScanWriter<'_> {
    fn drop(&mut self) {
        let mut index = self.store.index.write();
        for update in self.pending.drain(..) {
            for label in &update.labels_before {
                if !update.labels_after.contains(label) {
                    if let Some(nodes) = index.get_mut(label) {
                        nodes.remove(&update.node_id);
                    }
                }
            }
            for label in &update.labels_after {
                if !update.labels_before.contains(label) {
                    index.entry(*label).or_default().insert(update.node_id);
                }
            }
        }
    }
}
