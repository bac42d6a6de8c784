//! Property-index service contract. Commit submits one batch per
//! transaction; the batch resolves its updates on demand from the command
//! set and the stores, so an indexing service that has nothing to do pays
//! nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::store::props::PropertyValue;
use crate::store::records::{NodeId, PropertyOwner, TokenId};
use crate::store::Stores;
use crate::tx::command::{NodeCommand, PropertyCommand};

/// One resolved property change on a node.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdate {
    pub node_id: NodeId,
    pub key: TokenId,
    pub before: Option<PropertyValue>,
    pub after: Option<PropertyValue>,
}

/// Lazy view over the property and node commands of one transaction.
pub struct LazyIndexUpdates {
    stores: Arc<Stores>,
    property_commands: Vec<PropertyCommand>,
    node_commands: BTreeMap<NodeId, NodeCommand>,
}

impl LazyIndexUpdates {
    pub fn new(
        stores: Arc<Stores>,
        property_commands: Vec<PropertyCommand>,
        node_commands: BTreeMap<NodeId, NodeCommand>,
    ) -> Self {
        Self {
            stores,
            property_commands,
            node_commands,
        }
    }

    pub fn node_commands(&self) -> &BTreeMap<NodeId, NodeCommand> {
        &self.node_commands
    }

    /// Resolves the batch into concrete per-key updates. Only node-owned
    /// properties feed node property indexes.
    pub fn resolve(&self) -> Result<Vec<PropertyUpdate>> {
        let mut updates = Vec::new();
        for command in &self.property_commands {
            let PropertyOwner::Node(node_id) = command.after.owner else {
                continue;
            };
            let mut keys: Vec<TokenId> = command
                .before
                .blocks
                .iter()
                .chain(command.after.blocks.iter())
                .map(|b| b.key)
                .collect();
            keys.sort_unstable();
            keys.dedup();
            for key in keys {
                let before = command
                    .before
                    .block(key)
                    .map(|b| self.stores.props.value_of(b))
                    .transpose()?;
                let after = command
                    .after
                    .block(key)
                    .map(|b| self.stores.props.value_of(b))
                    .transpose()?;
                if before != after {
                    updates.push(PropertyUpdate {
                        node_id,
                        key,
                        before,
                        after,
                    });
                }
            }
        }
        Ok(updates)
    }
}

pub trait IndexingService: Send + Sync {
    fn update_indexes(&self, updates: LazyIndexUpdates);
}

/// Indexing service for engines without property indexes.
#[derive(Default)]
pub struct NoopIndexingService;

impl IndexingService for NoopIndexingService {
    fn update_indexes(&self, _updates: LazyIndexUpdates) {}
}
