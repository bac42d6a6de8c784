//! Read operations serving the layers above: light record loads that look
//! through the change buffer, and committed-view reads that go straight to
//! the stores.

use crate::error::{GraphError, Result};
use crate::store::props::PropertyValue;
use crate::store::records::{
    NodeId, NodeRecord, PropId, RelId, RelationshipGroupRecord, RelationshipRecord, TokenId,
    NO_PROP, NO_REL,
};
use crate::store::{labels, Stores};
use crate::tx::rel_ops::rel_count;
use crate::tx::WriteTransaction;

/// Direction filter for relationship statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountDirection {
    Outgoing,
    Incoming,
    Both,
}

impl WriteTransaction {
    /// Loads a node record without its heavy parts, or `None` when no such
    /// record is in use.
    pub fn node_load_light(&mut self, node_id: NodeId) -> Result<Option<NodeRecord>> {
        match self.node_records.get_or_load(node_id, ()) {
            Ok(change) => Ok(Some(change.for_reading_linkage().clone())),
            Err(GraphError::InvalidRecord(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Loads a relationship record, or `None` when no such record is in use.
    pub fn rel_load_light(&mut self, rel_id: RelId) -> Result<Option<RelationshipRecord>> {
        match self.rel_records.get_or_load(rel_id, ()) {
            Ok(change) => Ok(Some(*change.for_reading_linkage())),
            Err(GraphError::InvalidRecord(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Feeds the committed property chain of a node to `receiver`. Entities
    /// created in this transaction yield nothing; deleted ones error unless
    /// `light` is set.
    pub fn node_load_properties<F>(
        &mut self,
        node_id: NodeId,
        light: bool,
        receiver: F,
    ) -> Result<()>
    where
        F: FnMut(TokenId, PropertyValue, PropId),
    {
        if let Some(change) = self.node_records.get_if_loaded(node_id) {
            if change.is_created() {
                return Ok(());
            }
            if !change.record().in_use && !light {
                return Err(GraphError::State(format!(
                    "node {node_id} has been deleted in this transaction"
                )));
            }
        }
        let record = self.stores.nodes.get_record(node_id).map_err(|_| {
            GraphError::State(format!("node {node_id} has been deleted"))
        })?;
        load_properties(&self.stores, record.next_prop, receiver)
    }

    /// Feeds the committed property chain of a relationship to `receiver`.
    pub fn rel_load_properties<F>(
        &mut self,
        rel_id: RelId,
        light: bool,
        receiver: F,
    ) -> Result<()>
    where
        F: FnMut(TokenId, PropertyValue, PropId),
    {
        if let Some(change) = self.rel_records.get_if_loaded(rel_id) {
            if change.is_created() {
                return Ok(());
            }
            if !change.record().in_use && !light {
                return Err(GraphError::State(format!(
                    "relationship {rel_id} has been deleted in this transaction"
                )));
            }
        }
        let record = self.stores.rels.get_record(rel_id)?;
        load_properties(&self.stores, record.next_prop, receiver)
    }

    /// Feeds the committed graph-level property chain to `receiver`.
    pub fn graph_load_properties<F>(&self, receiver: F) -> Result<()>
    where
        F: FnMut(TokenId, PropertyValue, PropId),
    {
        load_properties(&self.stores, self.stores.graph_record().next_prop, receiver)
    }

    /// The committed labels of a node, ignoring changes staged in this
    /// transaction.
    pub fn labels_for_node(&self, node_id: NodeId) -> Result<Vec<TokenId>> {
        let mut record = self.stores.nodes.get_record(node_id)?;
        self.stores.nodes.ensure_heavy(&mut record)?;
        labels::labels_of(&record)
    }

    /// Counts a node's relationships from the committed store view. Counts
    /// filtered by type or direction are only stored for dense nodes.
    pub fn relationship_count(
        &self,
        node_id: NodeId,
        rel_type: Option<TokenId>,
        direction: CountDirection,
    ) -> Result<u64> {
        let node = self.stores.nodes.get_record(node_id)?;
        if node.next_rel == NO_REL {
            return Ok(0);
        }
        if !node.dense {
            if rel_type.is_some() || direction != CountDirection::Both {
                return Err(GraphError::InvalidArgument(
                    "relationship counts by type or direction require a dense node".into(),
                ));
            }
            return self.chain_count(&node, node.next_rel);
        }
        let groups = load_relationship_groups(&self.stores, node.next_rel)?;
        let mut count = 0;
        for group in &groups {
            if let Some(rel_type) = rel_type {
                if group.group_type != rel_type {
                    continue;
                }
            }
            count += self.group_count(&node, group, direction)?;
        }
        Ok(count)
    }

    /// The relationship types a dense node has groups for.
    pub fn relationship_types(&self, node_id: NodeId) -> Result<Vec<TokenId>> {
        let node = self.stores.nodes.get_record(node_id)?;
        if !node.dense {
            return Err(GraphError::InvalidArgument(format!(
                "node {node_id} is not dense and has no relationship groups"
            )));
        }
        let groups = load_relationship_groups(&self.stores, node.next_rel)?;
        Ok(groups.iter().map(|g| g.group_type).collect())
    }

    fn group_count(
        &self,
        node: &NodeRecord,
        group: &RelationshipGroupRecord,
        direction: CountDirection,
    ) -> Result<u64> {
        let chains = match direction {
            CountDirection::Outgoing => [group.first_out, group.first_loop, NO_REL],
            CountDirection::Incoming => [group.first_in, group.first_loop, NO_REL],
            CountDirection::Both => [group.first_out, group.first_in, group.first_loop],
        };
        let mut count = 0;
        for head in chains {
            count += self.chain_count(node, head)?;
        }
        Ok(count)
    }

    /// Chain length read from the prev field of the chain head.
    fn chain_count(&self, node: &NodeRecord, head: RelId) -> Result<u64> {
        if head == NO_REL {
            return Ok(0);
        }
        let rel = self.stores.rels.get_record(head)?;
        Ok(rel_count(node.id, &rel))
    }
}

fn load_properties<F>(stores: &Stores, mut next_prop: PropId, mut receiver: F) -> Result<()>
where
    F: FnMut(TokenId, PropertyValue, PropId),
{
    while next_prop != NO_PROP {
        let mut record = stores.props.get_record(next_prop)?;
        for block in &mut record.blocks {
            stores.props.ensure_heavy(block)?;
        }
        for block in &record.blocks {
            receiver(block.key, block.value()?, record.id);
        }
        next_prop = record.next_prop;
    }
    Ok(())
}

fn load_relationship_groups(
    stores: &Stores,
    first_group: u64,
) -> Result<Vec<RelationshipGroupRecord>> {
    let mut groups = Vec::new();
    let mut group_id = first_group;
    let mut previous = NO_REL;
    while group_id != NO_REL {
        let mut record = stores.groups.get_record(group_id)?;
        record.prev = previous;
        previous = group_id;
        group_id = record.next;
        groups.push(record);
    }
    Ok(groups)
}
