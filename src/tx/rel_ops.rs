//! Relationship chain and group chain surgery. Every operation works on
//! records staged in the change buffer; nothing is written to the stores
//! until the commands execute at commit.

use std::collections::BTreeMap;

use crate::error::{GraphError, Result};
use crate::store::props::PropertyValue;
use crate::store::records::{
    direction_of, NodeId, PropertyOwner, RelId, RelationshipRecord, TokenId, NO_REL,
};
use crate::tx::WriteTransaction;

/// One of the four chain pointers a relationship carries, seen from the
/// relationship itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelationshipConnection {
    StartPrev,
    StartNext,
    EndPrev,
    EndNext,
}

use RelationshipConnection::{EndNext, EndPrev, StartNext, StartPrev};

impl RelationshipConnection {
    /// The neighbor id this pointer holds. Prev pointers of a chain head
    /// hold the chain length, so they read as none.
    fn get(self, rel: &RelationshipRecord) -> RelId {
        match self {
            StartPrev => {
                if rel.first_in_first_chain {
                    NO_REL
                } else {
                    rel.first_prev_rel
                }
            }
            StartNext => rel.first_next_rel,
            EndPrev => {
                if rel.first_in_second_chain {
                    NO_REL
                } else {
                    rel.second_prev_rel
                }
            }
            EndNext => rel.second_next_rel,
        }
    }

    fn set(self, rel: &mut RelationshipRecord, id: RelId, first_in_chain: bool) {
        match self {
            StartPrev => {
                rel.first_prev_rel = id;
                rel.first_in_first_chain = first_in_chain;
            }
            StartNext => rel.first_next_rel = id,
            EndPrev => {
                rel.second_prev_rel = id;
                rel.first_in_second_chain = first_in_chain;
            }
            EndNext => rel.second_next_rel = id,
        }
    }

    /// The node whose chain this pointer belongs to.
    fn compare_node(self, rel: &RelationshipRecord) -> NodeId {
        match self {
            StartPrev | StartNext => rel.first_node,
            EndPrev | EndNext => rel.second_node,
        }
    }

    fn other_side(self) -> Self {
        match self {
            StartPrev => StartNext,
            StartNext => StartPrev,
            EndPrev => EndNext,
            EndNext => EndPrev,
        }
    }

    fn is_first_in_chain(self, rel: &RelationshipRecord) -> bool {
        match self {
            StartPrev | StartNext => rel.first_in_first_chain,
            EndPrev | EndNext => rel.first_in_second_chain,
        }
    }

    /// The same pointer role on a neighbor's first-node side.
    fn on_first_side(self) -> Self {
        match self {
            StartPrev | EndPrev => StartPrev,
            StartNext | EndNext => StartNext,
        }
    }

    /// The same pointer role on a neighbor's second-node side.
    fn on_second_side(self) -> Self {
        match self {
            StartPrev | EndPrev => EndPrev,
            StartNext | EndNext => EndNext,
        }
    }
}

/// Chain length seen from one endpoint; stored in the prev field of the
/// chain head.
pub(crate) fn rel_count(node_id: NodeId, rel: &RelationshipRecord) -> u64 {
    if node_id == rel.first_node {
        rel.first_prev_rel
    } else {
        rel.second_prev_rel
    }
}

fn rel_is_first_in_chain(node_id: NodeId, rel: &RelationshipRecord) -> bool {
    (node_id == rel.first_node && rel.first_in_first_chain)
        || (node_id == rel.second_node && rel.first_in_second_chain)
}

/// The next pointer of `rel` on the side facing `node_id`.
fn next_on_side(rel: &RelationshipRecord, node_id: NodeId) -> Result<RelId> {
    if rel.first_node == node_id {
        Ok(rel.first_next_rel)
    } else if rel.second_node == node_id {
        Ok(rel.second_next_rel)
    } else {
        Err(GraphError::InvalidRecord(format!(
            "node {node_id} is neither start nor end node of {rel:?}"
        )))
    }
}

impl WriteTransaction {
    /// Creates a relationship between two nodes, splicing it at the head of
    /// both endpoint chains. Endpoints crossing the dense threshold are
    /// upgraded first.
    pub fn relationship_create(
        &mut self,
        id: RelId,
        rel_type: TokenId,
        first_node_id: NodeId,
        second_node_id: NodeId,
    ) -> Result<()> {
        {
            let mut change = self.node_records.get_or_load(first_node_id, ())?;
            if !change.for_changing_linkage()?.in_use {
                return Err(GraphError::State(format!(
                    "first node {first_node_id} is deleted and cannot be used to create a relationship"
                )));
            }
        }
        {
            let mut change = self.node_records.get_or_load(second_node_id, ())?;
            if !change.for_changing_linkage()?.in_use {
                return Err(GraphError::State(format!(
                    "second node {second_node_id} is deleted and cannot be used to create a relationship"
                )));
            }
        }
        self.convert_node_to_dense_if_necessary(first_node_id)?;
        self.convert_node_to_dense_if_necessary(second_node_id)?;
        {
            let mut change = self.rel_records.create(id, ())?;
            let rel = change.for_changing_linkage()?;
            rel.set_links(first_node_id, second_node_id, rel_type);
            rel.in_use = true;
            rel.created = true;
        }
        self.connect_relationship(first_node_id, second_node_id, id)
    }

    /// Deletes a relationship, unlinking it from all four chain sides, and
    /// returns the properties removed with it.
    pub fn rel_delete(&mut self, id: RelId) -> Result<BTreeMap<TokenId, PropertyValue>> {
        {
            let mut change = self.rel_records.get_or_load(id, ())?;
            if !change.for_changing_linkage()?.in_use {
                return Err(GraphError::State(format!(
                    "unable to delete relationship {id} since it is already deleted"
                )));
            }
        }
        let properties = self.delete_property_chain(PropertyOwner::Rel(id))?;
        let rel = {
            let change = self.rel_records.get_or_load(id, ())?;
            *change.for_reading_linkage()
        };
        self.disconnect_relationship(&rel)?;
        self.update_nodes_for_deleted_relationship(&rel)?;
        {
            let mut change = self.rel_records.get_or_load(id, ())?;
            change.for_changing_linkage()?.in_use = false;
        }
        Ok(properties)
    }

    fn connect_relationship(
        &mut self,
        first_node_id: NodeId,
        second_node_id: NodeId,
        rel_id: RelId,
    ) -> Result<()> {
        let (first_dense, first_next) = {
            let change = self.node_records.get_or_load(first_node_id, ())?;
            let node = change.for_reading_linkage();
            (node.dense, node.next_rel)
        };
        let (second_dense, second_next) = {
            let change = self.node_records.get_or_load(second_node_id, ())?;
            let node = change.for_reading_linkage();
            (node.dense, node.next_rel)
        };
        // A sparse node already heading its chain with this relationship
        // means the chain is corrupt.
        debug_assert!(first_next != rel_id || first_dense);
        debug_assert!(second_next != rel_id || second_dense);

        {
            let mut change = self.rel_records.get_or_load(rel_id, ())?;
            let rel = change.for_changing_linkage()?;
            if !first_dense {
                rel.first_next_rel = first_next;
            }
            if !second_dense {
                rel.second_next_rel = second_next;
            }
        }

        if !first_dense {
            self.connect_chain(first_node_id, first_next, rel_id)?;
        } else {
            self.connect_relationship_to_dense_node(first_node_id, rel_id)?;
        }

        if !second_dense {
            if first_node_id != second_node_id {
                self.connect_chain(second_node_id, second_next, rel_id)?;
            } else {
                // Loop on a sparse node: spliced once on the first side, the
                // second side mirrors the count.
                let mut change = self.rel_records.get_or_load(rel_id, ())?;
                let rel = change.for_changing_linkage()?;
                rel.first_in_first_chain = true;
                rel.second_prev_rel = rel.first_prev_rel;
            }
        } else if first_node_id != second_node_id {
            self.connect_relationship_to_dense_node(second_node_id, rel_id)?;
        }

        if !first_dense {
            let mut change = self.node_records.get_or_load(first_node_id, ())?;
            change.for_changing_linkage()?.next_rel = rel_id;
        }
        if !second_dense {
            let mut change = self.node_records.get_or_load(second_node_id, ())?;
            change.for_changing_linkage()?.next_rel = rel_id;
        }
        Ok(())
    }

    /// Splices `rel_id` in front of `first_rel_id` on the chain of
    /// `node_id`, moving the chain count onto the new head.
    fn connect_chain(&mut self, node_id: NodeId, first_rel_id: RelId, rel_id: RelId) -> Result<()> {
        let mut new_count = 1;
        if first_rel_id != NO_REL {
            let _lock = self.locks.lock_relationship(first_rel_id);
            let mut change = self.rel_records.get_or_load(first_rel_id, ())?;
            let first = change.for_changing_linkage()?;
            let mut matched = false;
            if first.first_node == node_id {
                new_count = first.first_prev_rel + 1;
                first.first_prev_rel = rel_id;
                first.first_in_first_chain = false;
                matched = true;
            }
            if first.second_node == node_id {
                new_count = first.second_prev_rel + 1;
                first.second_prev_rel = rel_id;
                first.first_in_second_chain = false;
                matched = true;
            }
            if !matched {
                return Err(GraphError::InvalidRecord(format!(
                    "node {node_id} does not match {first:?}"
                )));
            }
        }
        let mut change = self.rel_records.get_or_load(rel_id, ())?;
        let rel = change.for_changing_linkage()?;
        if rel.first_node == node_id {
            rel.first_prev_rel = new_count;
            rel.first_in_first_chain = true;
        }
        if rel.second_node == node_id {
            rel.second_prev_rel = new_count;
            rel.first_in_second_chain = true;
        }
        Ok(())
    }

    fn connect_relationship_to_dense_node(
        &mut self,
        node_id: NodeId,
        rel_id: RelId,
    ) -> Result<()> {
        let rel = {
            let change = self.rel_records.get_or_load(rel_id, ())?;
            *change.for_reading_linkage()
        };
        let group_id = self.get_or_create_relationship_group(node_id, rel.rel_type)?;
        let dir = direction_of(&rel, node_id);
        let next_in_bucket = {
            let mut change = self.group_records.get_or_load(group_id, rel.rel_type)?;
            dir.first(change.for_changing_data()?)
        };
        {
            let mut change = self.rel_records.get_or_load(rel_id, ())?;
            let rel = change.for_changing_linkage()?;
            if rel.first_node == node_id {
                rel.first_next_rel = next_in_bucket;
            }
            if rel.second_node == node_id {
                rel.second_next_rel = next_in_bucket;
            }
        }
        self.connect_chain(node_id, next_in_bucket, rel_id)?;
        let mut change = self.group_records.get_or_load(group_id, rel.rel_type)?;
        dir.set_first(change.for_changing_data()?, rel_id);
        Ok(())
    }

    /// Upgrades a node whose chain length has reached the dense threshold.
    /// The comparison uses the pre-insert count, so the upgrade fires on the
    /// insert after the threshold is reached; stored chains depend on that.
    pub(crate) fn convert_node_to_dense_if_necessary(&mut self, node_id: NodeId) -> Result<()> {
        let (dense, next_rel) = {
            let change = self.node_records.get_or_load(node_id, ())?;
            let node = change.for_reading_linkage();
            (node.dense, node.next_rel)
        };
        if dense || next_rel == NO_REL {
            return Ok(());
        }
        let rel = {
            let change = self.rel_records.get_or_load(next_rel, ())?;
            *change.for_reading_linkage()
        };
        if rel_count(node_id, &rel) >= u64::from(self.stores.dense_node_threshold()) {
            self.convert_node_to_dense(node_id, next_rel)?;
        }
        Ok(())
    }

    fn convert_node_to_dense(&mut self, node_id: NodeId, first_rel_id: RelId) -> Result<()> {
        {
            let mut change = self.node_records.get_or_load(node_id, ())?;
            let node = change.for_changing_linkage()?;
            node.dense = true;
            node.next_rel = NO_REL;
        }
        let mut rel_id = first_rel_id;
        while rel_id != NO_REL {
            let _lock = self.locks.lock_relationship(rel_id);
            let rel = {
                let mut change = self.rel_records.get_or_load(rel_id, ())?;
                *change.for_changing_linkage()?
            };
            // The old chain pointer must be read before the splice rewrites it.
            let next = next_on_side(&rel, node_id)?;
            self.connect_relationship_to_dense_node(node_id, rel_id)?;
            rel_id = next;
        }
        self.upgraded_dense_nodes.push(node_id);
        Ok(())
    }

    pub(crate) fn get_or_create_relationship_group(
        &mut self,
        node_id: NodeId,
        rel_type: TokenId,
    ) -> Result<u64> {
        if let Some(group_id) = self.find_relationship_group(node_id, rel_type)? {
            return Ok(group_id);
        }
        let first_group_id = {
            let change = self.node_records.get_or_load(node_id, ())?;
            let node = change.for_reading_linkage();
            debug_assert!(node.dense);
            node.next_rel
        };
        let id = self.stores.groups.next_id();
        {
            let mut change = self.group_records.create(id, rel_type)?;
            let record = change.for_changing_data()?;
            record.in_use = true;
            record.created = true;
            if first_group_id != NO_REL {
                record.next = first_group_id;
            }
        }
        if first_group_id != NO_REL {
            let mut change = self.group_records.get_or_load(first_group_id, rel_type)?;
            change.transient_mut().prev = id;
        }
        let mut change = self.node_records.get_or_load(node_id, ())?;
        change.for_changing_linkage()?.next_rel = id;
        Ok(id)
    }

    /// Walks a dense node's group chain looking for the group of a type,
    /// rebuilding the transient backward pointers as it goes.
    pub(crate) fn find_relationship_group(
        &mut self,
        node_id: NodeId,
        rel_type: TokenId,
    ) -> Result<Option<u64>> {
        let mut group_id = {
            let change = self.node_records.get_or_load(node_id, ())?;
            change.for_reading_linkage().next_rel
        };
        let mut previous_group_id = NO_REL;
        while group_id != NO_REL {
            let mut change = self.group_records.get_or_load(group_id, rel_type)?;
            let record = change.transient_mut();
            record.prev = previous_group_id;
            let (group_type, next) = (record.group_type, record.next);
            if group_type == rel_type {
                return Ok(Some(group_id));
            }
            previous_group_id = group_id;
            group_id = next;
        }
        Ok(None)
    }

    fn delete_group(&mut self, node_id: NodeId, group_id: u64) -> Result<()> {
        let (previous, next, rel_type) = {
            let change = self.group_records.get_or_load(group_id, 0)?;
            let record = change.for_reading_linkage();
            (record.prev, record.next, record.group_type)
        };
        if previous == NO_REL {
            // first group: the node points straight at the next one
            let mut change = self.node_records.get_or_load(node_id, ())?;
            change.for_changing_linkage()?.next_rel = next;
        } else {
            let mut change = self.group_records.get_or_load(previous, rel_type)?;
            change.for_changing_linkage()?.next = next;
        }
        if next != NO_REL {
            let mut change = self.group_records.get_or_load(next, rel_type)?;
            change.for_changing_linkage()?.prev = previous;
        }
        let mut change = self.group_records.get_or_load(group_id, rel_type)?;
        change.for_changing_data()?.in_use = false;
        Ok(())
    }

    fn disconnect_relationship(&mut self, rel: &RelationshipRecord) -> Result<()> {
        self.disconnect(rel, StartNext)?;
        self.disconnect(rel, StartPrev)?;
        self.disconnect(rel, EndNext)?;
        self.disconnect(rel, EndPrev)
    }

    /// Rewrites the pointer of the neighbor on `pointer.other_side()` so it
    /// skips `rel`.
    fn disconnect(
        &mut self,
        rel: &RelationshipRecord,
        pointer: RelationshipConnection,
    ) -> Result<()> {
        let other_rel_id = pointer.other_side().get(rel);
        if other_rel_id == NO_REL {
            return Ok(());
        }
        let _lock = self.locks.lock_relationship(other_rel_id);
        let new_id = pointer.get(rel);
        let new_is_first = pointer.is_first_in_chain(rel);
        let compare_node = pointer.compare_node(rel);
        let mut change = self.rel_records.get_or_load(other_rel_id, ())?;
        let other = change.for_changing_linkage()?;
        let mut matched = false;
        if other.first_node == compare_node {
            pointer.on_first_side().set(other, new_id, new_is_first);
            matched = true;
        }
        if other.second_node == compare_node {
            pointer.on_second_side().set(other, new_id, new_is_first);
            matched = true;
        }
        if !matched {
            return Err(GraphError::InvalidRecord(format!(
                "{other:?} does not match {rel:?}"
            )));
        }
        Ok(())
    }

    fn update_nodes_for_deleted_relationship(&mut self, rel: &RelationshipRecord) -> Result<()> {
        let first_node_id = rel.first_node;
        let second_node_id = rel.second_node;
        let loop_rel = first_node_id == second_node_id;

        let start_dense = {
            let change = self.node_records.get_or_load(first_node_id, ())?;
            change.for_reading_linkage().dense
        };
        if !start_dense {
            if rel.first_in_first_chain {
                let mut change = self.node_records.get_or_load(first_node_id, ())?;
                change.for_changing_linkage()?.next_rel = rel.first_next_rel;
            }
            let first_rel_id = {
                let change = self.node_records.get_or_load(first_node_id, ())?;
                change.for_reading_linkage().next_rel
            };
            self.decrement_total_relationship_count(first_node_id, rel, first_rel_id)?;
        } else {
            let group_id = self
                .find_relationship_group(first_node_id, rel.rel_type)?
                .ok_or_else(|| {
                    GraphError::InvalidRecord(format!(
                        "relationship group of type {} missing on node {first_node_id}",
                        rel.rel_type
                    ))
                })?;
            let dir = direction_of(rel, first_node_id);
            if rel.first_in_first_chain {
                let empty = {
                    let mut change = self.group_records.get_or_load(group_id, rel.rel_type)?;
                    let group = change.for_changing_data()?;
                    dir.set_first(group, rel.first_next_rel);
                    group.is_empty()
                };
                if empty {
                    self.delete_group(first_node_id, group_id)?;
                }
            }
            let head = {
                let mut change = self.group_records.get_or_load(group_id, rel.rel_type)?;
                dir.first(change.for_reading_data()?)
            };
            self.decrement_total_relationship_count(first_node_id, rel, head)?;
        }

        let end_dense = {
            let change = self.node_records.get_or_load(second_node_id, ())?;
            change.for_reading_linkage().dense
        };
        if !end_dense {
            if rel.first_in_second_chain {
                let mut change = self.node_records.get_or_load(second_node_id, ())?;
                change.for_changing_linkage()?.next_rel = rel.second_next_rel;
            }
            if !loop_rel {
                let first_rel_id = {
                    let change = self.node_records.get_or_load(second_node_id, ())?;
                    change.for_reading_linkage().next_rel
                };
                self.decrement_total_relationship_count(second_node_id, rel, first_rel_id)?;
            }
        } else {
            let group_id = self.find_relationship_group(second_node_id, rel.rel_type)?;
            let dir = direction_of(rel, second_node_id);
            // A loop's group may already be gone from handling the start side.
            if group_id.is_none() && !loop_rel {
                return Err(GraphError::InvalidRecord(format!(
                    "relationship group of type {} missing on node {second_node_id}",
                    rel.rel_type
                )));
            }
            if let Some(group_id) = group_id {
                if rel.first_in_second_chain {
                    let empty = {
                        let mut change = self.group_records.get_or_load(group_id, rel.rel_type)?;
                        let group = change.for_changing_data()?;
                        dir.set_first(group, rel.second_next_rel);
                        group.is_empty()
                    };
                    if empty {
                        self.delete_group(second_node_id, group_id)?;
                    }
                }
                if !loop_rel {
                    let head = {
                        let mut change = self.group_records.get_or_load(group_id, rel.rel_type)?;
                        dir.first(change.for_reading_data()?)
                    };
                    self.decrement_total_relationship_count(second_node_id, rel, head)?;
                }
            }
        }
        Ok(())
    }

    /// Moves the chain count of `node_id`'s chain one down, placing it on
    /// the record `first_rel_id` which heads the chain after the deletion.
    fn decrement_total_relationship_count(
        &mut self,
        node_id: NodeId,
        rel: &RelationshipRecord,
        first_rel_id: RelId,
    ) -> Result<bool> {
        if first_rel_id == NO_REL {
            return Ok(true);
        }
        let deleted_was_head = rel_is_first_in_chain(node_id, rel);
        let _lock = if !deleted_was_head {
            Some(self.locks.lock_relationship(first_rel_id))
        } else {
            None
        };
        let mut change = self.rel_records.get_or_load(first_rel_id, ())?;
        let first = change.for_changing_linkage()?;
        if first.first_node == node_id {
            let count = if deleted_was_head {
                rel_count(node_id, rel)
            } else {
                first.first_prev_rel
            };
            first.first_prev_rel = count - 1;
            first.first_in_first_chain = true;
        }
        if first.second_node == node_id {
            let count = if deleted_was_head {
                rel_count(node_id, rel)
            } else {
                first.second_prev_rel
            };
            first.second_prev_rel = count - 1;
            first.first_in_second_chain = true;
        }
        Ok(false)
    }
}
