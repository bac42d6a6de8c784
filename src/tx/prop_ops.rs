//! Property chain surgery, shared by nodes, relationships and the graph
//! singleton through the owner parameter. A record packs blocks up to the
//! payload size; the head record is the only insertion candidate, so chains
//! grow at the front.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::store::props::{PropertyBlock, PropertyValue, PROPERTY_PAYLOAD_SIZE};
use crate::store::records::{NodeId, PropId, PropertyOwner, RelId, TokenId, NO_PROP};
use crate::tx::WriteTransaction;

impl WriteTransaction {
    fn owner_next_prop(&mut self, owner: PropertyOwner) -> Result<PropId> {
        match owner {
            PropertyOwner::Node(id) => {
                let change = self.node_records.get_or_load(id, ())?;
                Ok(change.for_reading_linkage().next_prop)
            }
            PropertyOwner::Rel(id) => {
                let change = self.rel_records.get_or_load(id, ())?;
                Ok(change.for_reading_linkage().next_prop)
            }
            PropertyOwner::Graph => {
                let change = self.graph_changes().get_or_load(0, ())?;
                Ok(change.for_reading_linkage().next_prop)
            }
            PropertyOwner::None => Err(GraphError::InvalidArgument(
                "property chain has no owner".into(),
            )),
        }
    }

    fn owner_set_next_prop(&mut self, owner: PropertyOwner, next_prop: PropId) -> Result<()> {
        match owner {
            PropertyOwner::Node(id) => {
                let mut change = self.node_records.get_or_load(id, ())?;
                change.for_changing_linkage()?.next_prop = next_prop;
            }
            PropertyOwner::Rel(id) => {
                let mut change = self.rel_records.get_or_load(id, ())?;
                change.for_changing_linkage()?.next_prop = next_prop;
            }
            PropertyOwner::Graph => {
                let mut change = self.graph_changes().get_or_load(0, ())?;
                change.for_changing_linkage()?.next_prop = next_prop;
            }
            PropertyOwner::None => {
                return Err(GraphError::InvalidArgument(
                    "property chain has no owner".into(),
                ))
            }
        }
        Ok(())
    }

    pub fn node_add_property(
        &mut self,
        node_id: NodeId,
        key: TokenId,
        value: PropertyValue,
    ) -> Result<()> {
        {
            let change = self.node_records.get_or_load(node_id, ())?;
            if !change.for_reading_linkage().in_use {
                return Err(GraphError::State(format!(
                    "property add on node {node_id} illegal since it has been deleted"
                )));
            }
        }
        self.add_property(PropertyOwner::Node(node_id), key, value)
    }

    pub fn rel_add_property(
        &mut self,
        rel_id: RelId,
        key: TokenId,
        value: PropertyValue,
    ) -> Result<()> {
        {
            let change = self.rel_records.get_or_load(rel_id, ())?;
            if !change.for_reading_linkage().in_use {
                return Err(GraphError::State(format!(
                    "property add on relationship {rel_id} illegal since it has been deleted"
                )));
            }
        }
        self.add_property(PropertyOwner::Rel(rel_id), key, value)
    }

    pub fn graph_add_property(&mut self, key: TokenId, value: PropertyValue) -> Result<()> {
        self.add_property(PropertyOwner::Graph, key, value)
    }

    pub fn node_change_property(
        &mut self,
        node_id: NodeId,
        key: TokenId,
        value: PropertyValue,
    ) -> Result<()> {
        {
            let change = self.node_records.get_or_load(node_id, ())?;
            if !change.for_reading_linkage().in_use {
                return Err(GraphError::State(format!(
                    "property change on node {node_id} illegal since it has been deleted"
                )));
            }
        }
        self.change_property(PropertyOwner::Node(node_id), key, value)
    }

    pub fn rel_change_property(
        &mut self,
        rel_id: RelId,
        key: TokenId,
        value: PropertyValue,
    ) -> Result<()> {
        {
            let change = self.rel_records.get_or_load(rel_id, ())?;
            if !change.for_reading_linkage().in_use {
                return Err(GraphError::State(format!(
                    "property change on relationship {rel_id} illegal since it has been deleted"
                )));
            }
        }
        self.change_property(PropertyOwner::Rel(rel_id), key, value)
    }

    pub fn graph_change_property(&mut self, key: TokenId, value: PropertyValue) -> Result<()> {
        self.change_property(PropertyOwner::Graph, key, value)
    }

    pub fn node_remove_property(&mut self, node_id: NodeId, key: TokenId) -> Result<()> {
        {
            let change = self.node_records.get_or_load(node_id, ())?;
            if !change.for_reading_linkage().in_use {
                return Err(GraphError::State(format!(
                    "property remove on node {node_id} illegal since it has been deleted"
                )));
            }
        }
        self.remove_property(PropertyOwner::Node(node_id), key)
    }

    pub fn rel_remove_property(&mut self, rel_id: RelId, key: TokenId) -> Result<()> {
        {
            let change = self.rel_records.get_or_load(rel_id, ())?;
            if !change.for_reading_linkage().in_use {
                return Err(GraphError::State(format!(
                    "property remove on relationship {rel_id} illegal since it has been deleted"
                )));
            }
        }
        self.remove_property(PropertyOwner::Rel(rel_id), key)
    }

    pub fn graph_remove_property(&mut self, key: TokenId) -> Result<()> {
        self.remove_property(PropertyOwner::Graph, key)
    }

    fn add_property(
        &mut self,
        owner: PropertyOwner,
        key: TokenId,
        value: PropertyValue,
    ) -> Result<()> {
        if cfg!(debug_assertions) {
            self.assert_property_chain(owner)?;
        }
        let block = self.stores.props.encode_value(key, &value);
        self.add_property_block_to_owner(owner, block)?;
        if cfg!(debug_assertions) {
            self.assert_property_chain(owner)?;
        }
        Ok(())
    }

    /// Places a block in the chain: appended to the head record when it
    /// fits, otherwise into a fresh record spliced at the front.
    pub(crate) fn add_property_block_to_owner(
        &mut self,
        owner: PropertyOwner,
        block: PropertyBlock,
    ) -> Result<()> {
        let block_size = block.size();
        let first_prop = self.owner_next_prop(owner)?;
        let mut host = None;
        if first_prop != NO_PROP {
            let mut change = self.prop_records.get_or_load(first_prop, owner)?;
            let record = change.for_reading_linkage();
            debug_assert_eq!(record.prev_prop, NO_PROP);
            debug_assert!(record.in_use);
            debug_assert!(record.size() > 0);
            if record.size() + block_size <= PROPERTY_PAYLOAD_SIZE {
                let record = change.for_changing_data()?;
                record.add_block(block.clone());
                record.owner = owner;
                host = Some(first_prop);
            }
        }
        if host.is_none() {
            // head record is full, make a new one
            let new_id = self.stores.props.next_id();
            {
                let mut change = self.prop_records.create(new_id, owner)?;
                change.for_changing_data()?;
            }
            if first_prop != NO_PROP {
                {
                    let mut change = self.prop_records.get_or_load(first_prop, owner)?;
                    let previous_head = change.for_changing_linkage()?;
                    debug_assert_eq!(previous_head.prev_prop, NO_PROP);
                    previous_head.prev_prop = new_id;
                    previous_head.owner = owner;
                }
                let mut change = self.prop_records.get_or_load(new_id, owner)?;
                change.for_changing_linkage()?.next_prop = first_prop;
            }
            self.owner_set_next_prop(owner, new_id)?;
            let mut change = self.prop_records.get_or_load(new_id, owner)?;
            let record = change.for_changing_data()?;
            record.add_block(block);
            record.in_use = true;
        }
        Ok(())
    }

    fn change_property(
        &mut self,
        owner: PropertyOwner,
        key: TokenId,
        value: PropertyValue,
    ) -> Result<()> {
        if cfg!(debug_assertions) {
            self.assert_property_chain(owner)?;
        }
        let stores = Arc::clone(&self.stores);
        let prop_id = self.find_property_record_containing(owner, key)?;
        let overflow = {
            let mut change = self.prop_records.get_or_load(prop_id, owner)?;
            let record = change.for_changing_data()?;
            if !record.in_use {
                return Err(GraphError::State(format!(
                    "unable to change property {prop_id} since it has been deleted"
                )));
            }
            let Some(index) = record.block_index(key) else {
                return Err(GraphError::State(format!(
                    "property with key {key} is not present in property record {prop_id}"
                )));
            };
            record.owner = owner;
            let released: Vec<_> = record.blocks[index].value_records.drain(..).collect();
            for mut value_record in released {
                debug_assert!(value_record.in_use);
                value_record.in_use = false;
                record.deleted_records.push(value_record);
            }
            record.blocks[index] = stores.props.encode_value(key, &value);
            if record.size() > PROPERTY_PAYLOAD_SIZE {
                // The re-encoded block no longer fits here; it moves
                // elsewhere in the chain. The record cannot end up empty: a
                // sole block always fits an empty record.
                record.remove_block(key)
            } else {
                None
            }
        };
        if let Some(block) = overflow {
            self.add_property_block_to_owner(owner, block)?;
        }
        if cfg!(debug_assertions) {
            self.assert_property_chain(owner)?;
        }
        Ok(())
    }

    fn remove_property(&mut self, owner: PropertyOwner, key: TokenId) -> Result<()> {
        if cfg!(debug_assertions) {
            self.assert_property_chain(owner)?;
        }
        let prop_id = self.find_property_record_containing(owner, key)?;
        let remaining = {
            let mut change = self.prop_records.get_or_load(prop_id, owner)?;
            let record = change.for_changing_data()?;
            if !record.in_use {
                return Err(GraphError::State(format!(
                    "unable to delete property {prop_id} since it is already deleted"
                )));
            }
            let Some(mut block) = record.remove_block(key) else {
                return Err(GraphError::State(format!(
                    "property with key {key} is not present in property record {prop_id}"
                )));
            };
            for mut value_record in block.value_records.drain(..) {
                debug_assert!(value_record.in_use);
                value_record.in_use = false;
                record.deleted_records.push(value_record);
            }
            record.owner = owner;
            record.size()
        };
        if remaining == 0 {
            self.unlink_property_record(owner, prop_id)?;
        }
        if cfg!(debug_assertions) {
            self.assert_property_chain(owner)?;
        }
        Ok(())
    }

    fn unlink_property_record(&mut self, owner: PropertyOwner, prop_id: PropId) -> Result<()> {
        let (prev_prop, next_prop) = {
            let change = self.prop_records.get_or_load(prop_id, owner)?;
            let record = change.for_reading_linkage();
            debug_assert_eq!(record.size(), 0);
            (record.prev_prop, record.next_prop)
        };
        if self.owner_next_prop(owner)? == prop_id {
            debug_assert_eq!(prev_prop, NO_PROP);
            self.owner_set_next_prop(owner, next_prop)?;
        }
        if prev_prop != NO_PROP {
            let mut change = self.prop_records.get_or_load(prev_prop, owner)?;
            let record = change.for_changing_linkage()?;
            debug_assert!(record.in_use);
            record.next_prop = next_prop;
            record.owner = owner;
        }
        if next_prop != NO_PROP {
            let mut change = self.prop_records.get_or_load(next_prop, owner)?;
            let record = change.for_changing_linkage()?;
            debug_assert!(record.in_use);
            record.prev_prop = prev_prop;
            record.owner = owner;
        }
        let mut change = self.prop_records.get_or_load(prop_id, owner)?;
        let record = change.for_changing_linkage()?;
        record.in_use = false;
        // The store never writes linkage of records going out of use; the
        // reset keeps the staged image consistent for chain validation.
        record.prev_prop = NO_PROP;
        record.next_prop = NO_PROP;
        record.owner = owner;
        Ok(())
    }

    fn find_property_record_containing(
        &mut self,
        owner: PropertyOwner,
        key: TokenId,
    ) -> Result<PropId> {
        let mut prop_id = self.owner_next_prop(owner)?;
        while prop_id != NO_PROP {
            let change = self.prop_records.get_or_load(prop_id, owner)?;
            let record = change.for_reading_linkage();
            if record.block(key).is_some() {
                return Ok(prop_id);
            }
            prop_id = record.next_prop;
        }
        Err(GraphError::State(format!(
            "no property record in the chain of {owner:?} contains a property with key {key}"
        )))
    }

    /// Deletes an owner's whole chain, returning the removed properties
    /// decoded from the before images.
    pub(crate) fn delete_property_chain(
        &mut self,
        owner: PropertyOwner,
    ) -> Result<BTreeMap<TokenId, PropertyValue>> {
        let stores = Arc::clone(&self.stores);
        let mut removed = BTreeMap::new();
        let mut next_prop = self.owner_next_prop(owner)?;
        while next_prop != NO_PROP {
            let mut change = self.prop_records.get_or_load(next_prop, owner)?;
            change.for_changing_data()?;
            let before_blocks: Vec<_> = change
                .get_before()
                .map(|before| before.blocks.to_vec())
                .unwrap_or_default();
            for block in &before_blocks {
                removed.insert(block.key, stores.props.value_of(block)?);
            }
            let record = change.for_changing_data()?;
            let blocks: Vec<_> = record.blocks.drain(..).collect();
            for mut block in blocks {
                for mut value_record in block.value_records.drain(..) {
                    debug_assert!(value_record.in_use);
                    value_record.in_use = false;
                    record.deleted_records.push(value_record);
                }
            }
            next_prop = record.next_prop;
            record.in_use = false;
            record.owner = owner;
        }
        Ok(removed)
    }

    /// Walks the chain from the owner's head, checking use bits and the
    /// symmetry of every prev/next pair. Debug builds run this around every
    /// chain mutation.
    pub(crate) fn assert_property_chain(&mut self, owner: PropertyOwner) -> Result<()> {
        let mut links = Vec::new();
        let mut next = self.owner_next_prop(owner)?;
        while next != NO_PROP {
            let change = self.prop_records.get_or_load(next, owner)?;
            let record = change.for_reading_linkage();
            if !record.in_use {
                return Err(GraphError::InvalidRecord(format!(
                    "property record {next} in the chain of {owner:?} is not in use"
                )));
            }
            links.push((record.id, record.prev_prop, record.next_prop));
            next = record.next_prop;
        }
        let Some(&(first_id, first_prev, _)) = links.first() else {
            return Ok(());
        };
        if first_prev != NO_PROP {
            return Err(GraphError::InvalidRecord(format!(
                "head property record {first_id} of {owner:?} has a previous record"
            )));
        }
        for pair in links.windows(2) {
            let (previous_id, _, previous_next) = pair[0];
            let (current_id, current_prev, _) = pair[1];
            if previous_next != current_id || current_prev != previous_id {
                return Err(GraphError::InvalidRecord(format!(
                    "property chain of {owner:?} broken between {previous_id} and {current_id}"
                )));
            }
        }
        Ok(())
    }
}
