//! Rollback: returns ids reserved by created records to their allocators
//! and invalidates the caches of everything touched, so no caller observes
//! aborted state.

use tracing::warn;

use crate::error::{GraphError, Result};
use crate::store::props::BlockPayload;
use crate::store::records::PropertyOwner;
use crate::tx::WriteTransaction;

impl WriteTransaction {
    pub fn rollback(&mut self) -> Result<()> {
        if self.committed {
            return Err(GraphError::Tx(format!(
                "cannot rollback partially committed transaction [{}]; recover and commit",
                self.identifier()
            )));
        }
        let result = self.apply_rollback();
        self.clear();
        warn!(tx_id = self.identifier(), "transaction rolled back");
        result
    }

    fn apply_rollback(&mut self) -> Result<()> {
        let free_ids = self.stores.free_ids_during_rollback();

        if let Some(records) = &self.rel_type_token_records {
            for record in records.values() {
                if record.created {
                    if free_ids {
                        self.stores.rel_type_tokens.free_id(record.id);
                    }
                    for name_record in &record.name_records {
                        if name_record.created {
                            self.stores.rel_type_tokens.free_name_id(name_record.id);
                        }
                    }
                }
                self.cache.remove_relationship_type_from_cache(record.id);
            }
        }
        if let Some(records) = &self.label_token_records {
            for record in records.values() {
                if record.created {
                    if free_ids {
                        self.stores.label_tokens.free_id(record.id);
                    }
                    for name_record in &record.name_records {
                        if name_record.created {
                            self.stores.label_tokens.free_name_id(name_record.id);
                        }
                    }
                }
            }
        }
        for change in self.node_records.changes() {
            let record = change.record();
            if free_ids && record.created {
                self.stores.nodes.free_id(record.id);
            }
            self.cache.remove_node_from_cache(record.id);
        }
        for change in self.rel_records.changes() {
            let record = change.record();
            if free_ids && change.is_created() {
                self.stores.rels.free_id(change.key());
            }
            self.cache.remove_relationship_from_cache(change.key());
            self.cache.patch_deleted_relationship_nodes(
                change.key(),
                record.first_node,
                record.first_next_rel,
                record.second_node,
                record.second_next_rel,
            );
        }
        if self.graph_record.is_some() {
            self.cache.remove_graph_properties_from_cache();
        }
        if let Some(records) = &self.property_key_token_records {
            for record in records.values() {
                if record.created {
                    if free_ids {
                        self.stores.props.key_tokens.free_id(record.id);
                    }
                    for name_record in &record.name_records {
                        if name_record.created {
                            self.stores.props.key_tokens.free_name_id(name_record.id);
                        }
                    }
                }
            }
        }
        for change in self.prop_records.changes() {
            let record = change.record();
            match record.owner {
                PropertyOwner::Node(node_id) => self.cache.remove_node_from_cache(node_id),
                PropertyOwner::Rel(rel_id) => self.cache.remove_relationship_from_cache(rel_id),
                _ => {}
            }
            if record.created {
                if free_ids {
                    self.stores.props.free_id(record.id);
                }
                for block in &record.blocks {
                    for value_record in &block.value_records {
                        if !value_record.created {
                            continue;
                        }
                        match block.payload {
                            BlockPayload::DynamicString { .. } => {
                                self.stores.props.free_string_block_id(value_record.id)
                            }
                            BlockPayload::DynamicBytes { .. } => {
                                self.stores.props.free_array_block_id(value_record.id)
                            }
                            _ => {
                                return Err(GraphError::InvalidRecord(format!(
                                    "created value record {} on an inline block",
                                    value_record.id
                                )))
                            }
                        }
                    }
                }
            }
        }
        for change in self.schema_changes.changes() {
            if free_ids {
                for record in change.record() {
                    if record.created {
                        self.stores.schema.free_id(record.id);
                    }
                }
            }
        }
        for change in self.group_records.changes() {
            if free_ids && change.is_created() {
                self.stores.groups.free_id(change.key());
            }
        }
        Ok(())
    }
}
