//! Commit: executes the prepared command stream against the stores in a
//! fixed phase order, under node locks collected into a scoped group, then
//! feeds the label-scan index, the property indexes and the caches.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{GraphError, Result};
use crate::indexing::LazyIndexUpdates;
use crate::lock::{LockGroup, LockType};
use crate::scan::NodeLabelUpdate;
use crate::store::labels;
use crate::store::records::{PropertyOwner, TxId};
use crate::tx::command::{Mode, PropertyCommand, RelationshipCommand};
use crate::tx::WriteTransaction;

impl WriteTransaction {
    /// Applies this transaction to the stores. Live commits require a
    /// preceding `prepare` and the next transaction id in sequence;
    /// recovered commits re-execute injected commands with id allocation
    /// suppressed.
    pub fn commit(&mut self, commit_tx_id: TxId) -> Result<()> {
        if self.recovered {
            let stores = Arc::clone(&self.stores);
            let was_in_recovery = stores.in_recovery();
            stores.set_recovery(true);
            let result = self.apply_commit(true, commit_tx_id);
            stores.set_recovery(was_in_recovery);
            self.clear();
            return result;
        }
        if !self.prepared {
            return Err(GraphError::Tx(format!(
                "cannot commit non-prepared transaction [{}]",
                self.identifier()
            )));
        }
        if commit_tx_id != self.stores.last_committed_tx() + 1 {
            return Err(GraphError::Tx(format!(
                "transaction id {} is not the next transaction ({})",
                commit_tx_id,
                self.stores.last_committed_tx()
            )));
        }
        let result = self.apply_commit(false, commit_tx_id);
        self.clear();
        result
    }

    fn apply_commit(&mut self, recovered: bool, commit_tx_id: TxId) -> Result<()> {
        let start = Instant::now();
        let mut lock_group = LockGroup::new();
        self.committed = true;
        let stores = Arc::clone(&self.stores);
        let cache = Arc::clone(&self.cache);

        self.rel_type_token_commands.sort_by_key(|c| c.key());
        for command in &self.rel_type_token_commands {
            stores.rel_type_tokens.update_record(&command.after);
            if recovered {
                cache.add_relationship_type_token(
                    stores.rel_type_tokens.get_token(command.after.id)?,
                );
            }
        }
        self.label_token_commands.sort_by_key(|c| c.key());
        for command in &self.label_token_commands {
            stores.label_tokens.update_record(&command.after);
            if recovered {
                cache.add_label_token(stores.label_tokens.get_token(command.after.id)?);
            }
        }
        self.property_key_token_commands.sort_by_key(|c| c.key());
        for command in &self.property_key_token_commands {
            stores.props.key_tokens.update_record(&command.after);
            if recovered {
                cache.add_property_key_token(stores.props.key_tokens.get_token(command.after.id)?);
            }
        }

        self.rel_commands.sort_by_key(|c| c.key());
        self.prop_commands.sort_by_key(|c| c.key());
        self.execute_phase(&mut lock_group, Mode::Create, recovered)?;
        self.execute_phase(&mut lock_group, Mode::Update, recovered)?;
        self.execute_phase(&mut lock_group, Mode::Delete, true)?;

        let label_updates = self.gather_label_updates_sorted();
        if !label_updates.is_empty() {
            self.update_label_scan_store(&label_updates)?;
            cache.apply_label_updates(&label_updates);
        }

        if !self.node_commands.is_empty() || !self.prop_commands.is_empty() {
            self.indexes.update_indexes(LazyIndexUpdates::new(
                Arc::clone(&stores),
                self.prop_commands.clone(),
                self.node_commands.clone(),
            ));
        }

        // Schema rules run after the property-index updates: a population
        // job started by a rule created in this transaction must see this
        // transaction's properties only through its initial scan, not a
        // second time through the update channel.
        for command in &mut self.schema_commands {
            command.tx_id = commit_tx_id;
            command.execute(&stores)?;
            match command.mode() {
                Mode::Delete => cache.remove_schema_rule_from_cache(command.key()),
                _ => cache.add_schema_rule(command.rule.clone()),
            }
        }

        if let Some(command) = &self.graph_command {
            command.execute(&stores)?;
            if recovered {
                cache.remove_graph_properties_from_cache();
            }
        }

        if !recovered {
            self.update_first_relationships();
            self.state.commit_cows();
        }
        stores.set_last_committed_tx(commit_tx_id);
        if recovered {
            stores.update_id_generators();
        }
        drop(lock_group);

        info!(
            tx_id = commit_tx_id,
            recovered,
            duration_ms = start.elapsed().as_millis() as u64,
            "transaction committed"
        );
        Ok(())
    }

    /// Runs every command of one mode, in the fixed collection order:
    /// properties, relationships, nodes (id-sorted), groups. Node-level
    /// write locks join the commit's lock group.
    fn execute_phase(
        &self,
        lock_group: &mut LockGroup,
        mode: Mode,
        invalidate_cache: bool,
    ) -> Result<()> {
        for command in &self.prop_commands {
            if command.mode() != mode {
                continue;
            }
            if let Some(node_id) = command.node_id() {
                lock_group.add(self.locks.acquire_node_lock(node_id, LockType::Write));
            }
            command.execute(&self.stores)?;
            if invalidate_cache {
                self.invalidate_property_owner(command);
            }
        }
        for command in &self.rel_commands {
            if command.mode() != mode {
                continue;
            }
            command.execute(&self.stores)?;
            if invalidate_cache {
                self.invalidate_relationship(command);
            }
        }
        for command in self.node_commands.values() {
            if command.mode() != mode {
                continue;
            }
            lock_group.add(self.locks.acquire_node_lock(command.key(), LockType::Write));
            command.execute(&self.stores)?;
            if invalidate_cache {
                self.cache.remove_node_from_cache(command.key());
            }
        }
        for command in &self.group_commands {
            if command.mode() != mode {
                continue;
            }
            command.execute(&self.stores)?;
        }
        Ok(())
    }

    fn invalidate_property_owner(&self, command: &PropertyCommand) {
        match command.after.owner {
            PropertyOwner::Node(node_id) => self.cache.remove_node_from_cache(node_id),
            PropertyOwner::Rel(rel_id) => self.cache.remove_relationship_from_cache(rel_id),
            PropertyOwner::Graph => self.cache.remove_graph_properties_from_cache(),
            PropertyOwner::None => {}
        }
    }

    fn invalidate_relationship(&self, command: &RelationshipCommand) {
        self.cache.remove_relationship_from_cache(command.key());
        if command.mode() == Mode::Delete {
            // cached endpoint nodes must stop pointing at the deleted record
            self.cache.patch_deleted_relationship_nodes(
                command.key(),
                command.after.first_node,
                command.after.first_next_rel,
                command.after.second_node,
                command.after.second_next_rel,
            );
        }
    }

    /// One update per node whose label field changed, skipping bit-identical
    /// inline fields and spilled sets that were never loaded, sorted by node
    /// id for append-friendly label-scan writes.
    fn gather_label_updates_sorted(&self) -> Vec<NodeLabelUpdate> {
        let mut updates = Vec::new();
        for command in self.node_commands.values() {
            if labels::is_inline(command.before.label_field)
                && labels::is_inline(command.after.label_field)
                && command.before.label_field == command.after.label_field
            {
                continue;
            }
            let (Some(labels_before), Some(labels_after)) = (
                labels::labels_if_loaded(&command.before),
                labels::labels_if_loaded(&command.after),
            ) else {
                continue;
            };
            updates.push(NodeLabelUpdate {
                node_id: command.key(),
                labels_before,
                labels_after,
            });
        }
        updates.sort_by_key(|u| u.node_id);
        updates
    }

    fn update_label_scan_store(&self, updates: &[NodeLabelUpdate]) -> Result<()> {
        let mut writer = self.label_scan.new_writer();
        for update in updates {
            writer
                .write(update)
                .map_err(|e| GraphError::Storage(e.to_string()))?;
        }
        debug!(updates = updates.len(), "label scan store updated");
        Ok(())
    }

    fn update_first_relationships(&self) {
        for change in self.node_records.changes() {
            let record = change.record();
            self.state
                .set_first_ids(record.id, record.next_rel, record.next_prop);
        }
    }
}
