//! Prepare: materializes the change buffer into a totally ordered command
//! list, appends it to the log, and validates what can only be validated
//! once the full write set is known.

use tracing::debug;

use crate::error::{GraphError, Result};
use crate::tx::command::{
    Command, GraphCommand, NodeCommand, PropertyCommand, RelationshipCommand,
    RelationshipGroupCommand, SchemaRuleCommand, TokenCommand,
};
use crate::tx::WriteTransaction;

impl WriteTransaction {
    /// Builds one command per touched record, in dependency order: tokens
    /// first, then primitives, then schema rules and groups. The commands
    /// are handed to the log sink in the same order.
    pub fn prepare(&mut self) -> Result<()> {
        if self.committed {
            return Err(GraphError::Tx(format!(
                "cannot prepare committed transaction [{}]",
                self.identifier()
            )));
        }
        if self.prepared {
            return Err(GraphError::Tx(format!(
                "cannot prepare prepared transaction [{}]",
                self.identifier()
            )));
        }
        self.prepared = true;

        let expected = self.node_records.change_size()
            + self.rel_records.change_size()
            + self.prop_records.change_size()
            + self.schema_changes.change_size()
            + self.group_records.change_size()
            + self.rel_type_token_records.as_ref().map_or(0, |r| r.len())
            + self.label_token_records.as_ref().map_or(0, |r| r.len())
            + self
                .property_key_token_records
                .as_ref()
                .map_or(0, |r| r.len())
            + usize::from(
                self.graph_record
                    .as_ref()
                    .is_some_and(|g| g.change_size() > 0),
            );
        let mut commands = Vec::with_capacity(expected);

        if let Some(records) = &self.rel_type_token_records {
            for record in records.values() {
                let command = TokenCommand {
                    after: record.clone(),
                };
                self.rel_type_token_commands.push(command.clone());
                commands.push(Command::RelationshipTypeToken(command));
            }
        }
        if let Some(records) = &self.label_token_records {
            for record in records.values() {
                let command = TokenCommand {
                    after: record.clone(),
                };
                self.label_token_commands.push(command.clone());
                commands.push(Command::LabelToken(command));
            }
        }
        for change in self.node_records.changes() {
            let record = change.record();
            self.validator.validate_node_record(record)?;
            let before = change.before().cloned().ok_or_else(|| {
                GraphError::InvalidRecord(format!(
                    "node {} changed without a before image",
                    change.key()
                ))
            })?;
            let command = NodeCommand {
                before,
                after: record.clone(),
            };
            self.node_commands.insert(change.key(), command.clone());
            commands.push(Command::Node(command));
        }
        for node_id in &self.upgraded_dense_nodes {
            self.cache.remove_node_from_cache(*node_id);
        }
        for change in self.rel_records.changes() {
            let command = RelationshipCommand {
                after: *change.record(),
            };
            self.rel_commands.push(command);
            commands.push(Command::Relationship(command));
        }
        if let Some(graph_record) = &self.graph_record {
            for change in graph_record.changes() {
                let command = GraphCommand {
                    after: *change.record(),
                };
                self.graph_command = Some(command);
                commands.push(Command::Graph(command));
            }
        }
        if let Some(records) = &self.property_key_token_records {
            for record in records.values() {
                let command = TokenCommand {
                    after: record.clone(),
                };
                self.property_key_token_commands.push(command.clone());
                commands.push(Command::PropertyKeyToken(command));
            }
        }
        for change in self.prop_records.changes() {
            let before = change.before().cloned().ok_or_else(|| {
                GraphError::InvalidRecord(format!(
                    "property record {} changed without a before image",
                    change.key()
                ))
            })?;
            let command = PropertyCommand {
                before,
                after: change.record().clone(),
            };
            self.prop_commands.push(command.clone());
            commands.push(Command::Property(command));
        }
        for change in self.schema_changes.changes() {
            let rule = change.extra().cloned().ok_or_else(|| {
                GraphError::InvalidRecord(format!(
                    "schema change {} has no rule attached",
                    change.key()
                ))
            })?;
            self.validator.validate_schema_rule(&rule)?;
            let command = SchemaRuleCommand {
                before: change.before().cloned().unwrap_or_default(),
                after: change.record().clone(),
                rule,
                tx_id: 0,
            };
            self.schema_commands.push(command.clone());
            commands.push(Command::SchemaRule(command));
        }
        for change in self.group_records.changes() {
            let command = RelationshipGroupCommand {
                after: *change.record(),
            };
            self.group_commands.push(command);
            commands.push(Command::RelationshipGroup(command));
        }
        debug_assert_eq!(commands.len(), expected);

        for command in &commands {
            self.log.append_command(self.identifier(), command)?;
        }

        self.validator
            .validate_transaction_start_knowledge(self.last_committed_tx_when_started())?;

        debug!(
            tx_id = self.identifier(),
            commands = commands.len(),
            "transaction prepared"
        );
        Ok(())
    }
}
