//! The write transaction: stages graph mutations against the record stores,
//! materializes them into an ordered command stream at prepare, and applies
//! them atomically at commit. One caller thread drives a transaction from
//! first mutation to commit or rollback; parallelism between transactions
//! comes from the lock service and the serial ordering of the log.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::cache::CacheAccess;
use crate::error::{GraphError, Result};
use crate::indexing::IndexingService;
use crate::lock::LockService;
use crate::log::LogSink;
use crate::scan::LabelScanStore;
use crate::store::props::PropertyValue;
use crate::store::records::{
    DynamicRecord, GraphRecord, NodeId, NodeRecord, PropId, PropertyOwner, PropertyRecord, RelId,
    RelationshipGroupRecord, RelationshipRecord, TokenId, TokenRecord, TxId,
};
use crate::store::schema::SchemaRule;
use crate::store::{labels, Stores};

pub mod changes;
pub mod command;

mod commit;
mod prepare;
mod prop_ops;
mod reads;
mod rel_ops;
mod rollback;
mod validate;

#[cfg(test)]
mod tests;

use changes::{RecordChanges, RecordLoader};
use command::{
    Command, GraphCommand, NodeCommand, PropertyCommand, RelationshipCommand,
    RelationshipGroupCommand, SchemaRuleCommand, TokenCommand,
};
pub use reads::CountDirection;
pub use validate::IntegrityValidator;

/// Hooks into the surrounding transaction state, invoked at the end of a
/// live commit.
pub trait TxStateHooks: Send + Sync {
    /// Publishes a node's chain heads after commit.
    fn set_first_ids(&self, node_id: NodeId, first_rel: RelId, first_prop: PropId);
    /// Finalizes copy-on-write views of cached primitives.
    fn commit_cows(&self);
}

/// Hooks implementation for engines without a caching kernel above them.
#[derive(Default)]
pub struct NoopTxState;

impl TxStateHooks for NoopTxState {
    fn set_first_ids(&self, _node_id: NodeId, _first_rel: RelId, _first_prop: PropId) {}
    fn commit_cows(&self) {}
}

pub(crate) struct NodeLoader(Arc<Stores>);

impl RecordLoader for NodeLoader {
    type Record = NodeRecord;
    type Extra = ();

    fn new_unused(&self, key: u64, _extra: &()) -> Result<NodeRecord> {
        Ok(NodeRecord::new_unused(key))
    }

    fn load(&self, key: u64, _extra: &()) -> Result<NodeRecord> {
        self.0.nodes.get_record(key)
    }

    fn ensure_heavy(&self, record: &mut NodeRecord) -> Result<()> {
        self.0.nodes.ensure_heavy(record)
    }

    fn clone_record(&self, record: &NodeRecord) -> Result<NodeRecord> {
        Ok(record.clone())
    }
}

pub(crate) struct PropertyLoader(Arc<Stores>);

impl RecordLoader for PropertyLoader {
    type Record = PropertyRecord;
    type Extra = PropertyOwner;

    fn new_unused(&self, key: u64, extra: &PropertyOwner) -> Result<PropertyRecord> {
        let mut record = PropertyRecord::new_unused(key);
        record.owner = *extra;
        Ok(record)
    }

    fn load(&self, key: u64, extra: &PropertyOwner) -> Result<PropertyRecord> {
        let mut record = self.0.props.get_record(key)?;
        record.owner = *extra;
        Ok(record)
    }

    fn ensure_heavy(&self, record: &mut PropertyRecord) -> Result<()> {
        for block in &mut record.blocks {
            self.0.props.ensure_heavy(block)?;
        }
        Ok(())
    }

    fn clone_record(&self, record: &PropertyRecord) -> Result<PropertyRecord> {
        Ok(record.clone())
    }
}

pub(crate) struct RelationshipLoader(Arc<Stores>);

impl RecordLoader for RelationshipLoader {
    type Record = RelationshipRecord;
    type Extra = ();

    fn new_unused(&self, key: u64, _extra: &()) -> Result<RelationshipRecord> {
        Ok(RelationshipRecord::new_unused(key))
    }

    fn load(&self, key: u64, _extra: &()) -> Result<RelationshipRecord> {
        self.0.rels.get_record(key)
    }

    fn ensure_heavy(&self, _record: &mut RelationshipRecord) -> Result<()> {
        Ok(())
    }

    fn clone_record(&self, _record: &RelationshipRecord) -> Result<RelationshipRecord> {
        Err(GraphError::Unsupported(
            "relationship records do not track before state",
        ))
    }
}

pub(crate) struct GroupLoader(Arc<Stores>);

impl RecordLoader for GroupLoader {
    type Record = RelationshipGroupRecord;
    type Extra = TokenId;

    fn new_unused(&self, key: u64, extra: &TokenId) -> Result<RelationshipGroupRecord> {
        Ok(RelationshipGroupRecord::new_unused(key, *extra))
    }

    fn load(&self, key: u64, _extra: &TokenId) -> Result<RelationshipGroupRecord> {
        self.0.groups.get_record(key)
    }

    fn ensure_heavy(&self, _record: &mut RelationshipGroupRecord) -> Result<()> {
        Ok(())
    }

    fn clone_record(&self, _record: &RelationshipGroupRecord) -> Result<RelationshipGroupRecord> {
        Err(GraphError::Unsupported(
            "relationship group records do not track before state",
        ))
    }
}

pub(crate) struct SchemaLoader(Arc<Stores>);

impl RecordLoader for SchemaLoader {
    type Record = Vec<DynamicRecord>;
    type Extra = SchemaRule;

    fn new_unused(&self, _key: u64, extra: &SchemaRule) -> Result<Vec<DynamicRecord>> {
        Ok(self.0.schema.allocate_from(extra))
    }

    fn load(&self, key: u64, _extra: &SchemaRule) -> Result<Vec<DynamicRecord>> {
        self.0.schema.get_records(key)
    }

    fn ensure_heavy(&self, _record: &mut Vec<DynamicRecord>) -> Result<()> {
        Ok(())
    }

    fn clone_record(&self, record: &Vec<DynamicRecord>) -> Result<Vec<DynamicRecord>> {
        Ok(record.clone())
    }
}

pub(crate) struct GraphLoader(Arc<Stores>);

impl RecordLoader for GraphLoader {
    type Record = GraphRecord;
    type Extra = ();

    fn new_unused(&self, _key: u64, _extra: &()) -> Result<GraphRecord> {
        Err(GraphError::Unsupported("the graph record is never created"))
    }

    fn load(&self, _key: u64, _extra: &()) -> Result<GraphRecord> {
        Ok(self.0.graph_record())
    }

    fn ensure_heavy(&self, _record: &mut GraphRecord) -> Result<()> {
        Ok(())
    }

    fn clone_record(&self, _record: &GraphRecord) -> Result<GraphRecord> {
        Err(GraphError::Unsupported(
            "the graph record does not track before state",
        ))
    }
}

pub struct WriteTransaction {
    pub(crate) stores: Arc<Stores>,
    pub(crate) locks: Arc<LockService>,
    pub(crate) cache: Arc<dyn CacheAccess>,
    pub(crate) indexes: Arc<dyn IndexingService>,
    pub(crate) label_scan: Arc<dyn LabelScanStore>,
    pub(crate) log: Arc<dyn LogSink>,
    pub(crate) state: Arc<dyn TxStateHooks>,
    pub(crate) validator: IntegrityValidator,

    identifier: u64,
    last_committed_tx_when_started: TxId,

    pub(crate) node_records: RecordChanges<NodeLoader>,
    pub(crate) prop_records: RecordChanges<PropertyLoader>,
    pub(crate) rel_records: RecordChanges<RelationshipLoader>,
    pub(crate) group_records: RecordChanges<GroupLoader>,
    pub(crate) schema_changes: RecordChanges<SchemaLoader>,
    pub(crate) graph_record: Option<RecordChanges<GraphLoader>>,
    pub(crate) rel_type_token_records: Option<BTreeMap<TokenId, TokenRecord>>,
    pub(crate) label_token_records: Option<BTreeMap<TokenId, TokenRecord>>,
    pub(crate) property_key_token_records: Option<BTreeMap<TokenId, TokenRecord>>,

    pub(crate) node_commands: BTreeMap<NodeId, NodeCommand>,
    pub(crate) prop_commands: Vec<PropertyCommand>,
    pub(crate) rel_commands: Vec<RelationshipCommand>,
    pub(crate) group_commands: Vec<RelationshipGroupCommand>,
    pub(crate) schema_commands: Vec<SchemaRuleCommand>,
    pub(crate) rel_type_token_commands: Vec<TokenCommand>,
    pub(crate) label_token_commands: Vec<TokenCommand>,
    pub(crate) property_key_token_commands: Vec<TokenCommand>,
    pub(crate) graph_command: Option<GraphCommand>,

    pub(crate) upgraded_dense_nodes: Vec<NodeId>,
    pub(crate) committed: bool,
    pub(crate) prepared: bool,
    pub(crate) recovered: bool,
}

impl WriteTransaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stores: Arc<Stores>,
        locks: Arc<LockService>,
        cache: Arc<dyn CacheAccess>,
        indexes: Arc<dyn IndexingService>,
        label_scan: Arc<dyn LabelScanStore>,
        log: Arc<dyn LogSink>,
        state: Arc<dyn TxStateHooks>,
        identifier: u64,
        last_committed_tx_when_started: TxId,
    ) -> Self {
        let validator = IntegrityValidator::new(Arc::clone(&stores));
        debug!(tx_id = identifier, "transaction started");
        Self {
            node_records: RecordChanges::new(NodeLoader(Arc::clone(&stores)), true),
            prop_records: RecordChanges::new(PropertyLoader(Arc::clone(&stores)), true),
            rel_records: RecordChanges::new(RelationshipLoader(Arc::clone(&stores)), false),
            group_records: RecordChanges::new(GroupLoader(Arc::clone(&stores)), false),
            schema_changes: RecordChanges::new(SchemaLoader(Arc::clone(&stores)), true),
            graph_record: None,
            rel_type_token_records: None,
            label_token_records: None,
            property_key_token_records: None,
            node_commands: BTreeMap::new(),
            prop_commands: Vec::new(),
            rel_commands: Vec::new(),
            group_commands: Vec::new(),
            schema_commands: Vec::new(),
            rel_type_token_commands: Vec::new(),
            label_token_commands: Vec::new(),
            property_key_token_commands: Vec::new(),
            graph_command: None,
            upgraded_dense_nodes: Vec::new(),
            committed: false,
            prepared: false,
            recovered: false,
            identifier,
            last_committed_tx_when_started,
            stores,
            locks,
            cache,
            indexes,
            label_scan,
            log,
            state,
            validator,
        }
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn last_committed_tx_when_started(&self) -> TxId {
        self.last_committed_tx_when_started
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// Marks this transaction as a recovery replay target: commands are
    /// injected instead of staged, and commit skips id allocation.
    pub fn set_recovered(&mut self) {
        self.recovered = true;
    }

    /// True when nothing would be written by committing this transaction.
    pub fn is_read_only(&self) -> bool {
        if self.recovered {
            self.node_commands.is_empty()
                && self.prop_commands.is_empty()
                && self.rel_commands.is_empty()
                && self.group_commands.is_empty()
                && self.schema_commands.is_empty()
                && self.rel_type_token_commands.is_empty()
                && self.label_token_commands.is_empty()
                && self.property_key_token_commands.is_empty()
                && self.graph_command.is_none()
        } else {
            self.node_records.change_size() == 0
                && self.rel_records.change_size() == 0
                && self.group_records.change_size() == 0
                && self.prop_records.change_size() == 0
                && self.schema_changes.change_size() == 0
                && self.rel_type_token_records.is_none()
                && self.label_token_records.is_none()
                && self.property_key_token_records.is_none()
                && self.graph_record.is_none()
        }
    }

    /// Routes a command replayed from the log into the containers commit
    /// executes from.
    pub fn inject_command(&mut self, command: Command) -> Result<()> {
        if !self.recovered {
            return Err(GraphError::Tx(format!(
                "cannot inject commands into live transaction [{}]",
                self.identifier
            )));
        }
        match command {
            Command::Node(c) => {
                self.node_commands.insert(c.after.id, c);
            }
            Command::Relationship(c) => self.rel_commands.push(c),
            Command::RelationshipGroup(c) => self.group_commands.push(c),
            Command::Property(c) => self.prop_commands.push(c),
            Command::RelationshipTypeToken(c) => self.rel_type_token_commands.push(c),
            Command::LabelToken(c) => self.label_token_commands.push(c),
            Command::PropertyKeyToken(c) => self.property_key_token_commands.push(c),
            Command::SchemaRule(c) => self.schema_commands.push(c),
            Command::Graph(c) => {
                debug_assert!(self.graph_command.is_none());
                self.graph_command = Some(c);
            }
        }
        Ok(())
    }

    pub(crate) fn graph_changes(&mut self) -> &mut RecordChanges<GraphLoader> {
        let stores = Arc::clone(&self.stores);
        self.graph_record
            .get_or_insert_with(|| RecordChanges::new(GraphLoader(stores), false))
    }

    /// Creates a node record for the given id.
    pub fn node_create(&mut self, node_id: NodeId) -> Result<()> {
        let mut change = self.node_records.create(node_id, ())?;
        let record = change.for_changing_data()?;
        record.in_use = true;
        record.created = true;
        Ok(())
    }

    /// Deletes a node, returning the properties removed with it.
    pub fn node_delete(&mut self, node_id: NodeId) -> Result<BTreeMap<TokenId, PropertyValue>> {
        {
            let mut change = self.node_records.get_or_load(node_id, ())?;
            let record = change.for_changing_data()?;
            if !record.in_use {
                return Err(GraphError::State(format!(
                    "unable to delete node {node_id} since it has already been deleted"
                )));
            }
            record.in_use = false;
            labels::clear_labels(record);
        }
        self.delete_property_chain(PropertyOwner::Node(node_id))
    }

    pub fn add_label_to_node(&mut self, label_id: TokenId, node_id: NodeId) -> Result<()> {
        let stores = Arc::clone(&self.stores);
        let mut change = self.node_records.get_or_load(node_id, ())?;
        let record = change.for_changing_data()?;
        labels::add_label(record, label_id, &stores.nodes)
    }

    pub fn remove_label_from_node(&mut self, label_id: TokenId, node_id: NodeId) -> Result<()> {
        let stores = Arc::clone(&self.stores);
        let mut change = self.node_records.get_or_load(node_id, ())?;
        let record = change.for_changing_data()?;
        labels::remove_label(record, label_id, &stores.nodes)
    }

    pub fn create_relationship_type_token(&mut self, id: TokenId, name: &str) {
        let mut record = TokenRecord::new(id);
        record.in_use = true;
        record.created = true;
        let name_records = self.stores.rel_type_tokens.allocate_name_records(name);
        record.name_id = name_records[0].id;
        record.name_records = name_records;
        self.rel_type_token_records
            .get_or_insert_with(BTreeMap::new)
            .insert(id, record);
    }

    pub fn create_label_token(&mut self, id: TokenId, name: &str) {
        let mut record = TokenRecord::new(id);
        record.in_use = true;
        record.created = true;
        let name_records = self.stores.label_tokens.allocate_name_records(name);
        record.name_id = name_records[0].id;
        record.name_records = name_records;
        self.label_token_records
            .get_or_insert_with(BTreeMap::new)
            .insert(id, record);
    }

    pub fn create_property_key_token(&mut self, id: TokenId, name: &str) {
        let mut record = TokenRecord::new(id);
        record.in_use = true;
        record.created = true;
        let name_records = self.stores.props.key_tokens.allocate_name_records(name);
        record.name_id = name_records[0].id;
        record.name_records = name_records;
        self.property_key_token_records
            .get_or_insert_with(BTreeMap::new)
            .insert(id, record);
    }

    pub fn create_schema_rule(&mut self, rule: SchemaRule) -> Result<()> {
        let mut change = self.schema_changes.create(rule.id(), rule)?;
        for record in change.for_changing_data()? {
            record.in_use = true;
            record.created = true;
        }
        Ok(())
    }

    pub fn drop_schema_rule(&mut self, rule: &SchemaRule) -> Result<()> {
        let mut change = self.schema_changes.get_or_load(rule.id(), rule.clone())?;
        for record in change.for_changing_data()? {
            record.in_use = false;
        }
        Ok(())
    }

    /// Re-serializes a constraint index with its owning constraint id,
    /// replacing the staged dynamic records.
    pub fn set_constraint_index_owner(
        &mut self,
        index_rule: &SchemaRule,
        constraint_id: u64,
    ) -> Result<()> {
        let rule = index_rule.clone().with_owning_constraint(constraint_id)?;
        let stores = Arc::clone(&self.stores);
        let mut change = self.schema_changes.get_or_load(rule.id(), rule.clone())?;
        change.set_extra(rule.clone());
        let records = change.for_changing_data()?;
        records.clear();
        records.extend(stores.schema.allocate_from(&rule));
        Ok(())
    }

    /// Discards every staged change and command. Runs after commit and
    /// rollback alike.
    pub(crate) fn clear(&mut self) {
        self.node_records.clear();
        self.prop_records.clear();
        self.rel_records.clear();
        self.group_records.clear();
        self.schema_changes.clear();
        self.graph_record = None;
        self.rel_type_token_records = None;
        self.label_token_records = None;
        self.property_key_token_records = None;

        self.node_commands.clear();
        self.prop_commands.clear();
        self.rel_commands.clear();
        self.group_commands.clear();
        self.schema_commands.clear();
        self.rel_type_token_commands.clear();
        self.label_token_commands.clear();
        self.property_key_token_commands.clear();
        self.graph_command = None;
        self.upgraded_dense_nodes.clear();
    }
}
