//! In-memory record stores. The transaction core consumes only the
//! record-get/put/next-id/free-id contract plus the value-encoding helpers,
//! so the stores here are deliberately small: a map per record kind, an id
//! allocator with a free-list, and dynamic stores for variable payloads.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::config::Config;
use crate::error::{GraphError, Result};

pub mod ids;
pub mod labels;
pub mod props;
pub mod records;
pub mod schema;

use ids::IdAllocator;
use props::{BlockPayload, PropertyBlock, PropertyValue, INLINE_VALUE_MAX};
use records::{
    DynamicId, DynamicKind, DynamicRecord, GraphRecord, NodeId, NodeRecord, PropId,
    PropertyRecord, RelId, RelationshipGroupRecord, RelationshipRecord, Token, TokenId,
    TokenRecord, TxId, NO_DYNAMIC,
};
use schema::SchemaRule;

/// Payload bytes per dynamic record.
const DYNAMIC_BLOCK_SIZE: usize = 64;

struct RecordMap<R> {
    kind: &'static str,
    records: RwLock<FxHashMap<u64, R>>,
    ids: IdAllocator,
    recovery: Arc<AtomicBool>,
}

impl<R: Clone> RecordMap<R> {
    fn new(kind: &'static str, recovery: Arc<AtomicBool>) -> Self {
        Self {
            kind,
            records: RwLock::new(FxHashMap::default()),
            ids: IdAllocator::new(0),
            recovery,
        }
    }

    fn get(&self, id: u64) -> Result<R> {
        self.records.read().get(&id).cloned().ok_or_else(|| {
            GraphError::InvalidRecord(format!("{} record {} not in use", self.kind, id))
        })
    }

    fn put(&self, id: u64, record: R) {
        self.records.write().insert(id, record);
    }

    // Writing a not-in-use record frees its id, whether or not the record
    // was ever stored; records created and deleted within one transaction
    // only ever reach the store through their delete command.
    fn remove_and_free(&self, id: u64) {
        self.records.write().remove(&id);
        if !self.recovery.load(Ordering::Acquire) {
            self.ids.free_id(id);
        }
    }

    fn next_id(&self) -> u64 {
        self.ids.next_id()
    }

    fn free_id(&self, id: u64) {
        self.ids.free_id(id);
    }

    fn refresh_high_id(&self) {
        let high = self
            .records
            .read()
            .keys()
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);
        self.ids.set_high_id(high);
    }

    fn snapshot(&self) -> BTreeMap<u64, R> {
        self.records
            .read()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

/// Store for variable-length payload chains.
pub struct DynamicStore {
    map: RecordMap<DynamicRecord>,
    block_size: usize,
    record_kind: DynamicKind,
}

impl DynamicStore {
    fn new(kind: &'static str, record_kind: DynamicKind, recovery: Arc<AtomicBool>) -> Self {
        Self {
            map: RecordMap::new(kind, recovery),
            block_size: DYNAMIC_BLOCK_SIZE,
            record_kind,
        }
    }

    /// Chunks `data` into a freshly allocated, linked chain of created
    /// records.
    pub fn allocate(&self, data: &[u8]) -> Vec<DynamicRecord> {
        let first = self.map.next_id();
        self.allocate_with_first(first, data)
    }

    /// Like `allocate` but with a caller-chosen head id. Schema rules use the
    /// rule id as the head of their chain.
    pub fn allocate_with_first(&self, first: DynamicId, data: &[u8]) -> Vec<DynamicRecord> {
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(self.block_size).collect()
        };
        let mut records: Vec<DynamicRecord> = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let id = if i == 0 { first } else { self.map.next_id() };
            let mut record = DynamicRecord::new_unused(id);
            record.in_use = true;
            record.created = true;
            record.kind = self.record_kind;
            record.data = chunk.to_vec();
            if let Some(previous) = records.last_mut() {
                previous.next = id;
            }
            records.push(record);
        }
        records
    }

    pub fn get_record(&self, id: DynamicId) -> Result<DynamicRecord> {
        self.map.get(id)
    }

    pub fn get_chain(&self, first: DynamicId) -> Result<Vec<DynamicRecord>> {
        let mut records = Vec::new();
        let mut next = first;
        while next != NO_DYNAMIC {
            let record = self.map.get(next)?;
            next = record.next;
            records.push(record);
        }
        Ok(records)
    }

    pub fn update_record(&self, record: &DynamicRecord) {
        if record.in_use {
            let mut stored = record.clone();
            stored.created = false;
            self.map.put(record.id, stored);
        } else {
            self.map.remove_and_free(record.id);
        }
    }

    pub fn next_id(&self) -> DynamicId {
        self.map.next_id()
    }

    pub fn free_id(&self, id: DynamicId) {
        self.map.free_id(id);
    }

    pub fn snapshot(&self) -> BTreeMap<u64, DynamicRecord> {
        self.map.snapshot()
    }

    fn refresh_high_id(&self) {
        self.map.refresh_high_id();
    }
}

pub struct NodeStore {
    map: RecordMap<NodeRecord>,
    label_dynamic: DynamicStore,
}

impl NodeStore {
    fn new(recovery: Arc<AtomicBool>) -> Self {
        Self {
            map: RecordMap::new("node", Arc::clone(&recovery)),
            label_dynamic: DynamicStore::new("node label", DynamicKind::Plain, recovery),
        }
    }

    pub fn get_record(&self, id: NodeId) -> Result<NodeRecord> {
        self.map.get(id)
    }

    /// Loads the spilled label chain of a record whose label field points at
    /// dynamic storage. Inline records are already complete.
    pub fn ensure_heavy(&self, record: &mut NodeRecord) -> Result<()> {
        if labels::is_inline(record.label_field) {
            return Ok(());
        }
        if record.dynamic_labels.iter().any(|r| r.in_use) {
            return Ok(());
        }
        let first = labels::dynamic_first_id(record.label_field);
        record.dynamic_labels = self.label_dynamic.get_chain(first)?;
        Ok(())
    }

    pub fn update_record(&self, record: &NodeRecord) {
        for dynamic in &record.dynamic_labels {
            self.label_dynamic.update_record(dynamic);
        }
        if record.in_use {
            let mut stored = record.clone();
            stored.created = false;
            stored.dynamic_labels.clear();
            self.map.put(record.id, stored);
        } else {
            self.map.remove_and_free(record.id);
        }
    }

    pub fn allocate_label_records(&self, data: &[u8]) -> Vec<DynamicRecord> {
        self.label_dynamic.allocate(data)
    }

    pub fn next_id(&self) -> NodeId {
        self.map.next_id()
    }

    pub fn free_id(&self, id: NodeId) {
        self.map.free_id(id);
    }

    pub fn snapshot(&self) -> BTreeMap<u64, NodeRecord> {
        self.map.snapshot()
    }
}

pub struct RelationshipStore {
    map: RecordMap<RelationshipRecord>,
}

impl RelationshipStore {
    fn new(recovery: Arc<AtomicBool>) -> Self {
        Self {
            map: RecordMap::new("relationship", recovery),
        }
    }

    pub fn get_record(&self, id: RelId) -> Result<RelationshipRecord> {
        self.map.get(id)
    }

    pub fn update_record(&self, record: &RelationshipRecord) {
        if record.in_use {
            let mut stored = *record;
            stored.created = false;
            self.map.put(record.id, stored);
        } else {
            self.map.remove_and_free(record.id);
        }
    }

    pub fn next_id(&self) -> RelId {
        self.map.next_id()
    }

    pub fn free_id(&self, id: RelId) {
        self.map.free_id(id);
    }

    pub fn snapshot(&self) -> BTreeMap<u64, RelationshipRecord> {
        self.map.snapshot()
    }
}

pub struct RelationshipGroupStore {
    map: RecordMap<RelationshipGroupRecord>,
}

impl RelationshipGroupStore {
    fn new(recovery: Arc<AtomicBool>) -> Self {
        Self {
            map: RecordMap::new("relationship group", recovery),
        }
    }

    pub fn get_record(&self, id: u64) -> Result<RelationshipGroupRecord> {
        self.map.get(id)
    }

    pub fn update_record(&self, record: &RelationshipGroupRecord) {
        if record.in_use {
            let mut stored = *record;
            stored.created = false;
            // the backward pointer is rebuilt on every walk
            stored.prev = records::NO_REL;
            self.map.put(record.id, stored);
        } else {
            self.map.remove_and_free(record.id);
        }
    }

    pub fn next_id(&self) -> u64 {
        self.map.next_id()
    }

    pub fn free_id(&self, id: u64) {
        self.map.free_id(id);
    }

    pub fn snapshot(&self) -> BTreeMap<u64, RelationshipGroupRecord> {
        self.map.snapshot()
    }
}

/// Token store shared by the label, relationship-type and property-key
/// kinds; names live in a nested dynamic store.
pub struct TokenStore {
    map: RecordMap<TokenRecord>,
    names: DynamicStore,
}

impl TokenStore {
    fn new(kind: &'static str, recovery: Arc<AtomicBool>) -> Self {
        Self {
            map: RecordMap::new(kind, Arc::clone(&recovery)),
            names: DynamicStore::new(kind, DynamicKind::Plain, recovery),
        }
    }

    pub fn get_record(&self, id: TokenId) -> Result<TokenRecord> {
        self.map.get(u64::from(id))
    }

    pub fn get_token(&self, id: TokenId) -> Result<Token> {
        let record = self.get_record(id)?;
        let mut bytes = Vec::new();
        for name_record in self.names.get_chain(record.name_id)? {
            if name_record.in_use {
                bytes.extend_from_slice(&name_record.data);
            }
        }
        let name = String::from_utf8(bytes).map_err(|_| {
            GraphError::InvalidRecord(format!("token {id} has a name that is not valid utf-8"))
        })?;
        Ok(Token { id, name })
    }

    pub fn update_record(&self, record: &TokenRecord) {
        for name_record in &record.name_records {
            self.names.update_record(name_record);
        }
        if record.in_use {
            let mut stored = record.clone();
            stored.created = false;
            stored.name_records.clear();
            self.map.put(u64::from(record.id), stored);
        } else {
            self.map.remove_and_free(u64::from(record.id));
        }
    }

    pub fn allocate_name_records(&self, name: &str) -> Vec<DynamicRecord> {
        self.names.allocate(name.as_bytes())
    }

    pub fn next_id(&self) -> TokenId {
        self.map.next_id() as TokenId
    }

    pub fn free_id(&self, id: TokenId) {
        self.map.free_id(u64::from(id));
    }

    pub fn free_name_id(&self, id: DynamicId) {
        self.names.free_id(id);
    }

    pub fn snapshot(&self) -> BTreeMap<u64, TokenRecord> {
        self.map.snapshot()
    }
}

pub struct PropertyStore {
    map: RecordMap<PropertyRecord>,
    pub strings: DynamicStore,
    pub arrays: DynamicStore,
    pub key_tokens: TokenStore,
}

impl PropertyStore {
    fn new(recovery: Arc<AtomicBool>) -> Self {
        Self {
            map: RecordMap::new("property", Arc::clone(&recovery)),
            strings: DynamicStore::new(
                "string value",
                DynamicKind::String,
                Arc::clone(&recovery),
            ),
            arrays: DynamicStore::new("array value", DynamicKind::Array, Arc::clone(&recovery)),
            key_tokens: TokenStore::new("property key token", recovery),
        }
    }

    pub fn get_record(&self, id: PropId) -> Result<PropertyRecord> {
        self.map.get(id)
    }

    /// Encodes a value into a block, spilling long strings and byte arrays
    /// into freshly allocated dynamic value records.
    pub fn encode_value(&self, key: TokenId, value: &PropertyValue) -> PropertyBlock {
        match value {
            PropertyValue::Bool(v) => PropertyBlock::new(key, BlockPayload::Bool(*v)),
            PropertyValue::Int(v) => PropertyBlock::new(key, BlockPayload::Int(*v)),
            PropertyValue::Float(v) => PropertyBlock::new(key, BlockPayload::Float(*v)),
            PropertyValue::String(s) if s.len() <= INLINE_VALUE_MAX => {
                PropertyBlock::new(key, BlockPayload::InlineString(s.clone()))
            }
            PropertyValue::String(s) => {
                let value_records = self.strings.allocate(s.as_bytes());
                let mut block = PropertyBlock::new(
                    key,
                    BlockPayload::DynamicString {
                        first: value_records[0].id,
                        len: s.len() as u32,
                    },
                );
                block.value_records = value_records;
                block
            }
            PropertyValue::Bytes(b) if b.len() <= INLINE_VALUE_MAX => {
                PropertyBlock::new(key, BlockPayload::InlineBytes(b.clone()))
            }
            PropertyValue::Bytes(b) => {
                let value_records = self.arrays.allocate(b);
                let mut block = PropertyBlock::new(
                    key,
                    BlockPayload::DynamicBytes {
                        first: value_records[0].id,
                        len: b.len() as u32,
                    },
                );
                block.value_records = value_records;
                block
            }
        }
    }

    /// Loads the dynamic value chain of a block when it has one.
    pub fn ensure_heavy(&self, block: &mut PropertyBlock) -> Result<()> {
        if !block.is_dynamic() || !block.value_records.is_empty() {
            return Ok(());
        }
        let (store, first) = match block.payload {
            BlockPayload::DynamicString { first, .. } => (&self.strings, first),
            BlockPayload::DynamicBytes { first, .. } => (&self.arrays, first),
            _ => unreachable!("is_dynamic covers only dynamic payloads"),
        };
        block.value_records = store.get_chain(first)?;
        Ok(())
    }

    /// Decodes a block, loading its value chain if necessary.
    pub fn value_of(&self, block: &PropertyBlock) -> Result<PropertyValue> {
        if block.is_dynamic() && block.value_records.is_empty() {
            let mut heavy = block.clone();
            self.ensure_heavy(&mut heavy)?;
            return heavy.value();
        }
        block.value()
    }

    pub fn update_record(&self, record: &PropertyRecord) -> Result<()> {
        for deleted in &record.deleted_records {
            self.write_value_record(deleted)?;
        }
        for block in &record.blocks {
            for value_record in &block.value_records {
                self.write_value_record(value_record)?;
            }
        }
        if record.in_use {
            let mut stored = record.clone();
            stored.created = false;
            stored.deleted_records.clear();
            for block in &mut stored.blocks {
                block.value_records.clear();
            }
            self.map.put(record.id, stored);
        } else {
            self.map.remove_and_free(record.id);
        }
        Ok(())
    }

    fn write_value_record(&self, record: &DynamicRecord) -> Result<()> {
        match record.kind {
            DynamicKind::String => self.strings.update_record(record),
            DynamicKind::Array => self.arrays.update_record(record),
            DynamicKind::Plain => {
                return Err(GraphError::InvalidRecord(format!(
                    "dynamic record {} has no value type",
                    record.id
                )))
            }
        }
        Ok(())
    }

    pub fn next_id(&self) -> PropId {
        self.map.next_id()
    }

    pub fn free_id(&self, id: PropId) {
        self.map.free_id(id);
    }

    pub fn free_string_block_id(&self, id: DynamicId) {
        self.strings.free_id(id);
    }

    pub fn free_array_block_id(&self, id: DynamicId) {
        self.arrays.free_id(id);
    }

    pub fn snapshot(&self) -> BTreeMap<u64, PropertyRecord> {
        self.map.snapshot()
    }
}

/// Schema rules are stored as dynamic record chains whose head id is the
/// rule id.
pub struct SchemaStore {
    dynamic: DynamicStore,
}

impl SchemaStore {
    fn new(recovery: Arc<AtomicBool>) -> Self {
        Self {
            dynamic: DynamicStore::new("schema", DynamicKind::Plain, recovery),
        }
    }

    pub fn allocate_from(&self, rule: &SchemaRule) -> Vec<DynamicRecord> {
        self.dynamic.allocate_with_first(rule.id(), &rule.serialize())
    }

    pub fn get_records(&self, id: u64) -> Result<Vec<DynamicRecord>> {
        self.dynamic.get_chain(id)
    }

    pub fn load_rule(&self, id: u64) -> Result<SchemaRule> {
        SchemaRule::from_records(id, &self.get_records(id)?)
    }

    pub fn update_record(&self, record: &DynamicRecord) {
        self.dynamic.update_record(record);
    }

    pub fn next_id(&self) -> u64 {
        self.dynamic.next_id()
    }

    pub fn free_id(&self, id: u64) {
        self.dynamic.free_id(id);
    }

    pub fn snapshot(&self) -> BTreeMap<u64, DynamicRecord> {
        self.dynamic.snapshot()
    }
}

/// Aggregate of every record store plus the engine-wide counters the
/// transaction core consumes.
pub struct Stores {
    pub nodes: NodeStore,
    pub rels: RelationshipStore,
    pub groups: RelationshipGroupStore,
    pub props: PropertyStore,
    pub schema: SchemaStore,
    pub label_tokens: TokenStore,
    pub rel_type_tokens: TokenStore,
    graph: Mutex<GraphRecord>,
    last_committed_tx: AtomicU64,
    latest_constraint_tx: AtomicU64,
    recovery: Arc<AtomicBool>,
    config: Config,
}

impl Stores {
    pub fn new(config: Config) -> Arc<Self> {
        let recovery = Arc::new(AtomicBool::new(false));
        Arc::new(Self {
            nodes: NodeStore::new(Arc::clone(&recovery)),
            rels: RelationshipStore::new(Arc::clone(&recovery)),
            groups: RelationshipGroupStore::new(Arc::clone(&recovery)),
            props: PropertyStore::new(Arc::clone(&recovery)),
            schema: SchemaStore::new(Arc::clone(&recovery)),
            label_tokens: TokenStore::new("label token", Arc::clone(&recovery)),
            rel_type_tokens: TokenStore::new("relationship type token", Arc::clone(&recovery)),
            graph: Mutex::new(GraphRecord::new()),
            last_committed_tx: AtomicU64::new(0),
            latest_constraint_tx: AtomicU64::new(0),
            recovery,
            config,
        })
    }

    pub fn graph_record(&self) -> GraphRecord {
        *self.graph.lock()
    }

    pub fn update_graph_record(&self, record: GraphRecord) {
        *self.graph.lock() = record;
    }

    pub fn last_committed_tx(&self) -> TxId {
        self.last_committed_tx.load(Ordering::Acquire)
    }

    pub fn set_last_committed_tx(&self, tx_id: TxId) {
        self.last_committed_tx.store(tx_id, Ordering::Release);
    }

    pub fn in_recovery(&self) -> bool {
        self.recovery.load(Ordering::Acquire)
    }

    pub fn set_recovery(&self, recovering: bool) {
        self.recovery.store(recovering, Ordering::Release);
    }

    pub fn dense_node_threshold(&self) -> u32 {
        self.config.dense_node_threshold
    }

    pub fn free_ids_during_rollback(&self) -> bool {
        self.config.free_ids_during_rollback
    }

    pub fn latest_constraint_introducing_tx(&self) -> TxId {
        self.latest_constraint_tx.load(Ordering::Acquire)
    }

    pub fn set_latest_constraint_introducing_tx(&self, tx_id: TxId) {
        self.latest_constraint_tx.store(tx_id, Ordering::Release);
    }

    /// Refreshes every allocator from store contents. Run at the end of a
    /// recovered commit, when replay has written records whose ids were never
    /// handed out by the allocators of this process.
    pub fn update_id_generators(&self) {
        self.nodes.map.refresh_high_id();
        self.nodes.label_dynamic.refresh_high_id();
        self.rels.map.refresh_high_id();
        self.groups.map.refresh_high_id();
        self.props.map.refresh_high_id();
        self.props.strings.refresh_high_id();
        self.props.arrays.refresh_high_id();
        self.props.key_tokens.map.refresh_high_id();
        self.props.key_tokens.names.refresh_high_id();
        self.schema.dynamic.refresh_high_id();
        self.label_tokens.map.refresh_high_id();
        self.label_tokens.names.refresh_high_id();
        self.rel_type_tokens.map.refresh_high_id();
        self.rel_type_tokens.names.refresh_high_id();
    }
}
