//! Cache invalidation back-door. The transaction core only pushes
//! invalidations and additions through this trait; reading and populating
//! the caches is the business of higher layers.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::scan::NodeLabelUpdate;
use crate::store::records::{NodeId, NodeRecord, RelId, RelationshipRecord, Token, TokenId};
use crate::store::schema::SchemaRule;

pub trait CacheAccess: Send + Sync {
    fn remove_node_from_cache(&self, node_id: NodeId);
    fn remove_relationship_from_cache(&self, rel_id: RelId);
    /// Patches cached endpoint nodes of a deleted relationship so their
    /// chain positions skip the deleted record.
    fn patch_deleted_relationship_nodes(
        &self,
        rel_id: RelId,
        first_node: NodeId,
        first_next_rel: RelId,
        second_node: NodeId,
        second_next_rel: RelId,
    );
    fn remove_relationship_type_from_cache(&self, id: TokenId);
    fn add_relationship_type_token(&self, token: Token);
    fn add_label_token(&self, token: Token);
    fn add_property_key_token(&self, token: Token);
    fn apply_label_updates(&self, updates: &[NodeLabelUpdate]);
    fn remove_schema_rule_from_cache(&self, id: u64);
    fn add_schema_rule(&self, rule: SchemaRule);
    fn remove_graph_properties_from_cache(&self);
}

/// Default record caches backing the trait: LRU maps for nodes and
/// relationships, plain maps for tokens and schema rules.
pub struct GraphCaches {
    nodes: Mutex<LruCache<NodeId, NodeRecord>>,
    rels: Mutex<LruCache<RelId, RelationshipRecord>>,
    rel_type_tokens: Mutex<FxHashMap<TokenId, Token>>,
    label_tokens: Mutex<FxHashMap<TokenId, Token>>,
    property_key_tokens: Mutex<FxHashMap<TokenId, Token>>,
    schema_rules: Mutex<FxHashMap<u64, SchemaRule>>,
    graph_properties_cached: Mutex<bool>,
}

impl GraphCaches {
    pub fn new(node_capacity: usize, rel_capacity: usize) -> Self {
        let node_capacity =
            NonZeroUsize::new(node_capacity).unwrap_or(NonZeroUsize::new(1024).expect("non-zero"));
        let rel_capacity =
            NonZeroUsize::new(rel_capacity).unwrap_or(NonZeroUsize::new(1024).expect("non-zero"));
        Self {
            nodes: Mutex::new(LruCache::new(node_capacity)),
            rels: Mutex::new(LruCache::new(rel_capacity)),
            rel_type_tokens: Mutex::new(FxHashMap::default()),
            label_tokens: Mutex::new(FxHashMap::default()),
            property_key_tokens: Mutex::new(FxHashMap::default()),
            schema_rules: Mutex::new(FxHashMap::default()),
            graph_properties_cached: Mutex::new(false),
        }
    }

    pub fn cache_node(&self, record: NodeRecord) {
        self.nodes.lock().put(record.id, record);
    }

    pub fn cached_node(&self, node_id: NodeId) -> Option<NodeRecord> {
        self.nodes.lock().get(&node_id).cloned()
    }

    pub fn cache_relationship(&self, record: RelationshipRecord) {
        self.rels.lock().put(record.id, record);
    }

    pub fn cached_relationship(&self, rel_id: RelId) -> Option<RelationshipRecord> {
        self.rels.lock().get(&rel_id).copied()
    }

    pub fn relationship_type_token(&self, id: TokenId) -> Option<Token> {
        self.rel_type_tokens.lock().get(&id).cloned()
    }

    pub fn label_token(&self, id: TokenId) -> Option<Token> {
        self.label_tokens.lock().get(&id).cloned()
    }

    pub fn property_key_token(&self, id: TokenId) -> Option<Token> {
        self.property_key_tokens.lock().get(&id).cloned()
    }

    pub fn schema_rule(&self, id: u64) -> Option<SchemaRule> {
        self.schema_rules.lock().get(&id).cloned()
    }
}

impl Default for GraphCaches {
    fn default() -> Self {
        Self::new(10_000, 100_000)
    }
}

impl CacheAccess for GraphCaches {
    fn remove_node_from_cache(&self, node_id: NodeId) {
        self.nodes.lock().pop(&node_id);
    }

    fn remove_relationship_from_cache(&self, rel_id: RelId) {
        self.rels.lock().pop(&rel_id);
    }

    fn patch_deleted_relationship_nodes(
        &self,
        rel_id: RelId,
        first_node: NodeId,
        first_next_rel: RelId,
        second_node: NodeId,
        second_next_rel: RelId,
    ) {
        let mut nodes = self.nodes.lock();
        for (node_id, next_rel) in [(first_node, first_next_rel), (second_node, second_next_rel)] {
            if let Some(record) = nodes.get_mut(&node_id) {
                if record.next_rel == rel_id {
                    record.next_rel = next_rel;
                }
            }
        }
    }

    fn remove_relationship_type_from_cache(&self, id: TokenId) {
        self.rel_type_tokens.lock().remove(&id);
    }

    fn add_relationship_type_token(&self, token: Token) {
        self.rel_type_tokens.lock().insert(token.id, token);
    }

    fn add_label_token(&self, token: Token) {
        self.label_tokens.lock().insert(token.id, token);
    }

    fn add_property_key_token(&self, token: Token) {
        self.property_key_tokens.lock().insert(token.id, token);
    }

    fn apply_label_updates(&self, updates: &[NodeLabelUpdate]) {
        let mut nodes = self.nodes.lock();
        for update in updates {
            nodes.pop(&update.node_id);
        }
    }

    fn remove_schema_rule_from_cache(&self, id: u64) {
        self.schema_rules.lock().remove(&id);
    }

    fn add_schema_rule(&self, rule: SchemaRule) {
        self.schema_rules.lock().insert(rule.id(), rule);
    }

    fn remove_graph_properties_from_cache(&self) {
        *self.graph_properties_cached.lock() = false;
    }
}
