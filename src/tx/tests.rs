use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::CacheAccess;
use crate::config::Config;
use crate::engine::Engine;
use crate::error::GraphError;
use crate::indexing::NoopIndexingService;
use crate::scan::{InMemoryLabelScanStore, NodeLabelUpdate};
use crate::store::props::PropertyValue;
use crate::store::records::{NodeId, RelId, Token, TokenId, NO_PROP, NO_REL};
use crate::store::schema::SchemaRule;
use crate::tx::{CountDirection, NoopTxState};

fn engine() -> Engine {
    Engine::new(Config::default())
}

fn engine_with_threshold(threshold: u32) -> Engine {
    Engine::new(Config::with_dense_threshold(threshold))
}

fn create_nodes(engine: &Engine, ids: &[NodeId]) {
    let mut tx = engine.begin_tx();
    for &id in ids {
        tx.node_create(id).expect("create node");
    }
    engine.commit(&mut tx).expect("commit nodes");
}

#[derive(Default)]
struct RecordingCache {
    events: Mutex<Vec<String>>,
}

impl RecordingCache {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl CacheAccess for RecordingCache {
    fn remove_node_from_cache(&self, node_id: NodeId) {
        self.push(format!("remove_node({node_id})"));
    }

    fn remove_relationship_from_cache(&self, rel_id: RelId) {
        self.push(format!("remove_rel({rel_id})"));
    }

    fn patch_deleted_relationship_nodes(
        &self,
        rel_id: RelId,
        first_node: NodeId,
        first_next_rel: RelId,
        second_node: NodeId,
        second_next_rel: RelId,
    ) {
        self.push(format!(
            "patch({rel_id},{first_node},{first_next_rel},{second_node},{second_next_rel})"
        ));
    }

    fn remove_relationship_type_from_cache(&self, id: TokenId) {
        self.push(format!("remove_rel_type({id})"));
    }

    fn add_relationship_type_token(&self, token: Token) {
        self.push(format!("add_rel_type({})", token.id));
    }

    fn add_label_token(&self, token: Token) {
        self.push(format!("add_label_token({})", token.id));
    }

    fn add_property_key_token(&self, token: Token) {
        self.push(format!("add_property_key_token({})", token.id));
    }

    fn apply_label_updates(&self, updates: &[NodeLabelUpdate]) {
        self.push(format!("apply_label_updates({})", updates.len()));
    }

    fn remove_schema_rule_from_cache(&self, id: u64) {
        self.push(format!("remove_schema_rule({id})"));
    }

    fn add_schema_rule(&self, rule: SchemaRule) {
        self.push(format!("add_schema_rule({})", rule.id()));
    }

    fn remove_graph_properties_from_cache(&self) {
        self.push("remove_graph_properties".into());
    }
}

fn engine_with_recording_cache() -> (Engine, Arc<RecordingCache>) {
    let cache = Arc::new(RecordingCache::default());
    let engine = Engine::with_parts(
        Config::default(),
        Arc::clone(&cache) as Arc<dyn CacheAccess>,
        Arc::new(NoopIndexingService),
        Arc::new(InMemoryLabelScanStore::new()),
        Arc::new(NoopTxState),
    );
    (engine, cache)
}

#[test]
fn first_relationship_heads_both_chains() {
    let engine = engine();
    let mut tx = engine.begin_tx();
    tx.node_create(1).expect("create node 1");
    tx.node_create(2).expect("create node 2");
    tx.relationship_create(100, 0, 1, 2).expect("create rel");
    engine.commit(&mut tx).expect("commit");

    let stores = engine.stores();
    assert_eq!(stores.nodes.get_record(1).expect("node 1").next_rel, 100);
    assert_eq!(stores.nodes.get_record(2).expect("node 2").next_rel, 100);
    let rel = stores.rels.get_record(100).expect("rel 100");
    assert_eq!(rel.first_prev_rel, 1);
    assert_eq!(rel.second_prev_rel, 1);
    assert!(rel.first_in_first_chain);
    assert!(rel.first_in_second_chain);
    assert_eq!(rel.first_next_rel, NO_REL);
    assert_eq!(rel.second_next_rel, NO_REL);
}

#[test]
fn second_relationship_splices_at_chain_head() {
    let engine = engine();
    let mut tx = engine.begin_tx();
    tx.node_create(1).expect("create node 1");
    tx.node_create(2).expect("create node 2");
    tx.relationship_create(100, 0, 1, 2).expect("create rel 100");
    tx.relationship_create(101, 0, 1, 2).expect("create rel 101");
    engine.commit(&mut tx).expect("commit");

    let stores = engine.stores();
    assert_eq!(stores.nodes.get_record(1).expect("node 1").next_rel, 101);
    assert_eq!(stores.nodes.get_record(2).expect("node 2").next_rel, 101);
    let old_head = stores.rels.get_record(100).expect("rel 100");
    let new_head = stores.rels.get_record(101).expect("rel 101");
    assert_eq!(new_head.first_next_rel, 100);
    assert_eq!(new_head.first_prev_rel, 2, "head stores the chain length");
    assert!(new_head.first_in_first_chain);
    assert_eq!(old_head.first_prev_rel, 101);
    assert!(!old_head.first_in_first_chain);
    assert_eq!(old_head.second_prev_rel, 101);
    assert!(!old_head.first_in_second_chain);
}

#[test]
fn deleting_a_relationship_mends_the_chain_and_patches_caches() {
    let (engine, cache) = engine_with_recording_cache();
    let mut tx = engine.begin_tx();
    tx.node_create(1).expect("create node 1");
    tx.node_create(2).expect("create node 2");
    tx.relationship_create(100, 0, 1, 2).expect("create rel 100");
    tx.relationship_create(101, 0, 1, 2).expect("create rel 101");
    engine.commit(&mut tx).expect("commit setup");

    let mut tx = engine.begin_tx();
    tx.rel_delete(100).expect("delete rel 100");
    engine.commit(&mut tx).expect("commit delete");

    let stores = engine.stores();
    assert_eq!(stores.nodes.get_record(1).expect("node 1").next_rel, 101);
    let survivor = stores.rels.get_record(101).expect("rel 101");
    assert_eq!(survivor.first_next_rel, NO_REL);
    assert_eq!(survivor.first_prev_rel, 1);
    assert_eq!(survivor.second_prev_rel, 1);
    assert!(survivor.first_in_first_chain);
    assert!(
        stores.rels.get_record(100).is_err(),
        "deleted record is gone from the store"
    );

    let events = cache.events();
    assert!(events.contains(&"remove_rel(100)".to_string()), "{events:?}");
    assert!(
        events.contains(&format!("patch(100,1,{NO_REL},2,{NO_REL})")),
        "{events:?}"
    );
}

#[test]
fn create_then_delete_restores_the_chain() {
    let engine = engine();
    let mut tx = engine.begin_tx();
    tx.node_create(1).expect("create node 1");
    tx.node_create(2).expect("create node 2");
    tx.relationship_create(100, 0, 1, 2).expect("create rel 100");
    engine.commit(&mut tx).expect("commit setup");

    let rels_before = engine.stores().rels.snapshot();
    let node_1_before = engine.stores().nodes.get_record(1).expect("node 1");

    let mut tx = engine.begin_tx();
    tx.relationship_create(101, 0, 1, 2).expect("create rel 101");
    engine.commit(&mut tx).expect("commit create");
    let mut tx = engine.begin_tx();
    tx.rel_delete(101).expect("delete rel 101");
    engine.commit(&mut tx).expect("commit delete");

    assert_eq!(engine.stores().rels.snapshot(), rels_before);
    assert_eq!(
        engine.stores().nodes.get_record(1).expect("node 1"),
        node_1_before
    );
}

#[test]
fn loop_relationship_splices_once() {
    let engine = engine();
    let mut tx = engine.begin_tx();
    tx.node_create(1).expect("create node 1");
    tx.relationship_create(100, 0, 1, 1).expect("create loop");
    engine.commit(&mut tx).expect("commit");

    let stores = engine.stores();
    assert_eq!(stores.nodes.get_record(1).expect("node 1").next_rel, 100);
    let rel = stores.rels.get_record(100).expect("loop rel");
    assert_eq!(rel.first_prev_rel, 1);
    assert_eq!(rel.second_prev_rel, 1);
    assert!(rel.first_in_first_chain);
    assert!(rel.first_in_second_chain);

    let mut tx = engine.begin_tx();
    tx.rel_delete(100).expect("delete loop");
    engine.commit(&mut tx).expect("commit delete");
    assert_eq!(
        engine.stores().nodes.get_record(1).expect("node 1").next_rel,
        NO_REL
    );
}

#[test]
fn threshold_minus_one_does_not_upgrade() {
    let engine = engine_with_threshold(3);
    create_nodes(&engine, &[1, 2, 3, 4]);
    let mut tx = engine.begin_tx();
    tx.relationship_create(200, 0, 1, 2).expect("rel 200");
    tx.relationship_create(201, 0, 1, 3).expect("rel 201");
    tx.relationship_create(202, 0, 1, 4).expect("rel 202");
    engine.commit(&mut tx).expect("commit");
    assert!(
        !engine.stores().nodes.get_record(1).expect("node 1").dense,
        "three relationships stay under the pre-insert comparison"
    );
}

#[test]
fn fourth_insert_upgrades_to_dense() {
    let engine = engine_with_threshold(3);
    create_nodes(&engine, &[1, 2, 3, 4, 5]);
    let mut tx = engine.begin_tx();
    tx.relationship_create(200, 0, 1, 2).expect("rel 200");
    tx.relationship_create(201, 0, 1, 3).expect("rel 201");
    tx.relationship_create(202, 0, 1, 4).expect("rel 202");
    tx.relationship_create(203, 0, 1, 5).expect("rel 203");
    engine.commit(&mut tx).expect("commit");

    let stores = engine.stores();
    let node = stores.nodes.get_record(1).expect("node 1");
    assert!(node.dense);
    let group = stores.groups.get_record(node.next_rel).expect("group");
    assert_eq!(group.group_type, 0);
    assert_eq!(group.next, NO_REL);
    assert_eq!(group.first_in, NO_REL);
    assert_eq!(group.first_loop, NO_REL);

    // all four relationships hang off the outgoing bucket
    let mut count = 0;
    let mut rel_id = group.first_out;
    let mut previous = NO_REL;
    while rel_id != NO_REL {
        let rel = stores.rels.get_record(rel_id).expect("chain rel");
        if previous == NO_REL {
            assert!(rel.first_in_first_chain);
            assert_eq!(rel.first_prev_rel, 4, "head carries the bucket length");
        } else {
            assert!(!rel.first_in_first_chain);
            assert_eq!(rel.first_prev_rel, previous);
        }
        previous = rel_id;
        rel_id = rel.first_next_rel;
        count += 1;
    }
    assert_eq!(count, 4);
}

#[test]
fn empty_group_is_unlinked_after_last_delete() {
    let engine = engine_with_threshold(2);
    create_nodes(&engine, &[1, 2, 3, 4]);
    let mut tx = engine.begin_tx();
    tx.relationship_create(200, 0, 1, 2).expect("rel 200");
    tx.relationship_create(201, 0, 1, 3).expect("rel 201");
    tx.relationship_create(202, 7, 1, 4).expect("rel 202");
    engine.commit(&mut tx).expect("commit setup");
    let node = engine.stores().nodes.get_record(1).expect("node 1");
    assert!(node.dense);

    let mut tx = engine.begin_tx();
    tx.rel_delete(202).expect("delete the only type-7 rel");
    engine.commit(&mut tx).expect("commit delete");

    let stores = engine.stores();
    let node = stores.nodes.get_record(1).expect("node 1");
    let mut group_id = node.next_rel;
    let mut types = Vec::new();
    while group_id != NO_REL {
        let group = stores.groups.get_record(group_id).expect("group");
        types.push(group.group_type);
        group_id = group.next;
    }
    assert_eq!(types, vec![0], "type-7 group is gone from the chain");
}

#[test]
fn dense_node_statistics() {
    let engine = engine_with_threshold(3);
    create_nodes(&engine, &[1, 2, 3, 4, 5]);
    let mut tx = engine.begin_tx();
    tx.relationship_create(200, 0, 1, 2).expect("rel 200");
    tx.relationship_create(201, 0, 1, 3).expect("rel 201");
    tx.relationship_create(202, 0, 1, 4).expect("rel 202");
    tx.relationship_create(203, 0, 1, 5).expect("rel 203");
    tx.relationship_create(204, 3, 2, 1).expect("rel 204");
    engine.commit(&mut tx).expect("commit");

    let tx = engine.begin_tx();
    assert_eq!(
        tx.relationship_count(1, None, CountDirection::Both)
            .expect("count all"),
        5
    );
    assert_eq!(
        tx.relationship_count(1, Some(0), CountDirection::Both)
            .expect("count type 0"),
        4
    );
    assert_eq!(
        tx.relationship_count(1, Some(3), CountDirection::Incoming)
            .expect("count incoming type 3"),
        1
    );
    assert_eq!(
        tx.relationship_count(1, Some(3), CountDirection::Outgoing)
            .expect("count outgoing type 3"),
        0
    );
    let mut types = tx.relationship_types(1).expect("types");
    types.sort_unstable();
    assert_eq!(types, vec![0, 3]);
}

#[test]
fn property_add_change_remove_round_trip() {
    let engine = engine();
    create_nodes(&engine, &[1]);

    let mut tx = engine.begin_tx();
    tx.node_add_property(1, 7, PropertyValue::String("hi".into()))
        .expect("add property");
    engine.commit(&mut tx).expect("commit add");
    assert_ne!(
        engine.stores().nodes.get_record(1).expect("node 1").next_prop,
        NO_PROP
    );

    let mut tx = engine.begin_tx();
    tx.node_change_property(1, 7, PropertyValue::String("a".repeat(1000)))
        .expect("change property");
    engine.commit(&mut tx).expect("commit change");
    assert!(
        !engine.stores().props.strings.snapshot().is_empty(),
        "long value spilled into string records"
    );

    let mut props = Vec::new();
    let mut tx = engine.begin_tx();
    tx.node_load_properties(1, false, |key, value, _| props.push((key, value)))
        .expect("load properties");
    assert_eq!(props, vec![(7, PropertyValue::String("a".repeat(1000)))]);

    let mut tx = engine.begin_tx();
    tx.node_remove_property(1, 7).expect("remove property");
    engine.commit(&mut tx).expect("commit remove");

    let stores = engine.stores();
    assert_eq!(stores.nodes.get_record(1).expect("node 1").next_prop, NO_PROP);
    assert!(stores.props.snapshot().is_empty());
    assert!(
        stores.props.strings.snapshot().is_empty(),
        "dynamic value records are released"
    );
}

#[test]
fn full_head_record_forces_a_new_property_record() {
    let engine = engine();
    create_nodes(&engine, &[1]);
    let mut tx = engine.begin_tx();
    // two int blocks of 16 bytes fill the 32-byte payload exactly
    tx.node_add_property(1, 1, PropertyValue::Int(1)).expect("add 1");
    tx.node_add_property(1, 2, PropertyValue::Int(2)).expect("add 2");
    engine.commit(&mut tx).expect("commit fill");
    assert_eq!(engine.stores().props.snapshot().len(), 1);

    let mut tx = engine.begin_tx();
    tx.node_add_property(1, 3, PropertyValue::Bool(true))
        .expect("add overflow");
    engine.commit(&mut tx).expect("commit overflow");

    let stores = engine.stores();
    assert_eq!(stores.props.snapshot().len(), 2);
    let head_id = stores.nodes.get_record(1).expect("node 1").next_prop;
    let head = stores.props.get_record(head_id).expect("head record");
    assert_eq!(head.prev_prop, NO_PROP);
    assert_eq!(head.blocks.len(), 1, "the overflow block went to a fresh head");
    let tail = stores.props.get_record(head.next_prop).expect("tail record");
    assert_eq!(tail.prev_prop, head_id);
    assert_eq!(tail.blocks.len(), 2);
}

#[test]
fn node_delete_returns_removed_properties() {
    let engine = engine();
    create_nodes(&engine, &[1]);
    let mut tx = engine.begin_tx();
    tx.node_add_property(1, 3, PropertyValue::Int(42)).expect("add");
    engine.commit(&mut tx).expect("commit add");

    let mut tx = engine.begin_tx();
    let removed = tx.node_delete(1).expect("delete node");
    engine.commit(&mut tx).expect("commit delete");
    assert_eq!(removed.get(&3), Some(&PropertyValue::Int(42)));
    assert!(engine.stores().nodes.get_record(1).is_err());
}

#[test]
fn mutating_deleted_entities_is_refused() {
    let engine = engine();
    create_nodes(&engine, &[1, 2]);
    let mut tx = engine.begin_tx();
    tx.relationship_create(100, 0, 1, 2).expect("create rel");
    engine.commit(&mut tx).expect("commit setup");

    let mut tx = engine.begin_tx();
    tx.rel_delete(100).expect("first delete");
    assert!(matches!(tx.rel_delete(100), Err(GraphError::State(_))));
    assert!(matches!(
        tx.rel_add_property(100, 1, PropertyValue::Bool(true)),
        Err(GraphError::State(_))
    ));
    tx.rollback().expect("rollback");

    let mut tx = engine.begin_tx();
    tx.node_delete(1).expect("delete node");
    assert!(matches!(tx.node_delete(1), Err(GraphError::State(_))));
    assert!(matches!(
        tx.relationship_create(101, 0, 1, 2),
        Err(GraphError::State(_))
    ));
    tx.rollback().expect("rollback");
}

#[test]
fn lifecycle_violations_are_fatal() {
    let engine = engine();
    let mut tx = engine.begin_tx();
    tx.node_create(1).expect("create node");
    tx.prepare().expect("first prepare");
    assert!(matches!(tx.prepare(), Err(GraphError::Tx(_))));

    let mut tx = engine.begin_tx();
    tx.node_create(2).expect("create node");
    assert!(matches!(tx.commit(1), Err(GraphError::Tx(_))));

    let mut tx = engine.begin_tx();
    tx.node_create(3).expect("create node");
    tx.prepare().expect("prepare");
    assert!(
        matches!(tx.commit(9), Err(GraphError::Tx(_))),
        "commit id must be last committed plus one"
    );
}

#[test]
fn rollback_returns_created_ids() {
    let engine = engine();
    let stores = engine.stores();
    let node_id = stores.nodes.next_id();
    let rel_id = stores.rels.next_id();

    let mut tx = engine.begin_tx();
    tx.node_create(node_id).expect("create node");
    tx.node_create(stores.nodes.next_id()).expect("create second node");
    tx.relationship_create(rel_id, 0, node_id, node_id)
        .expect("create rel");
    tx.rollback().expect("rollback");

    assert_eq!(stores.rels.next_id(), rel_id, "relationship id was freed");
    assert!(stores.nodes.snapshot().is_empty());
}

#[test]
fn labels_flow_to_the_scan_store_and_spill_when_large() {
    let engine = engine();
    create_nodes(&engine, &[1, 2]);
    let mut tx = engine.begin_tx();
    tx.add_label_to_node(5, 1).expect("label 5 on node 1");
    tx.add_label_to_node(5, 2).expect("label 5 on node 2");
    tx.add_label_to_node(9, 2).expect("label 9 on node 2");
    engine.commit(&mut tx).expect("commit labels");

    let tx = engine.begin_tx();
    assert_eq!(tx.labels_for_node(1).expect("labels"), vec![5]);
    assert_eq!(tx.labels_for_node(2).expect("labels"), vec![5, 9]);
    drop(tx);

    // five labels cannot stay inline
    let mut tx = engine.begin_tx();
    for label in [1, 2, 3, 4] {
        tx.add_label_to_node(label, 1).expect("add label");
    }
    engine.commit(&mut tx).expect("commit spill");
    let tx = engine.begin_tx();
    assert_eq!(tx.labels_for_node(1).expect("labels"), vec![1, 2, 3, 4, 5]);

    let mut tx = engine.begin_tx();
    tx.remove_label_from_node(5, 2).expect("remove label");
    assert!(matches!(
        tx.remove_label_from_node(5, 2),
        Err(GraphError::State(_))
    ));
    assert!(matches!(
        tx.add_label_to_node(9, 2),
        Err(GraphError::State(_))
    ));
    tx.rollback().expect("rollback");
}

#[test]
fn token_creation_round_trips_names() {
    let engine = engine();
    let mut tx = engine.begin_tx();
    tx.create_label_token(0, "Person");
    tx.create_relationship_type_token(0, "KNOWS");
    tx.create_property_key_token(0, "name");
    engine.commit(&mut tx).expect("commit tokens");

    let stores = engine.stores();
    assert_eq!(
        stores.label_tokens.get_token(0).expect("label token").name,
        "Person"
    );
    assert_eq!(
        stores
            .rel_type_tokens
            .get_token(0)
            .expect("rel type token")
            .name,
        "KNOWS"
    );
    assert_eq!(
        stores
            .props
            .key_tokens
            .get_token(0)
            .expect("key token")
            .name,
        "name"
    );
}

#[test]
fn schema_rules_are_stored_and_dropped() {
    let engine = engine();
    let stores = engine.stores();
    let index_id = stores.schema.next_id();
    let rule = SchemaRule::Index {
        id: index_id,
        label: 1,
        property_key: 2,
    };
    let mut tx = engine.begin_tx();
    tx.create_schema_rule(rule.clone()).expect("create rule");
    engine.commit(&mut tx).expect("commit create");
    assert_eq!(stores.schema.load_rule(index_id).expect("load rule"), rule);

    let mut tx = engine.begin_tx();
    tx.drop_schema_rule(&rule).expect("drop rule");
    engine.commit(&mut tx).expect("commit drop");
    assert!(stores.schema.load_rule(index_id).is_err());
}

#[test]
fn constraint_index_owner_is_rewritten() {
    let engine = engine();
    let stores = engine.stores();
    let index_id = stores.schema.next_id();
    let rule = SchemaRule::ConstraintIndex {
        id: index_id,
        label: 1,
        property_key: 2,
        owning_constraint: None,
    };
    let mut tx = engine.begin_tx();
    tx.create_schema_rule(rule.clone()).expect("create rule");
    tx.set_constraint_index_owner(&rule, 77).expect("set owner");
    engine.commit(&mut tx).expect("commit");

    assert_eq!(
        stores.schema.load_rule(index_id).expect("load rule"),
        SchemaRule::ConstraintIndex {
            id: index_id,
            label: 1,
            property_key: 2,
            owning_constraint: Some(77),
        }
    );
}

#[test]
fn constraints_created_after_start_force_a_retry() {
    let engine = engine();
    let stores = engine.stores();
    let mut stale_tx = engine.begin_tx();

    let constraint = SchemaRule::UniquenessConstraint {
        id: stores.schema.next_id(),
        label: 1,
        property_key: 2,
        owned_index: 999,
    };
    let mut tx = engine.begin_tx();
    tx.create_schema_rule(constraint).expect("create constraint");
    engine.commit(&mut tx).expect("commit constraint");

    stale_tx.node_create(1).expect("create node");
    assert!(matches!(stale_tx.prepare(), Err(GraphError::Tx(_))));
}

#[test]
fn graph_properties_share_the_chain_machinery() {
    let engine = engine();
    let mut tx = engine.begin_tx();
    tx.graph_add_property(4, PropertyValue::String("engine-wide".into()))
        .expect("add graph property");
    engine.commit(&mut tx).expect("commit");

    let mut loaded = Vec::new();
    let tx = engine.begin_tx();
    tx.graph_load_properties(|key, value, _| loaded.push((key, value)))
        .expect("load graph properties");
    assert_eq!(
        loaded,
        vec![(4, PropertyValue::String("engine-wide".into()))]
    );
    drop(tx);

    let mut tx = engine.begin_tx();
    tx.graph_change_property(4, PropertyValue::Int(12))
        .expect("change graph property");
    tx.graph_remove_property(4).expect("remove graph property");
    engine.commit(&mut tx).expect("commit removal");
    assert_eq!(engine.stores().graph_record().next_prop, NO_PROP);
}

#[test]
fn read_only_reflects_staged_work() {
    let engine = engine();
    let mut tx = engine.begin_tx();
    assert!(tx.is_read_only());
    tx.node_create(1).expect("create node");
    assert!(!tx.is_read_only());
    engine.commit(&mut tx).expect("commit");
}

#[test]
fn light_loads_swallow_missing_records() {
    let engine = engine();
    create_nodes(&engine, &[1]);
    let mut tx = engine.begin_tx();
    assert!(tx.node_load_light(1).expect("load existing").is_some());
    assert!(tx.node_load_light(99).expect("load missing").is_none());
    assert!(tx.rel_load_light(42).expect("load missing rel").is_none());
}

#[test]
fn replaying_the_command_log_is_idempotent() {
    let source = engine();
    let first_node = source.stores().nodes.next_id();
    let second_node = source.stores().nodes.next_id();
    let rel = source.stores().rels.next_id();
    let mut tx = source.begin_tx();
    tx.node_create(first_node).expect("create node 1");
    tx.node_create(second_node).expect("create node 2");
    tx.create_label_token(0, "Person");
    tx.add_label_to_node(0, first_node).expect("label node 1");
    tx.relationship_create(rel, 0, first_node, second_node)
        .expect("create rel");
    tx.node_add_property(first_node, 3, PropertyValue::String("x".repeat(200)))
        .expect("add property");
    let identifier = tx.identifier();
    source.commit(&mut tx).expect("commit");

    let replica = engine();
    let commands = source.log().commands_for(identifier);
    assert!(!commands.is_empty());
    replica.recover([(1, commands)]).expect("replay");

    assert_eq!(
        replica.stores().nodes.snapshot(),
        source.stores().nodes.snapshot()
    );
    assert_eq!(
        replica.stores().rels.snapshot(),
        source.stores().rels.snapshot()
    );
    assert_eq!(
        replica.stores().props.snapshot(),
        source.stores().props.snapshot()
    );
    assert_eq!(
        replica.stores().props.strings.snapshot(),
        source.stores().props.strings.snapshot()
    );
    assert_eq!(
        replica.stores().label_tokens.snapshot(),
        source.stores().label_tokens.snapshot()
    );
    assert_eq!(replica.stores().last_committed_tx(), 1);
    assert_eq!(
        replica.stores().nodes.next_id(),
        source.stores().nodes.next_id(),
        "recovery refreshes the id generators"
    );
}

#[test]
fn recovery_populates_token_caches() {
    let source = engine();
    let mut tx = source.begin_tx();
    tx.create_relationship_type_token(0, "KNOWS");
    let identifier = tx.identifier();
    source.commit(&mut tx).expect("commit");

    let (replica, cache) = engine_with_recording_cache();
    replica
        .recover([(1, source.log().commands_for(identifier))])
        .expect("replay");
    assert!(cache.events().contains(&"add_rel_type(0)".to_string()));
}

#[test]
fn injecting_into_a_live_transaction_is_refused() {
    let source = engine();
    let mut tx = source.begin_tx();
    tx.node_create(1).expect("create node");
    let identifier = tx.identifier();
    source.commit(&mut tx).expect("commit");
    let commands = source.log().commands_for(identifier);

    let mut live = source.begin_tx();
    assert!(matches!(
        live.inject_command(commands[0].clone()),
        Err(GraphError::Tx(_))
    ));
}
