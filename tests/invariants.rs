//! Randomized workloads checked against the structural invariants of the
//! record chains after every commit, plus a full-log replay drill.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use cairn::store::records::{
    NodeId, PropertyRecord, RelId, RelationshipRecord, NO_PROP, NO_REL,
};
use cairn::store::Stores;
use cairn::{Config, Engine, PropertyValue};

/// Walks one relationship chain of `node_id` starting at `head`, checking
/// count placement, head flags and prev/next symmetry.
fn verify_chain(node_id: NodeId, head: RelId, rels: &BTreeMap<u64, RelationshipRecord>) {
    let head_rel = rels.get(&head).expect("chain head is in use");
    let stored_count = if head_rel.first_node == node_id {
        assert!(
            head_rel.first_in_first_chain,
            "head of node {node_id} chain must carry the first-in-chain flag: {head_rel:?}"
        );
        head_rel.first_prev_rel
    } else {
        assert!(
            head_rel.first_in_second_chain,
            "head of node {node_id} chain must carry the first-in-chain flag: {head_rel:?}"
        );
        head_rel.second_prev_rel
    };

    let mut walked = 0;
    let mut previous = NO_REL;
    let mut current = head;
    while current != NO_REL {
        let rel = rels.get(&current).expect("chain member is in use");
        let (prev_field, next_field, first_flag) = if rel.first_node == node_id {
            (rel.first_prev_rel, rel.first_next_rel, rel.first_in_first_chain)
        } else if rel.second_node == node_id {
            (
                rel.second_prev_rel,
                rel.second_next_rel,
                rel.first_in_second_chain,
            )
        } else {
            panic!("relationship {rel:?} does not involve node {node_id}");
        };
        if previous == NO_REL {
            assert!(first_flag, "chain head is missing its flag: {rel:?}");
        } else {
            assert!(!first_flag, "chain member flagged as head: {rel:?}");
            assert_eq!(
                prev_field, previous,
                "broken prev link at {current} in chain of node {node_id}"
            );
        }
        walked += 1;
        previous = current;
        current = next_field;
    }
    assert_eq!(
        stored_count, walked,
        "chain of node {node_id} stores length {stored_count} but walks {walked}"
    );
}

fn verify_property_chain(head: u64, props: &BTreeMap<u64, PropertyRecord>) {
    let mut previous = NO_PROP;
    let mut current = head;
    while current != NO_PROP {
        let record = props.get(&current).expect("property record is in use");
        assert_eq!(record.prev_prop, previous, "broken property chain at {current}");
        assert!(record.size() > 0, "empty property record {current} left in chain");
        previous = current;
        current = record.next_prop;
    }
}

fn verify_store_invariants(stores: &Arc<Stores>) {
    let nodes = stores.nodes.snapshot();
    let rels = stores.rels.snapshot();
    let groups = stores.groups.snapshot();
    let props = stores.props.snapshot();

    for (id, node) in &nodes {
        if !node.dense {
            if node.next_rel != NO_REL {
                verify_chain(*id, node.next_rel, &rels);
            }
        } else {
            let mut group_id = node.next_rel;
            let mut seen_types = HashSet::new();
            while group_id != NO_REL {
                let group = groups.get(&group_id).expect("group is in use");
                assert!(
                    seen_types.insert(group.group_type),
                    "node {id} has two groups of type {}",
                    group.group_type
                );
                assert!(
                    !group.is_empty(),
                    "empty group {group_id} left in chain of node {id}"
                );
                for head in [group.first_out, group.first_in, group.first_loop] {
                    if head != NO_REL {
                        verify_chain(*id, head, &rels);
                    }
                }
                group_id = group.next;
            }
        }
        verify_property_chain(node.next_prop, &props);
    }
    verify_property_chain(stores.graph_record().next_prop, &props);
}

#[derive(Debug, Clone)]
enum Op {
    CreateNode,
    CreateRel { from: usize, to: usize, rel_type: u32 },
    DeleteRel { pick: usize },
    SetProperty { node: usize, key: u32, value: i64 },
    RemoveProperty { node: usize, key: u32 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::CreateNode),
        5 => (any::<usize>(), any::<usize>(), 0u32..3).prop_map(|(from, to, rel_type)| {
            Op::CreateRel { from, to, rel_type }
        }),
        2 => any::<usize>().prop_map(|pick| Op::DeleteRel { pick }),
        3 => (any::<usize>(), 0u32..4, any::<i64>()).prop_map(|(node, key, value)| {
            Op::SetProperty { node, key, value }
        }),
        1 => (any::<usize>(), 0u32..4).prop_map(|(node, key)| Op::RemoveProperty { node, key }),
    ]
}

fn apply_ops(engine: &Engine, ops: &[Op]) {
    let stores = engine.stores();
    let mut nodes: Vec<NodeId> = Vec::new();
    let mut rels: Vec<RelId> = Vec::new();
    let mut props: HashSet<(NodeId, u32)> = HashSet::new();

    for op in ops {
        let mut tx = engine.begin_tx();
        match op {
            Op::CreateNode => {
                let id = stores.nodes.next_id();
                tx.node_create(id).expect("create node");
                nodes.push(id);
            }
            Op::CreateRel { from, to, rel_type } => {
                if nodes.is_empty() {
                    continue;
                }
                let from = nodes[from % nodes.len()];
                let to = nodes[to % nodes.len()];
                let id = stores.rels.next_id();
                tx.relationship_create(id, *rel_type, from, to)
                    .expect("create relationship");
                rels.push(id);
            }
            Op::DeleteRel { pick } => {
                if rels.is_empty() {
                    continue;
                }
                let id = rels.swap_remove(pick % rels.len());
                tx.rel_delete(id).expect("delete relationship");
            }
            Op::SetProperty { node, key, value } => {
                if nodes.is_empty() {
                    continue;
                }
                let node = nodes[node % nodes.len()];
                if props.insert((node, *key)) {
                    tx.node_add_property(node, *key, PropertyValue::Int(*value))
                        .expect("add property");
                } else {
                    tx.node_change_property(node, *key, PropertyValue::Int(*value))
                        .expect("change property");
                }
            }
            Op::RemoveProperty { node, key } => {
                if nodes.is_empty() {
                    continue;
                }
                let node = nodes[node % nodes.len()];
                if !props.remove(&(node, *key)) {
                    continue;
                }
                tx.node_remove_property(node, *key).expect("remove property");
            }
        }
        engine.commit(&mut tx).expect("commit op");
        verify_store_invariants(stores);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn invariants_hold_after_every_commit(ops in prop::collection::vec(arb_op(), 1..40)) {
        let engine = Engine::new(Config::with_dense_threshold(3));
        apply_ops(&engine, &ops);
    }
}

#[test]
fn seeded_churn_with_full_log_replay() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x6361_6972_6e01);
    let engine = Engine::new(Config::with_dense_threshold(4));
    let stores = engine.stores();
    let mut replay = Vec::new();

    let mut nodes: Vec<NodeId> = Vec::new();
    let mut rels: Vec<RelId> = Vec::new();
    {
        let mut tx = engine.begin_tx();
        for _ in 0..8 {
            let id = stores.nodes.next_id();
            tx.node_create(id).expect("create node");
            nodes.push(id);
        }
        let id = tx.identifier();
        let commit_id = engine.commit(&mut tx).expect("commit nodes");
        replay.push((commit_id, engine.log().commands_for(id)));
    }

    for _ in 0..60 {
        let mut tx = engine.begin_tx();
        if rels.is_empty() || rng.gen_bool(0.7) {
            let from = *nodes.choose(&mut rng).expect("node");
            let to = *nodes.choose(&mut rng).expect("node");
            let id = stores.rels.next_id();
            tx.relationship_create(id, rng.gen_range(0..3), from, to)
                .expect("create relationship");
            rels.push(id);
        } else {
            let index = rng.gen_range(0..rels.len());
            let id = rels.swap_remove(index);
            tx.rel_delete(id).expect("delete relationship");
        }
        let id = tx.identifier();
        let commit_id = engine.commit(&mut tx).expect("commit churn");
        replay.push((commit_id, engine.log().commands_for(id)));
        verify_store_invariants(stores);
    }

    let rebuilt = Engine::new(Config::with_dense_threshold(4));
    rebuilt.recover(replay).expect("replay full log");
    verify_store_invariants(rebuilt.stores());
    assert_eq!(rebuilt.stores().nodes.snapshot(), stores.nodes.snapshot());
    assert_eq!(rebuilt.stores().rels.snapshot(), stores.rels.snapshot());
    assert_eq!(
        rebuilt.stores().groups.snapshot(),
        stores.groups.snapshot()
    );
    assert_eq!(
        rebuilt.stores().last_committed_tx(),
        stores.last_committed_tx()
    );
}
