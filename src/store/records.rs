use smallvec::SmallVec;

use crate::store::props::PropertyBlock;

pub type NodeId = u64;
pub type RelId = u64;
pub type PropId = u64;
pub type DynamicId = u64;
pub type TokenId = u32;
pub type TxId = u64;

pub const NO_REL: RelId = u64::MAX;
pub const NO_PROP: PropId = u64::MAX;
pub const NO_DYNAMIC: DynamicId = u64::MAX;

/// Fixed-shape node record. The node heads its relationship chain (or its
/// relationship-group chain when dense) and its property chain.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub in_use: bool,
    pub created: bool,
    pub dense: bool,
    pub next_rel: RelId,
    pub next_prop: PropId,
    /// Inlined label bits, or a marker plus the id of the first dynamic
    /// label record. See `store::labels`.
    pub label_field: u64,
    /// Dynamic label records, live and deleted, present once the record has
    /// been made heavy.
    pub dynamic_labels: Vec<DynamicRecord>,
}

impl NodeRecord {
    pub fn new_unused(id: NodeId) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            dense: false,
            next_rel: NO_REL,
            next_prop: NO_PROP,
            label_field: 0,
            dynamic_labels: Vec::new(),
        }
    }
}

/// A relationship participates in two doubly-linked chains, one per endpoint.
/// The `prev` field of the first record in a chain holds the chain length;
/// `first_in_*_chain` marks that head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipRecord {
    pub id: RelId,
    pub in_use: bool,
    pub created: bool,
    pub first_node: NodeId,
    pub second_node: NodeId,
    pub rel_type: TokenId,
    pub first_prev_rel: u64,
    pub first_next_rel: RelId,
    pub second_prev_rel: u64,
    pub second_next_rel: RelId,
    pub first_in_first_chain: bool,
    pub first_in_second_chain: bool,
    pub next_prop: PropId,
}

impl RelationshipRecord {
    pub fn new_unused(id: RelId) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            first_node: 0,
            second_node: 0,
            rel_type: 0,
            first_prev_rel: 1,
            first_next_rel: NO_REL,
            second_prev_rel: 1,
            second_next_rel: NO_REL,
            first_in_first_chain: true,
            first_in_second_chain: true,
            next_prop: NO_PROP,
        }
    }

    pub fn set_links(&mut self, first_node: NodeId, second_node: NodeId, rel_type: TokenId) {
        self.first_node = first_node;
        self.second_node = second_node;
        self.rel_type = rel_type;
    }
}

/// One record per (dense node, relationship type), holding the heads of the
/// outgoing, incoming and loop chains for that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipGroupRecord {
    pub id: u64,
    pub in_use: bool,
    pub created: bool,
    pub group_type: TokenId,
    pub next: u64,
    /// Backward pointer, maintained only while a group chain is walked in
    /// memory. Never persisted.
    pub prev: u64,
    pub first_out: RelId,
    pub first_in: RelId,
    pub first_loop: RelId,
}

impl RelationshipGroupRecord {
    pub fn new_unused(id: u64, group_type: TokenId) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            group_type,
            next: NO_REL,
            prev: NO_REL,
            first_out: NO_REL,
            first_in: NO_REL,
            first_loop: NO_REL,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first_out == NO_REL && self.first_in == NO_REL && self.first_loop == NO_REL
    }
}

/// The direction bucket a relationship occupies within a group record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Loop,
}

impl Direction {
    pub fn first(self, group: &RelationshipGroupRecord) -> RelId {
        match self {
            Direction::Outgoing => group.first_out,
            Direction::Incoming => group.first_in,
            Direction::Loop => group.first_loop,
        }
    }

    pub fn set_first(self, group: &mut RelationshipGroupRecord, rel: RelId) {
        match self {
            Direction::Outgoing => group.first_out = rel,
            Direction::Incoming => group.first_in = rel,
            Direction::Loop => group.first_loop = rel,
        }
    }
}

/// Which side of a relationship a node occupies, seen from that node.
pub fn direction_of(rel: &RelationshipRecord, node_id: NodeId) -> Direction {
    if rel.first_node == rel.second_node {
        Direction::Loop
    } else if rel.first_node == node_id {
        Direction::Outgoing
    } else {
        Direction::Incoming
    }
}

/// The primitive owning a property chain. Property commands use this to
/// decide which entity lock to take and which cache entry to invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyOwner {
    None,
    Node(NodeId),
    Rel(RelId),
    Graph,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    pub id: PropId,
    pub in_use: bool,
    pub created: bool,
    pub prev_prop: PropId,
    pub next_prop: PropId,
    pub owner: PropertyOwner,
    pub blocks: SmallVec<[PropertyBlock; 4]>,
    /// Dynamic value records released by block removal or re-encoding; they
    /// are written out (and thus freed) when the command executes.
    pub deleted_records: Vec<DynamicRecord>,
}

impl PropertyRecord {
    pub fn new_unused(id: PropId) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            prev_prop: NO_PROP,
            next_prop: NO_PROP,
            owner: PropertyOwner::None,
            blocks: SmallVec::new(),
            deleted_records: Vec::new(),
        }
    }

    /// Combined size in bytes of the blocks carried by this record.
    pub fn size(&self) -> usize {
        self.blocks.iter().map(PropertyBlock::size).sum()
    }

    pub fn block(&self, key: TokenId) -> Option<&PropertyBlock> {
        self.blocks.iter().find(|b| b.key == key)
    }

    pub fn block_index(&self, key: TokenId) -> Option<usize> {
        self.blocks.iter().position(|b| b.key == key)
    }

    pub fn add_block(&mut self, block: PropertyBlock) {
        self.blocks.push(block);
    }

    pub fn remove_block(&mut self, key: TokenId) -> Option<PropertyBlock> {
        self.block_index(key).map(|i| self.blocks.remove(i))
    }
}

/// Payload carried by a dynamic record. Property value chains are tagged so
/// freed records can be routed back to the store they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicKind {
    String,
    Array,
    Plain,
}

/// Variable-length payload record, chained through `next`. Used for long
/// property values, token names, spilled label sets and schema rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRecord {
    pub id: DynamicId,
    pub in_use: bool,
    pub created: bool,
    pub kind: DynamicKind,
    pub next: DynamicId,
    pub data: Vec<u8>,
}

impl DynamicRecord {
    pub fn new_unused(id: DynamicId) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            kind: DynamicKind::Plain,
            next: NO_DYNAMIC,
            data: Vec::new(),
        }
    }
}

/// Token record shared by the label, relationship-type and property-key
/// stores. The name lives in a dynamic record chain starting at `name_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub id: TokenId,
    pub in_use: bool,
    pub created: bool,
    pub name_id: DynamicId,
    pub name_records: Vec<DynamicRecord>,
}

impl TokenRecord {
    pub fn new(id: TokenId) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            name_id: NO_DYNAMIC,
            name_records: Vec::new(),
        }
    }
}

/// A resolved token: short id plus its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: TokenId,
    pub name: String,
}

/// Singleton record heading the graph-level property chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphRecord {
    pub next_prop: PropId,
}

impl GraphRecord {
    pub fn new() -> Self {
        Self { next_prop: NO_PROP }
    }
}

impl Default for GraphRecord {
    fn default() -> Self {
        Self::new()
    }
}
