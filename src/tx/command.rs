//! Commands are the serialized unit of change: one per touched record,
//! carrying enough state to re-execute during recovery replay.

use crate::error::Result;
use crate::store::records::{
    DynamicRecord, GraphRecord, NodeId, NodeRecord, PropertyOwner, PropertyRecord,
    RelationshipGroupRecord, RelationshipRecord, TokenRecord, TxId,
};
use crate::store::schema::SchemaRule;
use crate::store::Stores;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Update,
    Delete,
}

impl Mode {
    fn of(in_use: bool, created: bool) -> Mode {
        if !in_use {
            Mode::Delete
        } else if created {
            Mode::Create
        } else {
            Mode::Update
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeCommand {
    pub before: NodeRecord,
    pub after: NodeRecord,
}

impl NodeCommand {
    pub fn key(&self) -> u64 {
        self.after.id
    }

    pub fn mode(&self) -> Mode {
        Mode::of(self.after.in_use, self.after.created)
    }

    pub fn execute(&self, stores: &Stores) -> Result<()> {
        stores.nodes.update_record(&self.after);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipCommand {
    pub after: RelationshipRecord,
}

impl RelationshipCommand {
    pub fn key(&self) -> u64 {
        self.after.id
    }

    pub fn mode(&self) -> Mode {
        Mode::of(self.after.in_use, self.after.created)
    }

    pub fn execute(&self, stores: &Stores) -> Result<()> {
        stores.rels.update_record(&self.after);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipGroupCommand {
    pub after: RelationshipGroupRecord,
}

impl RelationshipGroupCommand {
    pub fn key(&self) -> u64 {
        self.after.id
    }

    pub fn mode(&self) -> Mode {
        Mode::of(self.after.in_use, self.after.created)
    }

    pub fn execute(&self, stores: &Stores) -> Result<()> {
        stores.groups.update_record(&self.after);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyCommand {
    pub before: PropertyRecord,
    pub after: PropertyRecord,
}

impl PropertyCommand {
    pub fn key(&self) -> u64 {
        self.after.id
    }

    pub fn mode(&self) -> Mode {
        Mode::of(self.after.in_use, self.after.created)
    }

    /// The node to lock while this command executes, when the owner is a
    /// node.
    pub fn node_id(&self) -> Option<NodeId> {
        match self.after.owner {
            PropertyOwner::Node(id) => Some(id),
            _ => None,
        }
    }

    pub fn execute(&self, stores: &Stores) -> Result<()> {
        stores.props.update_record(&self.after)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCommand {
    pub after: TokenRecord,
}

impl TokenCommand {
    pub fn key(&self) -> u64 {
        u64::from(self.after.id)
    }

    pub fn mode(&self) -> Mode {
        Mode::of(self.after.in_use, self.after.created)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRuleCommand {
    pub before: Vec<DynamicRecord>,
    pub after: Vec<DynamicRecord>,
    pub rule: SchemaRule,
    /// Commit stamps the transaction id just before executing the command.
    pub tx_id: TxId,
}

impl SchemaRuleCommand {
    pub fn key(&self) -> u64 {
        self.rule.id()
    }

    pub fn mode(&self) -> Mode {
        match self.after.first() {
            Some(record) => Mode::of(record.in_use, record.created),
            None => Mode::Update,
        }
    }

    pub fn execute(&self, stores: &Stores) -> Result<()> {
        for record in &self.after {
            stores.schema.update_record(record);
        }
        if self.rule.is_constraint() && self.mode() != Mode::Delete {
            stores.set_latest_constraint_introducing_tx(self.tx_id);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphCommand {
    pub after: GraphRecord,
}

impl GraphCommand {
    pub fn execute(&self, stores: &Stores) -> Result<()> {
        stores.update_graph_record(self.after);
        Ok(())
    }
}

/// The full command taxonomy, used at the log boundary and for recovery
/// injection.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Node(NodeCommand),
    Relationship(RelationshipCommand),
    RelationshipGroup(RelationshipGroupCommand),
    Property(PropertyCommand),
    RelationshipTypeToken(TokenCommand),
    LabelToken(TokenCommand),
    PropertyKeyToken(TokenCommand),
    SchemaRule(SchemaRuleCommand),
    Graph(GraphCommand),
}

impl Command {
    pub fn key(&self) -> u64 {
        match self {
            Command::Node(c) => c.key(),
            Command::Relationship(c) => c.key(),
            Command::RelationshipGroup(c) => c.key(),
            Command::Property(c) => c.key(),
            Command::RelationshipTypeToken(c)
            | Command::LabelToken(c)
            | Command::PropertyKeyToken(c) => c.key(),
            Command::SchemaRule(c) => c.key(),
            Command::Graph(_) => 0,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Command::Node(c) => c.mode(),
            Command::Relationship(c) => c.mode(),
            Command::RelationshipGroup(c) => c.mode(),
            Command::Property(c) => c.mode(),
            Command::RelationshipTypeToken(c)
            | Command::LabelToken(c)
            | Command::PropertyKeyToken(c) => c.mode(),
            Command::SchemaRule(c) => c.mode(),
            Command::Graph(_) => Mode::Update,
        }
    }
}
