use crate::error::{GraphError, Result};
use crate::store::records::{DynamicRecord, TokenId};

const KIND_INDEX: u8 = 1;
const KIND_CONSTRAINT_INDEX: u8 = 2;
const KIND_UNIQUENESS_CONSTRAINT: u8 = 3;

/// A schema rule, serialized into a dynamic record chain whose head id is
/// the rule id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaRule {
    /// Plain index over (label, property key).
    Index {
        id: u64,
        label: TokenId,
        property_key: TokenId,
    },
    /// Index backing a uniqueness constraint; the owner is unset while the
    /// constraint is still being populated.
    ConstraintIndex {
        id: u64,
        label: TokenId,
        property_key: TokenId,
        owning_constraint: Option<u64>,
    },
    /// Uniqueness constraint together with the index that enforces it.
    UniquenessConstraint {
        id: u64,
        label: TokenId,
        property_key: TokenId,
        owned_index: u64,
    },
}

impl SchemaRule {
    pub fn id(&self) -> u64 {
        match self {
            SchemaRule::Index { id, .. }
            | SchemaRule::ConstraintIndex { id, .. }
            | SchemaRule::UniquenessConstraint { id, .. } => *id,
        }
    }

    pub fn label(&self) -> TokenId {
        match self {
            SchemaRule::Index { label, .. }
            | SchemaRule::ConstraintIndex { label, .. }
            | SchemaRule::UniquenessConstraint { label, .. } => *label,
        }
    }

    pub fn property_key(&self) -> TokenId {
        match self {
            SchemaRule::Index { property_key, .. }
            | SchemaRule::ConstraintIndex { property_key, .. }
            | SchemaRule::UniquenessConstraint { property_key, .. } => *property_key,
        }
    }

    /// True for rules whose creation restricts what other transactions may
    /// have written concurrently.
    pub fn is_constraint(&self) -> bool {
        matches!(self, SchemaRule::UniquenessConstraint { .. })
    }

    pub fn with_owning_constraint(self, constraint_id: u64) -> Result<Self> {
        match self {
            SchemaRule::ConstraintIndex {
                id,
                label,
                property_key,
                ..
            } => Ok(SchemaRule::ConstraintIndex {
                id,
                label,
                property_key,
                owning_constraint: Some(constraint_id),
            }),
            other => Err(GraphError::State(format!(
                "schema rule {} is not a constraint index",
                other.id()
            ))),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(21);
        match self {
            SchemaRule::Index {
                label,
                property_key,
                ..
            } => {
                bytes.push(KIND_INDEX);
                bytes.extend_from_slice(&label.to_le_bytes());
                bytes.extend_from_slice(&property_key.to_le_bytes());
            }
            SchemaRule::ConstraintIndex {
                label,
                property_key,
                owning_constraint,
                ..
            } => {
                bytes.push(KIND_CONSTRAINT_INDEX);
                bytes.extend_from_slice(&label.to_le_bytes());
                bytes.extend_from_slice(&property_key.to_le_bytes());
                match owning_constraint {
                    Some(owner) => {
                        bytes.push(1);
                        bytes.extend_from_slice(&owner.to_le_bytes());
                    }
                    None => bytes.push(0),
                }
            }
            SchemaRule::UniquenessConstraint {
                label,
                property_key,
                owned_index,
                ..
            } => {
                bytes.push(KIND_UNIQUENESS_CONSTRAINT);
                bytes.extend_from_slice(&label.to_le_bytes());
                bytes.extend_from_slice(&property_key.to_le_bytes());
                bytes.extend_from_slice(&owned_index.to_le_bytes());
            }
        }
        bytes
    }

    pub fn deserialize(id: u64, bytes: &[u8]) -> Result<Self> {
        let malformed = || GraphError::InvalidRecord(format!("schema rule {id} is malformed"));
        let kind = *bytes.first().ok_or_else(malformed)?;
        let label = read_u32(bytes, 1).ok_or_else(malformed)?;
        let property_key = read_u32(bytes, 5).ok_or_else(malformed)?;
        match kind {
            KIND_INDEX => Ok(SchemaRule::Index {
                id,
                label,
                property_key,
            }),
            KIND_CONSTRAINT_INDEX => {
                let owning_constraint = match bytes.get(9) {
                    Some(0) => None,
                    Some(1) => Some(read_u64(bytes, 10).ok_or_else(malformed)?),
                    _ => return Err(malformed()),
                };
                Ok(SchemaRule::ConstraintIndex {
                    id,
                    label,
                    property_key,
                    owning_constraint,
                })
            }
            KIND_UNIQUENESS_CONSTRAINT => Ok(SchemaRule::UniquenessConstraint {
                id,
                label,
                property_key,
                owned_index: read_u64(bytes, 9).ok_or_else(malformed)?,
            }),
            _ => Err(GraphError::InvalidRecord(format!(
                "schema rule {id} has unknown kind {kind}"
            ))),
        }
    }

    /// Reads a rule back out of its dynamic records.
    pub fn from_records(id: u64, records: &[DynamicRecord]) -> Result<Self> {
        let mut bytes = Vec::new();
        for record in records.iter().filter(|r| r.in_use) {
            bytes.extend_from_slice(&record.data);
        }
        Self::deserialize(id, &bytes)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    bytes.get(at..at + 8).map(|s| {
        u64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]])
    })
}
