use crate::error::{GraphError, Result};
use crate::store::records::{DynamicId, DynamicRecord, TokenId};

/// Bytes of block payload a single property record can carry.
pub const PROPERTY_PAYLOAD_SIZE: usize = 32;

/// Longest string/byte value stored inline in a block; anything longer
/// spills into dynamic value records.
pub const INLINE_VALUE_MAX: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// Encoded value inside a property block. Small values are inline; long
/// strings and byte arrays point at a dynamic record chain.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockPayload {
    Bool(bool),
    Int(i64),
    Float(f64),
    InlineString(String),
    InlineBytes(Vec<u8>),
    DynamicString { first: DynamicId, len: u32 },
    DynamicBytes { first: DynamicId, len: u32 },
}

/// A key-typed value packed into a property record. When the payload is
/// dynamic, `value_records` holds the chain once the block has been made
/// heavy.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyBlock {
    pub key: TokenId,
    pub payload: BlockPayload,
    pub value_records: Vec<DynamicRecord>,
}

impl PropertyBlock {
    pub fn new(key: TokenId, payload: BlockPayload) -> Self {
        Self {
            key,
            payload,
            value_records: Vec::new(),
        }
    }

    /// Size in bytes: one 8-byte header slot plus 8-byte value slots.
    pub fn size(&self) -> usize {
        let value_slots = match &self.payload {
            BlockPayload::Bool(_) => 0,
            BlockPayload::Int(_) | BlockPayload::Float(_) => 1,
            BlockPayload::InlineString(s) => s.len().div_ceil(8),
            BlockPayload::InlineBytes(b) => b.len().div_ceil(8),
            BlockPayload::DynamicString { .. } | BlockPayload::DynamicBytes { .. } => 1,
        };
        8 + value_slots * 8
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(
            self.payload,
            BlockPayload::DynamicString { .. } | BlockPayload::DynamicBytes { .. }
        )
    }

    /// Decodes the block back into a value. Dynamic payloads require the
    /// value records to have been loaded.
    pub fn value(&self) -> Result<PropertyValue> {
        match &self.payload {
            BlockPayload::Bool(v) => Ok(PropertyValue::Bool(*v)),
            BlockPayload::Int(v) => Ok(PropertyValue::Int(*v)),
            BlockPayload::Float(v) => Ok(PropertyValue::Float(*v)),
            BlockPayload::InlineString(s) => Ok(PropertyValue::String(s.clone())),
            BlockPayload::InlineBytes(b) => Ok(PropertyValue::Bytes(b.clone())),
            BlockPayload::DynamicString { len, .. } => {
                let bytes = self.dynamic_bytes(*len)?;
                String::from_utf8(bytes)
                    .map(PropertyValue::String)
                    .map_err(|_| {
                        GraphError::InvalidRecord(format!(
                            "dynamic string value of property key {} is not valid utf-8",
                            self.key
                        ))
                    })
            }
            BlockPayload::DynamicBytes { len, .. } => {
                Ok(PropertyValue::Bytes(self.dynamic_bytes(*len)?))
            }
        }
    }

    fn dynamic_bytes(&self, len: u32) -> Result<Vec<u8>> {
        if self.value_records.is_empty() {
            return Err(GraphError::InvalidRecord(format!(
                "dynamic value records of property key {} have not been loaded",
                self.key
            )));
        }
        let mut bytes = Vec::with_capacity(len as usize);
        for record in self.value_records.iter().filter(|r| r.in_use) {
            bytes.extend_from_slice(&record.data);
        }
        bytes.truncate(len as usize);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes() {
        assert_eq!(PropertyBlock::new(0, BlockPayload::Bool(true)).size(), 8);
        assert_eq!(PropertyBlock::new(0, BlockPayload::Int(7)).size(), 16);
        assert_eq!(PropertyBlock::new(0, BlockPayload::Float(0.5)).size(), 16);
        assert_eq!(
            PropertyBlock::new(0, BlockPayload::InlineString("hi".into())).size(),
            16
        );
        // 24 inline bytes fill a record's payload exactly together with the header
        let full = PropertyBlock::new(0, BlockPayload::InlineString("a".repeat(24)));
        assert_eq!(full.size(), PROPERTY_PAYLOAD_SIZE);
        let spilled = PropertyBlock::new(
            0,
            BlockPayload::DynamicString {
                first: 3,
                len: 1000,
            },
        );
        assert_eq!(spilled.size(), 16);
    }
}
