//! Node label field handling. Up to four small label ids are packed into the
//! field itself; larger sets spill into a dynamic record chain owned by the
//! node store, with the field carrying a marker bit and the chain head id.

use crate::error::{GraphError, Result};
use crate::store::records::{DynamicId, DynamicRecord, NodeRecord, TokenId};
use crate::store::NodeStore;

const INLINE_CAPACITY: usize = 4;
const INLINE_LABEL_BITS: u32 = 14;
const INLINE_LABEL_MASK: u64 = (1 << INLINE_LABEL_BITS) - 1;
const INLINE_COUNT_SHIFT: u32 = 56;
const DYNAMIC_MARKER: u64 = 1 << 63;

pub fn is_inline(field: u64) -> bool {
    field & DYNAMIC_MARKER == 0
}

pub fn dynamic_first_id(field: u64) -> DynamicId {
    field & !DYNAMIC_MARKER
}

pub fn inline_labels(field: u64) -> Vec<TokenId> {
    let count = ((field >> INLINE_COUNT_SHIFT) & 0x7) as usize;
    (0..count)
        .map(|i| ((field >> (i as u32 * INLINE_LABEL_BITS)) & INLINE_LABEL_MASK) as TokenId)
        .collect()
}

fn try_inline_encode(labels: &[TokenId]) -> Option<u64> {
    if labels.len() > INLINE_CAPACITY {
        return None;
    }
    if labels.iter().any(|&l| u64::from(l) > INLINE_LABEL_MASK) {
        return None;
    }
    let mut field = (labels.len() as u64) << INLINE_COUNT_SHIFT;
    for (i, &label) in labels.iter().enumerate() {
        field |= u64::from(label) << (i as u32 * INLINE_LABEL_BITS);
    }
    Some(field)
}

fn encode_dynamic_payload(labels: &[TokenId]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(labels.len() * 4);
    for label in labels {
        bytes.extend_from_slice(&label.to_le_bytes());
    }
    bytes
}

fn decode_dynamic_payload(records: &[DynamicRecord]) -> Vec<TokenId> {
    let mut bytes = Vec::new();
    for record in records.iter().filter(|r| r.in_use) {
        bytes.extend_from_slice(&record.data);
    }
    bytes
        .chunks_exact(4)
        .map(|c| TokenId::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// The labels of a record, without touching the store. `None` when the set
/// spilled into dynamic records that have not been loaded.
pub fn labels_if_loaded(record: &NodeRecord) -> Option<Vec<TokenId>> {
    if is_inline(record.label_field) {
        Some(inline_labels(record.label_field))
    } else if record.dynamic_labels.iter().any(|r| r.in_use) {
        Some(decode_dynamic_payload(&record.dynamic_labels))
    } else {
        None
    }
}

/// The labels of a heavy record. Errors when a spilled set is not loaded.
pub fn labels_of(record: &NodeRecord) -> Result<Vec<TokenId>> {
    labels_if_loaded(record).ok_or_else(|| {
        GraphError::InvalidRecord(format!(
            "dynamic label records of node {} have not been loaded",
            record.id
        ))
    })
}

fn write_labels(record: &mut NodeRecord, labels: &[TokenId], store: &NodeStore) {
    // Existing spilled records are released; the command execution frees them.
    for dynamic in &mut record.dynamic_labels {
        dynamic.in_use = false;
    }
    match try_inline_encode(labels) {
        Some(field) => record.label_field = field,
        None => {
            let records = store.allocate_label_records(&encode_dynamic_payload(labels));
            record.label_field = DYNAMIC_MARKER | records[0].id;
            record.dynamic_labels.extend(records);
        }
    }
}

pub fn add_label(record: &mut NodeRecord, label: TokenId, store: &NodeStore) -> Result<()> {
    let mut labels = labels_of(record)?;
    match labels.binary_search(&label) {
        Ok(_) => Err(GraphError::State(format!(
            "label {} already set on node {}",
            label, record.id
        ))),
        Err(pos) => {
            labels.insert(pos, label);
            write_labels(record, &labels, store);
            Ok(())
        }
    }
}

pub fn remove_label(record: &mut NodeRecord, label: TokenId, store: &NodeStore) -> Result<()> {
    let mut labels = labels_of(record)?;
    match labels.binary_search(&label) {
        Ok(pos) => {
            labels.remove(pos);
            write_labels(record, &labels, store);
            Ok(())
        }
        Err(_) => Err(GraphError::State(format!(
            "label {} not set on node {}",
            label, record.id
        ))),
    }
}

/// Drops every label from a record being deleted.
pub fn clear_labels(record: &mut NodeRecord) {
    for dynamic in &mut record.dynamic_labels {
        dynamic.in_use = false;
    }
    record.label_field = 0;
}

/// Structural validation of the label field, run during prepare.
pub fn validate_label_field(record: &NodeRecord) -> Result<()> {
    let field = record.label_field;
    if is_inline(field) {
        let count = ((field >> INLINE_COUNT_SHIFT) & 0x7) as usize;
        if count > INLINE_CAPACITY || field >> (INLINE_COUNT_SHIFT + 3) != 0 {
            return Err(GraphError::InvalidRecord(format!(
                "node {} has a malformed inline label field {:#x}",
                record.id, field
            )));
        }
        let labels = inline_labels(field);
        if labels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GraphError::InvalidRecord(format!(
                "node {} has unsorted inline labels {:?}",
                record.id, labels
            )));
        }
    } else if record.dynamic_labels.iter().any(|r| r.in_use) {
        let first = dynamic_first_id(field);
        let head_live = record
            .dynamic_labels
            .iter()
            .any(|r| r.in_use && r.id == first);
        if !head_live {
            return Err(GraphError::InvalidRecord(format!(
                "node {} label field points at dynamic record {} which is not live",
                record.id, first
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_round_trip() {
        let field = try_inline_encode(&[1, 5, 9000]).expect("fits inline");
        assert!(is_inline(field));
        assert_eq!(inline_labels(field), vec![1, 5, 9000]);
    }

    #[test]
    fn five_labels_do_not_fit_inline() {
        assert!(try_inline_encode(&[1, 2, 3, 4, 5]).is_none());
    }

    #[test]
    fn large_label_id_does_not_fit_inline() {
        assert!(try_inline_encode(&[1 << 14]).is_none());
    }
}
