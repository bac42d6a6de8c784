//! Per-transaction staging of record mutations. Each record kind gets one
//! `RecordChanges` instance; records are referenced by id and mutated through
//! short-lived `Change` handles, never through long-held pointers.
//!
//! Reading accessors never register a change, so walking a chain does not
//! inflate the command set. The first changing accessor promotes the entry:
//! it is queued for command materialization and, for kinds that track before
//! state, a snapshot of the unmodified record is taken.

use rustc_hash::FxHashMap;

use crate::error::{GraphError, Result};

/// Store access for one record kind.
pub trait RecordLoader {
    type Record;
    type Extra;

    /// Builds an empty record for a freshly created id.
    fn new_unused(&self, key: u64, extra: &Self::Extra) -> Result<Self::Record>;
    /// Fetches an existing record from the store.
    fn load(&self, key: u64, extra: &Self::Extra) -> Result<Self::Record>;
    /// Materializes lazily loaded sub-records before data mutation.
    fn ensure_heavy(&self, record: &mut Self::Record) -> Result<()>;
    /// Snapshots a record for before-state tracking. Kinds that do not track
    /// before state refuse.
    fn clone_record(&self, record: &Self::Record) -> Result<Self::Record>;
}

#[derive(Debug)]
pub struct RecordChange<R, A> {
    key: u64,
    record: R,
    before: Option<R>,
    extra: Option<A>,
    created: bool,
    changed: bool,
}

impl<R, A> RecordChange<R, A> {
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    pub fn before(&self) -> Option<&R> {
        self.before.as_ref()
    }

    pub fn extra(&self) -> Option<&A> {
        self.extra.as_ref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

pub struct RecordChanges<L: RecordLoader> {
    loader: L,
    map: FxHashMap<u64, RecordChange<L::Record, L::Extra>>,
    /// Keys in promotion order; commands are built in this order.
    changed: Vec<u64>,
    track_before: bool,
}

impl<L: RecordLoader> RecordChanges<L> {
    pub fn new(loader: L, track_before: bool) -> Self {
        Self {
            loader,
            map: FxHashMap::default(),
            changed: Vec::new(),
            track_before,
        }
    }

    /// Registers a record for a freshly created id.
    pub fn create(&mut self, key: u64, extra: L::Extra) -> Result<Change<'_, L>> {
        if self.map.contains_key(&key) {
            return Err(GraphError::State(format!(
                "record {key} has already been created or loaded in this transaction"
            )));
        }
        let record = self.loader.new_unused(key, &extra)?;
        self.map.insert(
            key,
            RecordChange {
                key,
                record,
                before: None,
                extra: Some(extra),
                created: true,
                changed: false,
            },
        );
        Ok(self.handle(key))
    }

    pub fn get_or_load(&mut self, key: u64, extra: L::Extra) -> Result<Change<'_, L>> {
        if !self.map.contains_key(&key) {
            let record = self.loader.load(key, &extra)?;
            self.map.insert(
                key,
                RecordChange {
                    key,
                    record,
                    before: None,
                    extra: Some(extra),
                    created: false,
                    changed: false,
                },
            );
        }
        Ok(self.handle(key))
    }

    pub fn get_if_loaded(&self, key: u64) -> Option<&RecordChange<L::Record, L::Extra>> {
        self.map.get(&key)
    }

    fn handle(&mut self, key: u64) -> Change<'_, L> {
        let entry = self.map.get_mut(&key).expect("entry inserted above");
        Change {
            loader: &self.loader,
            entry,
            changed: &mut self.changed,
            track_before: self.track_before,
        }
    }

    /// Promoted changes in promotion order.
    pub fn changes(&self) -> impl Iterator<Item = &RecordChange<L::Record, L::Extra>> {
        self.changed.iter().filter_map(|key| self.map.get(key))
    }

    pub fn change_size(&self) -> usize {
        self.changed.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.changed.clear();
    }
}

/// Borrowed view of one staged record. Only one handle can exist at a time,
/// which forces chain surgery into the copy-fields-then-write-back shape.
pub struct Change<'a, L: RecordLoader> {
    loader: &'a L,
    entry: &'a mut RecordChange<L::Record, L::Extra>,
    changed: &'a mut Vec<u64>,
    track_before: bool,
}

impl<'a, L: RecordLoader> Change<'a, L> {
    pub fn key(&self) -> u64 {
        self.entry.key
    }

    pub fn is_created(&self) -> bool {
        self.entry.created
    }

    pub fn extra(&self) -> Option<&L::Extra> {
        self.entry.extra.as_ref()
    }

    pub fn set_extra(&mut self, extra: L::Extra) {
        self.entry.extra = Some(extra);
    }

    pub fn get_before(&self) -> Option<&L::Record> {
        self.entry.before.as_ref()
    }

    /// Reads linkage fields without promoting the entry.
    pub fn for_reading_linkage(&self) -> &L::Record {
        &self.entry.record
    }

    /// Reads data fields, materializing heavy parts, without promoting.
    pub fn for_reading_data(&mut self) -> Result<&L::Record> {
        self.loader.ensure_heavy(&mut self.entry.record)?;
        Ok(&self.entry.record)
    }

    pub fn for_changing_linkage(&mut self) -> Result<&mut L::Record> {
        self.promote(false)
    }

    pub fn for_changing_data(&mut self) -> Result<&mut L::Record> {
        self.promote(true)
    }

    /// Mutates the record without registering a change. Reserved for fields
    /// that are never persisted, like the group chain's backward pointer.
    pub fn transient_mut(&mut self) -> &mut L::Record {
        &mut self.entry.record
    }

    fn promote(&mut self, heavy: bool) -> Result<&mut L::Record> {
        if heavy {
            self.loader.ensure_heavy(&mut self.entry.record)?;
        }
        if !self.entry.changed {
            if self.track_before && self.entry.before.is_none() {
                self.entry.before = Some(self.loader.clone_record(&self.entry.record)?);
            }
            self.entry.changed = true;
            self.changed.push(self.entry.key);
        }
        Ok(&mut self.entry.record)
    }
}
