//! Metadata Store.
//!
//! Ordered [`MemoryRecord`] sequence kept positionally aligned with the
//! [`FlatIndex`][crate::index::FlatIndex]: record `p` describes vector `p`.
//! Mutations here are only ever issued by
//! [`MemoryTable`][crate::table::MemoryTable], which applies the mirror
//! operation to the index in the same call.

use chrono::{DateTime, Utc};
use recall_types::{AccessStats, MemoryRecord};
use uuid::Uuid;

/// Positionally ordered record list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    records: Vec<MemoryRecord>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already ordered record list (e.g. one loaded from disk).
    pub fn from_records(records: Vec<MemoryRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<MemoryRecord> {
        self.records
    }

    /// Append `record`; it takes the next free position.
    pub fn append(&mut self, record: MemoryRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn get(&self, position: usize) -> Option<&MemoryRecord> {
        self.records.get(position)
    }

    /// Position of the record carrying `id`, if present.
    pub fn position_of(&self, id: Uuid) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    /// Rewrite the text and timestamp of the record at `position`.
    ///
    /// Id, provenance and statistics are left untouched.  Returns `false` if
    /// `position` is out of range.
    pub fn replace_text_and_time(
        &mut self,
        position: usize,
        text: String,
        time: DateTime<Utc>,
    ) -> bool {
        match self.records.get_mut(position) {
            Some(record) => {
                record.text = text;
                record.created_at = time;
                true
            }
            None => false,
        }
    }

    /// Remove and return the record at `position`, shifting later records
    /// down by one.
    pub fn remove(&mut self, position: usize) -> Option<MemoryRecord> {
        (position < self.records.len()).then(|| self.records.remove(position))
    }

    /// Register a search hit on the record at `position`.
    ///
    /// `last_access` only ever moves forward, even if the clock does not.
    pub fn increment_access(&mut self, position: usize, time: DateTime<Utc>) -> bool {
        match self.records.get_mut(position) {
            Some(record) => {
                let stats = &mut record.stats;
                stats.total_access = stats.total_access.saturating_add(1);
                stats.last_access = Some(stats.last_access.map_or(time, |prev| prev.max(time)));
                true
            }
            None => false,
        }
    }

    pub fn set_created(&mut self, position: usize, time: DateTime<Utc>) -> bool {
        match self.records.get_mut(position) {
            Some(record) => {
                record.created_at = time;
                true
            }
            None => false,
        }
    }

    /// Fold another record's statistics into the record at `position`.
    pub fn absorb_stats(&mut self, position: usize, other: &AccessStats) -> bool {
        match self.records.get_mut(position) {
            Some(record) => {
                let stats = &mut record.stats;
                stats.total_access = stats.total_access.saturating_add(other.total_access);
                stats.last_access = stats.last_access.max(other.last_access);
                true
            }
            None => false,
        }
    }

    /// Keep only the records at `positions` (ascending), in their original
    /// relative order.
    pub fn retain_positions(&mut self, positions: &[usize]) {
        let mut keep = positions.iter().copied().peekable();
        let mut position = 0;
        self.records.retain(|_| {
            let kept = keep.peek() == Some(&position);
            if kept {
                keep.next();
            }
            position += 1;
            kept
        });
    }

    /// Pretty-printed JSON array of every record, in position order.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.records).unwrap_or_else(|_| "[]".to_string())
    }
}
