//! [`MemoryTable`] – the record ↔ vector mapping layer.
//!
//! Owns a [`FlatIndex`] and a [`MetadataStore`] and is the only code that
//! mutates either.  Every public method either applies the paired mutation to
//! both structures or returns an error before touching either, so
//! `index.len() == metadata.len()` holds after every call.
//!
//! Records are addressed by position for index operations and by [`Uuid`]
//! for callers that need a handle that survives compaction.

use chrono::{DateTime, Utc};
use recall_types::{AccessStats, MemoryRecord};
use thiserror::Error;
use uuid::Uuid;

use crate::index::{FlatIndex, IndexError, Neighbor};
use crate::metadata::MetadataStore;

/// Errors that can arise from paired table mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("index holds {index} vectors but metadata holds {metadata} records")]
    Misaligned { index: usize, metadata: usize },
}

/// Aligned vector index plus metadata.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    index: FlatIndex,
    metadata: MetadataStore,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair a previously persisted index with its metadata.
    ///
    /// Fails with [`TableError::Misaligned`] if the counts differ.
    pub fn from_parts(index: FlatIndex, metadata: MetadataStore) -> Result<Self, TableError> {
        if index.len() != metadata.len() {
            return Err(TableError::Misaligned {
                index: index.len(),
                metadata: metadata.len(),
            });
        }
        Ok(Self { index, metadata })
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn records(&self) -> &[MemoryRecord] {
        self.metadata.records()
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.index.dimension()
    }

    pub fn record(&self, position: usize) -> Option<&MemoryRecord> {
        self.metadata.get(position)
    }

    pub fn position_of(&self, id: Uuid) -> Option<usize> {
        self.metadata.position_of(id)
    }

    /// Insert a brand-new record with its vector.  Returns its position.
    pub fn push(&mut self, record: MemoryRecord, vector: &[f32]) -> Result<usize, TableError> {
        let position = self.index.insert(vector)?;
        let meta_position = self.metadata.append(record);
        debug_assert_eq!(position, meta_position);
        self.debug_check_aligned();
        Ok(position)
    }

    /// The single nearest record to `vector`, if any.
    pub fn nearest(&self, vector: &[f32]) -> Result<Option<Neighbor>, TableError> {
        Ok(self.index.search(vector, 1)?.into_iter().next())
    }

    /// Up to `k` nearest records whose metadata satisfies `accept`.
    pub fn search<F>(&self, vector: &[f32], k: usize, accept: F) -> Result<Vec<Neighbor>, TableError>
    where
        F: Fn(&MemoryRecord) -> bool,
    {
        let metadata = &self.metadata;
        Ok(self
            .index
            .search_where(vector, k, |position| metadata.get(position).is_some_and(&accept))?)
    }

    /// Replace the text, vector and timestamp of the record at `position`.
    ///
    /// The record keeps its slot, id, provenance and statistics.
    pub fn rewrite(
        &mut self,
        position: usize,
        text: String,
        vector: &[f32],
        time: DateTime<Utc>,
    ) -> Result<(), TableError> {
        // `update` validates both position and dimension before writing.
        self.index.update(position, vector)?;
        let replaced = self.metadata.replace_text_and_time(position, text, time);
        debug_assert!(replaced);
        Ok(())
    }

    /// Register a search hit on the record at `position`.
    pub fn touch(&mut self, position: usize, time: DateTime<Utc>) -> Result<(), TableError> {
        self.check_position(position)?;
        self.metadata.increment_access(position, time);
        Ok(())
    }

    /// Fold `stats` into the record at `position` and mark it rewritten at
    /// `time`.
    pub fn absorb(
        &mut self,
        position: usize,
        stats: &AccessStats,
        time: DateTime<Utc>,
    ) -> Result<(), TableError> {
        self.check_position(position)?;
        self.metadata.absorb_stats(position, stats);
        self.metadata.set_created(position, time);
        Ok(())
    }

    /// Remove the record at `position` together with its vector.
    pub fn remove(&mut self, position: usize) -> Result<MemoryRecord, TableError> {
        self.index.remove_and_compact(position)?;
        let record = self.metadata.remove(position).ok_or(TableError::Misaligned {
            index: self.index.len(),
            metadata: self.metadata.len(),
        })?;
        self.debug_check_aligned();
        Ok(record)
    }

    /// Keep only the records for which `keep` returns `true`.
    ///
    /// The index is rebuilt from the surviving vectors (via reconstruct) in
    /// their original relative order.  When every record survives nothing is
    /// rebuilt.  Returns the number of records removed.
    pub fn retain<F>(&mut self, keep: F) -> Result<usize, TableError>
    where
        F: Fn(&MemoryRecord) -> bool,
    {
        let kept: Vec<usize> = self
            .metadata
            .records()
            .iter()
            .enumerate()
            .filter(|(_, record)| keep(record))
            .map(|(position, _)| position)
            .collect();
        let removed = self.len() - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut rebuilt = match self.index.dimension() {
            Some(d) => FlatIndex::with_dimension(d),
            None => FlatIndex::new(),
        };
        for &position in &kept {
            rebuilt.insert(&self.index.reconstruct(position)?)?;
        }

        self.index = rebuilt;
        self.metadata.retain_positions(&kept);
        self.debug_check_aligned();
        Ok(removed)
    }

    fn check_position(&self, position: usize) -> Result<(), TableError> {
        if position >= self.len() {
            return Err(IndexError::PositionOutOfRange {
                position,
                len: self.len(),
            }
            .into());
        }
        Ok(())
    }

    fn debug_check_aligned(&self) {
        debug_assert_eq!(
            self.index.len(),
            self.metadata.len(),
            "vector index and metadata diverged"
        );
    }
}
