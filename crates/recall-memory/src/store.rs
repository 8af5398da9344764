//! [`MemoryStore`] – the semantic memory orchestrator.
//!
//! Composes an [`Embedder`], a [`TextGenerator`], the aligned
//! [`MemoryTable`] and a [`SnapshotStore`] into the public add / search /
//! cleanup / export surface.
//!
//! # Classification
//!
//! Every [`add_memory`][MemoryStore::add_memory] compares the new fact with
//! its single nearest stored neighbour by cosine similarity:
//!
//! | similarity                         | action                                   |
//! |------------------------------------|------------------------------------------|
//! | `> identical_similarity`           | discard – nothing new to learn           |
//! | `> similar_similarity`             | merge via the text generator (new wins)  |
//! | otherwise, or empty store          | insert as a new record                   |
//!
//! # Search threshold
//!
//! [`SearchParams::similarity_threshold`] is a **minimum cosine
//! similarity**: a hit passes when `similarity >= threshold`.  Raising the
//! threshold makes search stricter.
//!
//! # Consistency
//!
//! All collaborator calls of an operation complete before the table is
//! touched, so a collaborator failure (or a dropped future) leaves the store
//! exactly as it was.  Successful mutations are flushed with one whole-snapshot
//! write before the call returns; if that write fails the error is returned
//! but the in-memory state stays valid.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_types::{CollaboratorError, MemoryMeta, MemoryRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborator::{Embedder, TextGenerator};
use crate::filter::Filter;
use crate::index::IndexError;
use crate::merge::{clean_merge_reply, merge_prompt};
use crate::metadata::MetadataStore;
use crate::persistence::{PersistenceError, SnapshotStore, StorageBackend};
use crate::table::{MemoryTable, TableError};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Above this similarity a new fact is a duplicate and is dropped.
pub const DEFAULT_IDENTICAL_SIMILARITY: f32 = 0.97;
/// Above this similarity (and up to identical) a new fact is merged.
pub const DEFAULT_SIMILAR_SIMILARITY: f32 = 0.85;
/// Default number of search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;
/// Default minimum similarity for a search hit.
pub const DEFAULT_SEARCH_THRESHOLD: f32 = 0.6;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from memory store operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Memory text must not be empty")]
    EmptyText,
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Memory table error: {0}")]
    Table(#[from] TableError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// File prefix ([`StorageBackend::File`]) or database file
    /// ([`StorageBackend::Sqlite`]).  Must not be empty.
    pub storage_path: PathBuf,
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_identical")]
    pub identical_similarity: f32,
    #[serde(default = "default_similar")]
    pub similar_similarity: f32,
    #[serde(default = "default_limit")]
    pub search_limit: usize,
    #[serde(default = "default_threshold")]
    pub search_threshold: f32,
}

fn default_identical() -> f32 {
    DEFAULT_IDENTICAL_SIMILARITY
}
fn default_similar() -> f32 {
    DEFAULT_SIMILAR_SIMILARITY
}
fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}
fn default_threshold() -> f32 {
    DEFAULT_SEARCH_THRESHOLD
}

/// How a new fact relates to its nearest stored neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Identical,
    Similar,
    Distinct,
}

impl MemoryConfig {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            backend: StorageBackend::default(),
            identical_similarity: DEFAULT_IDENTICAL_SIMILARITY,
            similar_similarity: DEFAULT_SIMILAR_SIMILARITY,
            search_limit: DEFAULT_SEARCH_LIMIT,
            search_threshold: DEFAULT_SEARCH_THRESHOLD,
        }
    }

    pub fn with_backend(mut self, backend: StorageBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Reject configurations the store cannot operate with.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.storage_path.as_os_str().is_empty() {
            return Err(MemoryError::Config("storage path cannot be empty".into()));
        }
        let in_range = |v: f32| (-1.0..=1.0).contains(&v);
        if !in_range(self.identical_similarity) || !in_range(self.similar_similarity) {
            return Err(MemoryError::Config(
                "similarity thresholds must lie in [-1, 1]".into(),
            ));
        }
        if self.identical_similarity <= self.similar_similarity {
            return Err(MemoryError::Config(format!(
                "identical_similarity ({}) must be stricter than similar_similarity ({})",
                self.identical_similarity, self.similar_similarity
            )));
        }
        Ok(())
    }

    /// Place `similarity` into one of the three bands.
    pub fn classify(&self, similarity: f32) -> Classification {
        if similarity > self.identical_similarity {
            Classification::Identical
        } else if similarity > self.similar_similarity {
            Classification::Similar
        } else {
            Classification::Distinct
        }
    }

    /// Search parameters built from the configured defaults.
    pub fn search_params(&self) -> SearchParams {
        SearchParams::new(self.search_limit, self.search_threshold)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Source of "now" for timestamps and retention decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operation results
// ─────────────────────────────────────────────────────────────────────────────

/// What [`MemoryStore::add_memory`] did with the new fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Near-identical to `existing`; nothing changed.
    Discarded { existing: Uuid },
    /// Merged into record `id`, whose text is now `text`.
    Merged { id: Uuid, text: String },
    /// Stored as a new record.
    Inserted { id: Uuid },
}

/// Parameters for [`MemoryStore::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Maximum number of results.
    pub limit: usize,
    /// Minimum cosine similarity for a hit to pass.
    pub similarity_threshold: f32,
    /// Metadata predicates applied before ranking.
    pub filter: Filter,
}

impl SearchParams {
    pub fn new(limit: usize, similarity_threshold: f32) -> Self {
        Self {
            limit,
            similarity_threshold,
            filter: Filter::default(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_LIMIT, DEFAULT_SEARCH_THRESHOLD)
    }
}

/// A search result with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The record, with statistics already updated for this hit.
    pub record: MemoryRecord,
    pub similarity: f32,
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────────────────

/// Long-term semantic memory.
///
/// Every mutating method takes `&mut self`; share one store between tasks via
/// [`SharedMemory`][crate::shared::SharedMemory].
pub struct MemoryStore {
    config: MemoryConfig,
    table: MemoryTable,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn TextGenerator>,
    snapshots: Box<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Open the store described by `config`, restoring the last snapshot.
    ///
    /// An unreadable snapshot is logged and the store starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Config`] if `config` is invalid.
    pub fn open(
        config: MemoryConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self, MemoryError> {
        config.validate()?;
        let snapshots = config.backend.open(&config.storage_path);
        Self::with_snapshot_store(config, embedder, generator, snapshots)
    }

    /// Like [`open`][Self::open] but with an explicit snapshot store.
    pub fn with_snapshot_store(
        config: MemoryConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
        snapshots: Box<dyn SnapshotStore>,
    ) -> Result<Self, MemoryError> {
        config.validate()?;
        let table = load_table(snapshots.as_ref());
        Ok(Self {
            config,
            table,
            embedder,
            generator,
            snapshots,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Embedding dimension, once known.
    pub fn dimension(&self) -> Option<usize> {
        self.table.dimension()
    }

    /// All records in position order.
    pub fn records(&self) -> &[MemoryRecord] {
        self.table.records()
    }

    /// The aligned index + metadata pair.
    pub fn table(&self) -> &MemoryTable {
        &self.table
    }

    /// Every record as a pretty-printed JSON array, for inspection.
    pub fn get_all_memories_json(&self) -> String {
        self.table.metadata().to_json()
    }

    /// Write the current state to the snapshot store.
    pub fn save(&self) -> Result<(), MemoryError> {
        self.snapshots
            .save(self.table.index(), self.table.records())
            .map_err(|e| {
                warn!(error = %e, location = %self.snapshots.location(), "memory snapshot write failed");
                MemoryError::from(e)
            })
    }

    // ── add ──────────────────────────────────────────────────────────────────

    /// Remember `text`: discard it, merge it into its nearest neighbour, or
    /// insert it, depending on similarity.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::EmptyText`] for blank input.
    /// * [`MemoryError::DimensionMismatch`] if the embedder changed dimension.
    /// * [`MemoryError::Collaborator`] if embedding or merging failed; the
    ///   store is unchanged.
    /// * [`MemoryError::Persistence`] if the snapshot write failed; the
    ///   in-memory change is kept.
    pub async fn add_memory(
        &mut self,
        text: &str,
        meta: MemoryMeta,
    ) -> Result<AddOutcome, MemoryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MemoryError::EmptyText);
        }
        let vector = self.embed(text).await?;

        let Some(nearest) = self.table.nearest(&vector)? else {
            return self.insert(text, meta, &vector);
        };
        let similarity = nearest.similarity();
        match self.config.classify(similarity) {
            Classification::Identical => {
                let existing = self.record_at(nearest.position)?.id;
                debug!(%existing, similarity, "new memory is identical to a stored one; discarded");
                Ok(AddOutcome::Discarded { existing })
            }
            Classification::Similar => {
                debug!(position = nearest.position, similarity, "new memory is similar; merging");
                self.merge(nearest.position, text).await
            }
            Classification::Distinct => self.insert(text, meta, &vector),
        }
    }

    fn insert(
        &mut self,
        text: &str,
        meta: MemoryMeta,
        vector: &[f32],
    ) -> Result<AddOutcome, MemoryError> {
        let record = MemoryRecord::new(text, meta, self.clock.now());
        let id = record.id;
        self.table.push(record, vector)?;
        info!(%id, records = self.table.len(), "memory inserted");
        self.save()?;
        Ok(AddOutcome::Inserted { id })
    }

    async fn merge(&mut self, position: usize, new_fact: &str) -> Result<AddOutcome, MemoryError> {
        let (id, old_fact) = {
            let record = self.record_at(position)?;
            (record.id, record.text.clone())
        };

        let reply = self
            .generator
            .generate(&merge_prompt(&old_fact, new_fact))
            .await?;
        let merged = clean_merge_reply(&reply)
            .ok_or_else(|| CollaboratorError::BadResponse("empty merge reply".into()))?;
        let merged_vector = self.embed(&merged).await?;

        // No collaborator calls past this point: mutate.
        let now = self.clock.now();
        let duplicate = self
            .table
            .search(&merged_vector, 1, |r| r.id != id)?
            .into_iter()
            .next()
            .filter(|n| self.config.classify(n.similarity()) == Classification::Identical);

        let outcome = match duplicate {
            // The merged fact restates another record: fold this one into it.
            Some(n) => {
                let survivor_id = self.record_at(n.position)?.id;
                let stale = self.table.remove(position)?;
                let survivor = self
                    .table
                    .position_of(survivor_id)
                    .ok_or(TableError::Index(IndexError::PositionOutOfRange {
                        position: n.position,
                        len: self.table.len(),
                    }))?;
                self.table.absorb(survivor, &stale.stats, now)?;
                info!(removed = %id, into = %survivor_id, "merged memory collapsed into an existing one");
                AddOutcome::Merged {
                    id: survivor_id,
                    text: self.record_at(survivor)?.text.clone(),
                }
            }
            None => {
                self.table.rewrite(position, merged.clone(), &merged_vector, now)?;
                info!(%id, "memory merged");
                AddOutcome::Merged { id, text: merged }
            }
        };
        self.save()?;
        Ok(outcome)
    }

    // ── search ───────────────────────────────────────────────────────────────

    /// Texts of the records most similar to `query`, best first.
    ///
    /// See [`search_records`][Self::search_records].
    pub async fn search(
        &mut self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<String>, MemoryError> {
        Ok(self
            .search_records(query, params)
            .await?
            .into_iter()
            .map(|hit| hit.record.text)
            .collect())
    }

    /// Records most similar to `query`, best first, ties in insertion order.
    ///
    /// Only records matching `params.filter` are ranked; of those, up to
    /// `params.limit` nearest are taken and any below
    /// `params.similarity_threshold` dropped.  Each returned record has its
    /// `total_access` incremented and `last_access` set to now, flushed in one
    /// snapshot write.  An empty store yields an empty list without calling
    /// the embedder.
    pub async fn search_records(
        &mut self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        if self.table.is_empty() || params.limit == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed(query).await?;

        let passing: Vec<_> = self
            .table
            .search(&vector, params.limit, |r| params.filter.matches(r))?
            .into_iter()
            .filter(|n| n.similarity() >= params.similarity_threshold)
            .collect();
        if passing.is_empty() {
            debug!(threshold = params.similarity_threshold, "search found nothing above threshold");
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let mut hits = Vec::with_capacity(passing.len());
        for n in &passing {
            self.table.touch(n.position, now)?;
            hits.push(SearchHit {
                record: self.record_at(n.position)?.clone(),
                similarity: n.similarity(),
            });
        }
        debug!(hits = hits.len(), "search complete");
        self.save()?;
        Ok(hits)
    }

    // ── cleanup ──────────────────────────────────────────────────────────────

    /// Forget records older than `max_age` **and** accessed fewer than
    /// `min_access` times.  Returns how many were removed.
    ///
    /// Nothing is rebuilt or written when no record qualifies.  A negative
    /// `max_age` is a [`MemoryError::Config`]; one reaching past the earliest
    /// representable time removes nothing.
    pub fn cleanup(&mut self, max_age: chrono::Duration, min_access: u64) -> Result<usize, MemoryError> {
        if max_age < chrono::Duration::zero() {
            return Err(MemoryError::Config(format!(
                "cleanup max age must not be negative, got {max_age}"
            )));
        }
        let Some(cutoff) = self.clock.now().checked_sub_signed(max_age) else {
            debug!(%max_age, "cleanup cutoff precedes all representable times");
            return Ok(0);
        };
        let removed = self
            .table
            .retain(|r| !(r.created_at < cutoff && r.stats.total_access < min_access))?;
        if removed == 0 {
            debug!("cleanup found nothing to remove");
            return Ok(0);
        }
        info!(removed, remaining = self.table.len(), "memory cleanup");
        self.save()?;
        Ok(removed)
    }

    // ── helpers ──────────────────────────────────────────────────────────────

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let vector = self.embedder.embed(text).await?;
        if vector.is_empty() {
            return Err(CollaboratorError::BadResponse("empty embedding".into()).into());
        }
        if let Some(expected) = self.table.dimension()
            && expected != vector.len()
        {
            return Err(MemoryError::DimensionMismatch {
                expected,
                got: vector.len(),
            });
        }
        Ok(vector)
    }

    fn record_at(&self, position: usize) -> Result<&MemoryRecord, MemoryError> {
        self.table.record(position).ok_or_else(|| {
            TableError::Index(IndexError::PositionOutOfRange {
                position,
                len: self.table.len(),
            })
            .into()
        })
    }
}

/// Restore the table from `snapshots`, falling back to empty on any failure.
fn load_table(snapshots: &dyn SnapshotStore) -> MemoryTable {
    match snapshots.load() {
        Ok(Some(snapshot)) => {
            match MemoryTable::from_parts(snapshot.index, MetadataStore::from_records(snapshot.records)) {
                Ok(table) => {
                    info!(
                        records = table.len(),
                        dimension = ?table.dimension(),
                        location = %snapshots.location(),
                        "memory snapshot loaded"
                    );
                    table
                }
                Err(e) => {
                    warn!(error = %e, location = %snapshots.location(), "memory snapshot inconsistent; starting fresh");
                    MemoryTable::new()
                }
            }
        }
        Ok(None) => {
            debug!(location = %snapshots.location(), "no memory snapshot; starting fresh");
            MemoryTable::new()
        }
        Err(e) => {
            warn!(error = %e, location = %snapshots.location(), "memory snapshot unreadable; starting fresh");
            MemoryTable::new()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
