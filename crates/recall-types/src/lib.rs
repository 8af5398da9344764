//! `recall-types` – shared data model for Recall.
//!
//! The record layout persisted by `recall-memory` and the error type that
//! every embedding or text-generation collaborator reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Usage statistics tracked for every stored fact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessStats {
    /// Number of search hits that returned this record. Never decreases.
    pub total_access: u64,
    /// Time of the most recent search hit; `None` if never retrieved.
    pub last_access: Option<DateTime<Utc>>,
}

/// Provenance tags attached to a fact when it is remembered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMeta {
    /// Where the fact came from (e.g. `"conversation"`, `"autonomous"`).
    #[serde(default)]
    pub source: String,
    /// Category of the fact (e.g. `"fact"`, `"preference"`).
    #[serde(default, rename = "type")]
    pub kind: String,
}

impl MemoryMeta {
    pub fn new(source: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: kind.into(),
        }
    }
}

/// One remembered fact.
///
/// The embedding vector is owned by the vector index; a record and its vector
/// are paired by the memory table that owns both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Stable identifier, preserved across merges and index compaction.
    pub id: Uuid,
    /// The fact itself.
    pub text: String,
    /// Time of the last (re)write. A merge resets this to the merge time.
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub stats: AccessStats,
}

impl MemoryRecord {
    /// Construct a fresh record with a new UUID and zeroed statistics.
    pub fn new(text: impl Into<String>, meta: MemoryMeta, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            created_at,
            source: meta.source,
            kind: meta.kind,
            stats: AccessStats::default(),
        }
    }

    /// Time elapsed since `created_at`, measured at `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Failure reported by an embedding or text-generation collaborator.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollaboratorError {
    #[error("Collaborator request failed: {0}")]
    Request(String),

    #[error("Collaborator returned an unusable response: {0}")]
    BadResponse(String),
}
