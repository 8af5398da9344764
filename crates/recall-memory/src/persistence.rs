//! Snapshot persistence.
//!
//! A snapshot is the full vector index plus the full ordered record list.
//! Both are always written together and loaded together; there is no
//! incremental or append-only format.
//!
//! # Backends
//!
//! - [`FileSnapshot`] writes two co-located files next to a path prefix:
//!
//!   | file            | contents                                          |
//!   |-----------------|---------------------------------------------------|
//!   | `<prefix>.index`| binary vector blob (layout below)                 |
//!   | `<prefix>.json` | pretty JSON `{ "generation", "records" }`         |
//!
//!   Index blob layout (all integers little-endian):
//!
//!   | bytes  | field                                    |
//!   |--------|------------------------------------------|
//!   | 4      | magic `RCIX`                             |
//!   | 4      | format version (`2`)                     |
//!   | 16     | snapshot generation (UUID bytes)         |
//!   | 4      | dimension (`0` when still unknown)       |
//!   | 8      | vector count                             |
//!   | 4·d·n  | row-major `f32` payload                  |
//!
//!   Each file is written to a `.tmp` sibling and renamed into place.  Every
//!   save stamps both files with a fresh generation; a pair whose generations
//!   differ comes from two different saves and is rejected on load.
//!
//! - [`SqliteSnapshot`] stores one row per record, embedding included, in a
//!   single SQLite file and rewrites the table inside one transaction.
//!
//! Loading never half-succeeds: any inconsistency is reported as
//! [`PersistenceError`] and the caller decides how to recover.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use recall_types::{AccessStats, MemoryRecord};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::index::FlatIndex;

const INDEX_MAGIC: &[u8; 4] = b"RCIX";
const INDEX_VERSION: u32 = 2;
const INDEX_HEADER_LEN: usize = 36;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise while reading or writing a snapshot.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// A loaded store image.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub index: FlatIndex,
    pub records: Vec<MemoryRecord>,
}

/// Durable storage for store snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Read the last saved snapshot.  `Ok(None)` means nothing was saved yet.
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError>;

    /// Replace the saved snapshot with `index` + `records`.
    fn save(&self, index: &FlatIndex, records: &[MemoryRecord]) -> Result<(), PersistenceError>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Which [`SnapshotStore`] implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::File => write!(f, "file"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl StorageBackend {
    /// Build the snapshot store for this backend rooted at `path`.
    ///
    /// For [`StorageBackend::File`] `path` is a prefix; for
    /// [`StorageBackend::Sqlite`] it is the database file.
    pub fn open(self, path: &Path) -> Box<dyn SnapshotStore> {
        match self {
            StorageBackend::File => Box::new(FileSnapshot::new(path)),
            StorageBackend::Sqlite => Box::new(SqliteSnapshot::new(path)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Encode `index` into the `RCIX` blob format, stamped with `generation`.
pub fn encode_index(index: &FlatIndex, generation: Uuid) -> Vec<u8> {
    let raw = index.raw();
    let mut out = Vec::with_capacity(INDEX_HEADER_LEN + raw.len() * 4);
    out.extend_from_slice(INDEX_MAGIC);
    out.extend_from_slice(&INDEX_VERSION.to_le_bytes());
    out.extend_from_slice(generation.as_bytes());
    out.extend_from_slice(&(index.dimension().unwrap_or(0) as u32).to_le_bytes());
    out.extend_from_slice(&(index.len() as u64).to_le_bytes());
    out.extend_from_slice(&embedding_to_bytes(raw));
    out
}

/// Decode an `RCIX` blob produced by [`encode_index`] into its generation and
/// index.
pub fn decode_index(bytes: &[u8]) -> Result<(Uuid, FlatIndex), PersistenceError> {
    if bytes.len() < INDEX_HEADER_LEN || &bytes[..4] != INDEX_MAGIC {
        return Err(PersistenceError::Corrupt("missing index header".into()));
    }
    let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let version = word(4);
    if version != INDEX_VERSION {
        return Err(PersistenceError::Corrupt(format!(
            "unsupported index version {version}"
        )));
    }
    let mut generation = [0u8; 16];
    generation.copy_from_slice(&bytes[8..24]);
    let generation = Uuid::from_bytes(generation);
    let dimension = word(24) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[28..36]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let payload = &bytes[INDEX_HEADER_LEN..];
    let expected = dimension
        .checked_mul(count)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| PersistenceError::Corrupt("index size overflow".into()))?;
    if payload.len() != expected {
        return Err(PersistenceError::Corrupt(format!(
            "index payload is {} bytes, header promises {expected}",
            payload.len()
        )));
    }

    if dimension == 0 {
        if count != 0 {
            return Err(PersistenceError::Corrupt("vectors without a dimension".into()));
        }
        return Ok((generation, FlatIndex::new()));
    }
    let index = FlatIndex::from_raw(dimension, bytes_to_embedding(payload))
        .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
    Ok((generation, index))
}

// ─────────────────────────────────────────────────────────────────────────────
// FileSnapshot
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MetadataOut<'a> {
    generation: Uuid,
    records: &'a [MemoryRecord],
}

#[derive(Deserialize)]
struct MetadataIn {
    generation: Uuid,
    records: Vec<MemoryRecord>,
}

/// Two-file snapshot: `<prefix>.index` + `<prefix>.json`.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    index_path: PathBuf,
    metadata_path: PathBuf,
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl FileSnapshot {
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref();
        Self {
            index_path: with_suffix(prefix, ".index"),
            metadata_path: with_suffix(prefix, ".json"),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let tmp = with_suffix(path, ".tmp");
        fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
        fs::rename(&tmp, path).map_err(io_err(path))?;
        Ok(())
    }
}

impl SnapshotStore for FileSnapshot {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let has_index = self.index_path.exists();
        let has_metadata = self.metadata_path.exists();
        match (has_index, has_metadata) {
            (false, false) => return Ok(None),
            (true, true) => {}
            _ => {
                return Err(PersistenceError::Corrupt(
                    "only one of the index/metadata files exists".into(),
                ));
            }
        }

        let blob = fs::read(&self.index_path).map_err(io_err(&self.index_path))?;
        let (generation, index) = decode_index(&blob)?;
        let raw = fs::read_to_string(&self.metadata_path).map_err(io_err(&self.metadata_path))?;
        let metadata: MetadataIn = serde_json::from_str(&raw)?;
        if metadata.generation != generation {
            return Err(PersistenceError::Corrupt(format!(
                "index generation {generation} does not match metadata generation {}",
                metadata.generation
            )));
        }
        let records = metadata.records;

        if index.len() != records.len() {
            return Err(PersistenceError::Corrupt(format!(
                "index holds {} vectors but metadata holds {} records",
                index.len(),
                records.len()
            )));
        }
        debug!(records = records.len(), path = %self.metadata_path.display(), "snapshot read");
        Ok(Some(Snapshot { index, records }))
    }

    fn save(&self, index: &FlatIndex, records: &[MemoryRecord]) -> Result<(), PersistenceError> {
        let generation = Uuid::new_v4();
        let json = serde_json::to_string_pretty(&MetadataOut {
            generation,
            records,
        })?;
        Self::write_atomic(&self.index_path, &encode_index(index, generation))?;
        Self::write_atomic(&self.metadata_path, json.as_bytes())?;
        Ok(())
    }

    fn location(&self) -> String {
        format!(
            "{} + {}",
            self.index_path.display(),
            self.metadata_path.display()
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteSnapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Single-file SQLite snapshot.
///
/// A single table `memory_records` holds one row per record:
///
/// | column       | type    | description                                |
/// |--------------|---------|--------------------------------------------|
/// | position     | INTEGER | Index position (primary key)               |
/// | id           | TEXT    | Record UUID                                |
/// | text         | TEXT    | Fact text                                  |
/// | created_at   | TEXT    | RFC-3339 (re)write time                    |
/// | source       | TEXT    | Provenance tag                             |
/// | type         | TEXT    | Category tag                               |
/// | total_access | INTEGER | Search-hit counter                         |
/// | last_access  | TEXT    | RFC-3339 last hit, NULL when never hit     |
/// | embedding    | BLOB    | Little-endian f32 vector (4 × N bytes)     |
#[derive(Debug, Clone)]
pub struct SqliteSnapshot {
    path: PathBuf,
}

type RawRow = (String, String, String, String, String, i64, Option<String>, Vec<u8>);

impl SqliteSnapshot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, PersistenceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_records (
                position     INTEGER NOT NULL PRIMARY KEY,
                id           TEXT    NOT NULL,
                text         TEXT    NOT NULL,
                created_at   TEXT    NOT NULL,
                source       TEXT    NOT NULL,
                type         TEXT    NOT NULL,
                total_access INTEGER NOT NULL,
                last_access  TEXT,
                embedding    BLOB    NOT NULL
            );",
        )?;
        Ok(conn)
    }

    fn parse_time(raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
        raw.parse::<DateTime<Utc>>()
            .map_err(|e| PersistenceError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
    }

    fn row_to_record(row: RawRow) -> Result<(MemoryRecord, Vec<f32>), PersistenceError> {
        let (id, text, created_at, source, kind, total_access, last_access, blob) = row;
        let id = Uuid::parse_str(&id)
            .map_err(|e| PersistenceError::Corrupt(format!("bad record id {id:?}: {e}")))?;
        let last_access = last_access.as_deref().map(Self::parse_time).transpose()?;
        let record = MemoryRecord {
            id,
            text,
            created_at: Self::parse_time(&created_at)?,
            source,
            kind,
            stats: AccessStats {
                total_access: u64::try_from(total_access).unwrap_or(0),
                last_access,
            },
        };
        Ok((record, bytes_to_embedding(&blob)))
    }
}

impl SnapshotStore for SqliteSnapshot {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, text, created_at, source, type, total_access, last_access, embedding
             FROM memory_records
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map([], |row| -> rusqlite::Result<RawRow> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?;

        let mut index = FlatIndex::new();
        let mut records = Vec::new();
        for row in rows {
            let (record, embedding) = Self::row_to_record(row?)?;
            index
                .insert(&embedding)
                .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
            records.push(record);
        }
        if records.is_empty() {
            return Ok(None);
        }
        debug!(records = records.len(), path = %self.path.display(), "snapshot read");
        Ok(Some(Snapshot { index, records }))
    }

    fn save(&self, index: &FlatIndex, records: &[MemoryRecord]) -> Result<(), PersistenceError> {
        if index.len() != records.len() {
            return Err(PersistenceError::Corrupt(format!(
                "refusing to save {} vectors with {} records",
                index.len(),
                records.len()
            )));
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memory_records", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO memory_records
                     (position, id, text, created_at, source, type, total_access, last_access, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (position, record) in records.iter().enumerate() {
                let vector = index
                    .reconstruct(position)
                    .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
                insert.execute(params![
                    position as i64,
                    record.id.to_string(),
                    record.text,
                    record.created_at.to_rfc3339(),
                    record.source,
                    record.kind,
                    i64::try_from(record.stats.total_access).unwrap_or(i64::MAX),
                    record.stats.last_access.map(|t| t.to_rfc3339()),
                    embedding_to_bytes(&vector),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use recall_types::MemoryMeta;

    fn sample() -> (FlatIndex, Vec<MemoryRecord>) {
        let mut index = FlatIndex::new();
        index.insert(&[1.0, 0.0, 0.5]).unwrap();
        index.insert(&[0.0, -1.5, 2.0]).unwrap();
        let mut a = MemoryRecord::new("user likes tea", MemoryMeta::new("conversation", "preference"), Utc::now());
        a.stats.total_access = 3;
        a.stats.last_access = Some(Utc::now());
        let b = MemoryRecord::new("погода в Києві сонячна", MemoryMeta::default(), Utc::now());
        (index, vec![a, b])
    }

    // ── embedding bytes ──────────────────────────────────────────────────────

    #[test]
    fn embedding_bytes_roundtrip() {
        let original = vec![1.5f32, -0.25, 0.0, 42.0];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&original)), original);
    }

    // ── index blob ───────────────────────────────────────────────────────────

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode_index(b"nope"), Err(PersistenceError::Corrupt(_))));
        assert!(matches!(
            decode_index(b"XXXX0000000000000000"),
            Err(PersistenceError::Corrupt(_))
        ));
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let (index, _) = sample();
        let mut blob = encode_index(&index, Uuid::new_v4());
        blob.truncate(blob.len() - 3);
        assert!(matches!(decode_index(&blob), Err(PersistenceError::Corrupt(_))));
    }

    #[test]
    fn empty_index_without_dimension_decodes() {
        let generation = Uuid::new_v4();
        let blob = encode_index(&FlatIndex::new(), generation);
        let (decoded, index) = decode_index(&blob).unwrap();
        assert_eq!(decoded, generation);
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
    }

    // ── FileSnapshot ─────────────────────────────────────────────────────────

    #[test]
    fn file_snapshot_missing_files_load_none() {
        let dir = tempfile::tempdir().unwrap();
        let snap = FileSnapshot::new(dir.path().join("memory"));
        assert!(snap.load().unwrap().is_none());
    }

    #[test]
    fn file_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let snap = FileSnapshot::new(dir.path().join("nested").join("memory"));
        let (index, records) = sample();
        snap.save(&index, &records).unwrap();

        assert!(snap.index_path().ends_with("memory.index"));
        assert!(snap.metadata_path().ends_with("memory.json"));

        let loaded = snap.load().unwrap().unwrap();
        assert_eq!(loaded.index, index);
        assert_eq!(loaded.records, records);
    }

    #[test]
    fn file_snapshot_metadata_is_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let snap = FileSnapshot::new(dir.path().join("memory"));
        let (index, records) = sample();
        snap.save(&index, &records).unwrap();
        let raw = fs::read_to_string(snap.metadata_path()).unwrap();
        assert!(raw.contains("Києві"), "UTF-8 must not be escaped");
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["records"][0]["stats"]["total_access"], 3);
        assert!(value["generation"].is_string());
    }

    #[test]
    fn file_snapshot_corrupt_metadata_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let snap = FileSnapshot::new(dir.path().join("memory"));
        let (index, records) = sample();
        snap.save(&index, &records).unwrap();
        fs::write(snap.metadata_path(), "{ not json").unwrap();
        assert!(matches!(snap.load(), Err(PersistenceError::Json(_))));
    }

    #[test]
    fn file_snapshot_count_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let snap = FileSnapshot::new(dir.path().join("memory"));
        let (index, records) = sample();
        snap.save(&index, &records[..1]).unwrap();
        assert!(matches!(snap.load(), Err(PersistenceError::Corrupt(_))));
    }

    #[test]
    fn file_snapshot_pair_from_different_saves_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let snap = FileSnapshot::new(dir.path().join("memory"));
        let (mut index, mut records) = sample();
        snap.save(&index, &records).unwrap();
        let old_metadata = fs::read(snap.metadata_path()).unwrap();

        // Same record count, rewritten first slot.
        index.update(0, &[0.0, 1.0, 0.0]).unwrap();
        records[0].text = "user likes coffee".into();
        snap.save(&index, &records).unwrap();
        fs::write(snap.metadata_path(), old_metadata).unwrap();

        let err = snap.load().unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt(ref m) if m.contains("generation")));
    }

    #[test]
    fn file_snapshot_half_present_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let snap = FileSnapshot::new(dir.path().join("memory"));
        fs::write(snap.metadata_path(), "[]").unwrap();
        assert!(matches!(snap.load(), Err(PersistenceError::Corrupt(_))));
    }

    // ── SqliteSnapshot ───────────────────────────────────────────────────────

    #[test]
    fn sqlite_snapshot_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let snap = SqliteSnapshot::new(dir.path().join("memory.db"));
        assert!(snap.load().unwrap().is_none());
    }

    #[test]
    fn sqlite_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let snap = SqliteSnapshot::new(dir.path().join("memory.db"));
        let (index, records) = sample();
        snap.save(&index, &records).unwrap();

        let loaded = snap.load().unwrap().unwrap();
        assert_eq!(loaded.index, index);
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].id, records[0].id);
        assert_eq!(loaded.records[0].stats.total_access, 3);
        assert!(loaded.records[0].stats.last_access.is_some());
        assert!(loaded.records[1].stats.last_access.is_none());
        assert_eq!(loaded.records[1].text, records[1].text);
    }

    #[test]
    fn sqlite_snapshot_save_replaces_previous_rows() {
        let dir = tempfile::tempdir().unwrap();
        let snap = SqliteSnapshot::new(dir.path().join("memory.db"));
        let (index, records) = sample();
        snap.save(&index, &records).unwrap();

        let mut smaller = FlatIndex::new();
        smaller.insert(&[1.0, 0.0, 0.5]).unwrap();
        snap.save(&smaller, &records[..1]).unwrap();

        let loaded = snap.load().unwrap().unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.index.len(), 1);
    }

    #[test]
    fn sqlite_snapshot_refuses_misaligned_save() {
        let dir = tempfile::tempdir().unwrap();
        let snap = SqliteSnapshot::new(dir.path().join("memory.db"));
        let (index, records) = sample();
        assert!(snap.save(&index, &records[..1]).is_err());
    }

    #[test]
    fn backend_open_selects_implementation() {
        let dir = tempfile::tempdir().unwrap();
        let file = StorageBackend::File.open(&dir.path().join("m"));
        assert!(file.location().contains("m.index"));
        let sqlite = StorageBackend::Sqlite.open(&dir.path().join("m.db"));
        assert!(sqlite.location().ends_with("m.db"));
    }
}
