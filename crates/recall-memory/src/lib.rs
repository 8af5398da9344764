//! `recall-memory` – long-term semantic memory.
//!
//! Stores short natural-language facts alongside their embedding vectors,
//! deduplicates and merges near-duplicates as they arrive, answers
//! similarity queries, forgets stale facts, and persists everything to disk.
//!
//! # Modules
//!
//! - [`index`] – [`FlatIndex`][index::FlatIndex]: exact cosine k-NN over a
//!   contiguous `f32` buffer.
//! - [`metadata`] – [`MetadataStore`][metadata::MetadataStore]: the record
//!   list aligned position-for-position with the index.
//! - [`table`] – [`MemoryTable`][table::MemoryTable]: the only code that
//!   mutates index and metadata, always in pairs.
//! - [`filter`] – [`Filter`][filter::Filter]: metadata predicates for search.
//! - [`persistence`] – [`SnapshotStore`][persistence::SnapshotStore] with file
//!   and SQLite backends.
//! - [`collaborator`] – the [`Embedder`][collaborator::Embedder] and
//!   [`TextGenerator`][collaborator::TextGenerator] seams.
//! - [`merge`] – the merge prompt and reply cleanup.
//! - [`store`] – [`MemoryStore`][store::MemoryStore]: add / search / cleanup.
//! - [`shared`] – [`SharedMemory`][shared::SharedMemory]: a cloneable handle
//!   for concurrent tasks.

pub mod collaborator;
pub mod filter;
pub mod index;
pub mod merge;
pub mod metadata;
pub mod persistence;
pub mod shared;
pub mod store;
pub mod table;

#[cfg(test)]
mod testing;

pub use collaborator::{Embedder, TextGenerator};
pub use filter::{Filter, Range};
pub use persistence::StorageBackend;
pub use shared::SharedMemory;
pub use store::{AddOutcome, MemoryConfig, MemoryError, MemoryStore, SearchHit, SearchParams};
