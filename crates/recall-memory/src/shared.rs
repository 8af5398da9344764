//! [`SharedMemory`] – a cloneable handle for concurrent callers.
//!
//! Wraps one [`MemoryStore`] in an `Arc<tokio::sync::Mutex<_>>`.  Each
//! operation holds the lock for its whole duration, including the awaited
//! collaborator calls, so concurrent adds and searches are linearised and
//! the index/metadata pair is never observed half-updated.

use std::sync::Arc;

use recall_types::{MemoryMeta, MemoryRecord};
use tokio::sync::Mutex;

use crate::store::{AddOutcome, MemoryError, MemoryStore, SearchHit, SearchParams};

/// Cloneable, task-safe handle to a [`MemoryStore`].
#[derive(Clone)]
pub struct SharedMemory {
    inner: Arc<Mutex<MemoryStore>>,
}

impl SharedMemory {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub async fn add_memory(&self, text: &str, meta: MemoryMeta) -> Result<AddOutcome, MemoryError> {
        self.inner.lock().await.add_memory(text, meta).await
    }

    pub async fn search(&self, query: &str, params: &SearchParams) -> Result<Vec<String>, MemoryError> {
        self.inner.lock().await.search(query, params).await
    }

    pub async fn search_records(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        self.inner.lock().await.search_records(query, params).await
    }

    /// Search with the store's configured limit and threshold.
    pub async fn search_default(&self, query: &str) -> Result<Vec<String>, MemoryError> {
        let mut store = self.inner.lock().await;
        let params = store.config().search_params();
        store.search(query, &params).await
    }

    pub async fn cleanup(&self, max_age: chrono::Duration, min_access: u64) -> Result<usize, MemoryError> {
        self.inner.lock().await.cleanup(max_age, min_access)
    }

    pub async fn get_all_memories_json(&self) -> String {
        self.inner.lock().await.get_all_memories_json()
    }

    pub async fn records(&self) -> Vec<MemoryRecord> {
        self.inner.lock().await.records().to_vec()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn save(&self) -> Result<(), MemoryError> {
        self.inner.lock().await.save()
    }

    /// Run `f` with exclusive access to the underlying store.
    pub async fn with_store<R>(&self, f: impl FnOnce(&MemoryStore) -> R) -> R {
        f(&*self.inner.lock().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConfig;
    use crate::testing::{CountingSnapshot, ScriptedGenerator, TableEmbedder};
    use std::sync::atomic::Ordering;

    fn shared(embedder: Arc<TableEmbedder>, snapshots: Arc<CountingSnapshot>) -> SharedMemory {
        let store = MemoryStore::with_snapshot_store(
            MemoryConfig::new("unused"),
            embedder,
            Arc::new(ScriptedGenerator::replying("merged")),
            Box::new(snapshots),
        )
        .unwrap();
        SharedMemory::new(store)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_distinct_adds_all_land() {
        let embedder = Arc::new(TableEmbedder::default());
        let n = 16;
        for i in 0..n {
            let mut v = vec![0.0_f32; n];
            v[i] = 1.0;
            embedder.set(&format!("fact {i}"), &v);
        }
        let snapshots = Arc::new(CountingSnapshot::default());
        let memory = shared(embedder, snapshots.clone());

        let tasks: Vec<_> = (0..n)
            .map(|i| {
                let memory = memory.clone();
                tokio::spawn(async move {
                    memory
                        .add_memory(&format!("fact {i}"), MemoryMeta::default())
                        .await
                })
            })
            .collect();
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            assert!(matches!(outcome, AddOutcome::Inserted { .. }));
        }

        assert_eq!(memory.len().await, n);
        assert_eq!(snapshots.saves.load(Ordering::SeqCst), n);
        memory
            .with_store(|store| {
                assert_eq!(store.table().index().len(), store.table().metadata().len());
            })
            .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_adds_keep_one_record() {
        let embedder = Arc::new(TableEmbedder::with(&[("user likes tea", [1.0, 0.0])]));
        let memory = shared(embedder, Arc::new(CountingSnapshot::default()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let memory = memory.clone();
                tokio::spawn(async move {
                    memory.add_memory("user likes tea", MemoryMeta::default()).await
                })
            })
            .collect();
        let mut inserted = 0;
        for task in tasks {
            if let AddOutcome::Inserted { .. } = task.await.unwrap().unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(memory.len().await, 1);
    }

    #[tokio::test]
    async fn search_default_uses_configured_params() {
        let embedder = Arc::new(TableEmbedder::with(&[
            ("user likes tea", [1.0, 0.0]),
            ("drinks?", [0.9, 0.1]),
        ]));
        let memory = shared(embedder, Arc::new(CountingSnapshot::default()));
        memory
            .add_memory("user likes tea", MemoryMeta::default())
            .await
            .unwrap();
        let hits = memory.search_default("drinks?").await.unwrap();
        assert_eq!(hits, vec!["user likes tea".to_string()]);
        assert_eq!(memory.records().await[0].stats.total_access, 1);
    }
}
