//! In-process fakes shared by the store and shared-handle tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_types::{CollaboratorError, MemoryRecord};

use crate::collaborator::{Embedder, TextGenerator};
use crate::index::FlatIndex;
use crate::persistence::{PersistenceError, Snapshot, SnapshotStore};
use crate::store::Clock;

/// Embeds from a fixed lookup table; unknown text is a request failure.
#[derive(Default)]
pub struct TableEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl TableEmbedder {
    pub fn with<const N: usize>(entries: &[(&str, [f32; N])]) -> Self {
        let embedder = Self::default();
        for (text, v) in entries {
            embedder.set(text, v);
        }
        embedder
    }

    pub fn set(&self, text: &str, vector: &[f32]) {
        self.vectors
            .lock()
            .unwrap()
            .insert(text.to_string(), vector.to_vec());
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Request("embedding server offline".into()));
        }
        self.vectors
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .ok_or_else(|| CollaboratorError::Request(format!("no embedding for {text:?}")))
    }
}

/// Replies with a scripted answer and records every prompt it receives.
///
/// Queued replies are used first, in order; after that every prompt gets the
/// fallback reply.
pub struct ScriptedGenerator {
    queued: Mutex<VecDeque<String>>,
    reply: Mutex<Result<String, CollaboratorError>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn scripted(queued: &[&str], reply: Result<String, CollaboratorError>) -> Self {
        Self {
            queued: Mutex::new(queued.iter().map(|r| r.to_string()).collect()),
            reply: Mutex::new(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(reply: &str) -> Self {
        Self::scripted(&[], Ok(reply.to_string()))
    }

    pub fn failing() -> Self {
        Self::scripted(&[], Err(CollaboratorError::Request("model unavailable".into())))
    }

    /// One reply per prompt; prompts past the end fail.
    pub fn sequence(replies: &[&str]) -> Self {
        Self::scripted(replies, Err(CollaboratorError::BadResponse("script exhausted".into())))
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(reply) = self.queued.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        self.reply.lock().unwrap().clone()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn at(start: &str) -> Self {
        Self(Mutex::new(start.parse().unwrap()))
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Snapshot store that loads nothing, counts saves, and can be made to fail.
#[derive(Default)]
pub struct CountingSnapshot {
    pub saves: AtomicUsize,
    pub fail: AtomicBool,
}

impl SnapshotStore for CountingSnapshot {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        Ok(None)
    }

    fn save(&self, _index: &FlatIndex, _records: &[MemoryRecord]) -> Result<(), PersistenceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PersistenceError::Corrupt("disk full".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn location(&self) -> String {
        "counting".into()
    }
}

impl SnapshotStore for std::sync::Arc<CountingSnapshot> {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        (**self).load()
    }

    fn save(&self, index: &FlatIndex, records: &[MemoryRecord]) -> Result<(), PersistenceError> {
        (**self).save(index, records)
    }

    fn location(&self) -> String {
        (**self).location()
    }
}
