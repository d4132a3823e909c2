use std::{path::Path, sync::Arc};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    embedding::Embedder,
    error::Result,
    knowledge::{EMBED_BATCH_SIZE, RetrievalResult},
    record_store::RecordStore,
};

/// One completed question/answer turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// `"Question: …\nAnswer: …"`, the text that was embedded.
    pub text: String,
    pub question: String,
    pub answer: String,
    /// RFC 3339 UTC timestamp of when the turn was recorded.
    pub timestamp_utc: String,
}

/// Durable, append-only log of past turns, searchable by similarity.
///
/// Every [`add_interaction`](Self::add_interaction) commits to disk before
/// returning, so the store can be reopened at any point. Opening with a
/// different embedder than the one that wrote the store re-embeds every
/// turn from its stored text.
pub struct ConversationMemoryStore {
    store: RecordStore<MemoryEntry>,
    embedder: Arc<dyn Embedder>,
}

impl ConversationMemoryStore {
    /// Open the memory store, loading any persisted turns.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use std::sync::Arc;
    /// use examrag::{ConversationMemoryStore, embedding::HashingEmbedder};
    ///
    /// let mut memory = ConversationMemoryStore::open(
    ///     &tmp.path().join("memory.redb"),
    ///     Arc::new(HashingEmbedder::default()),
    /// )
    /// .unwrap();
    /// memory.add_interaction("What is a DFA?", "A finite automaton.").unwrap();
    /// assert_eq!(memory.len(), 1);
    /// ```
    pub fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let store =
            RecordStore::open(path)?.with_fingerprint(embedder.fingerprint());
        let mut memory = Self { store, embedder };
        if memory.store.is_stale() {
            memory.reembed()?;
        }
        if !memory.store.is_empty() {
            info!(
                entries = memory.store.len(),
                path = %path.display(),
                "loaded conversation memory"
            );
        }
        Ok(memory)
    }

    /// Recompute every vector with the current embedder.
    fn reembed(&mut self) -> Result<()> {
        info!(
            entries = self.store.len(),
            from = self.store.stored_fingerprint().unwrap_or("none"),
            to = %self.embedder.fingerprint(),
            "re-embedding conversation memory"
        );
        let entries = self.store.records().to_vec();
        let mut vectors = Vec::with_capacity(entries.len());
        for batch in entries.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> =
                batch.iter().map(|e| e.text.clone()).collect();
            vectors.extend(self.embedder.embed(&texts)?);
        }
        self.store.replace(vectors, entries)
    }

    /// Record a turn. Does nothing if either side is blank.
    pub fn add_interaction(
        &mut self,
        question: &str,
        answer: &str,
    ) -> Result<()> {
        let question = question.trim();
        let answer = answer.trim();
        if question.is_empty() || answer.is_empty() {
            return Ok(());
        }

        let text = format!("Question: {question}\nAnswer: {answer}");
        let vector = self.embedder.embed_one(&text)?;
        let entry = MemoryEntry {
            text,
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp_utc: Utc::now()
                .to_rfc3339_opts(SecondsFormat::Micros, false),
        };

        self.store.append(vec![vector], vec![entry])?;
        debug!(entries = self.store.len(), "added interaction to memory");
        Ok(())
    }

    /// Most similar past turns, nearest first.
    ///
    /// `top_k` is clamped to `[1, len]`; an empty store returns nothing.
    pub fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult<MemoryEntry>>> {
        if self.store.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_one(text)?;
        let top_k = top_k.clamp(1, self.store.len());
        let entries = self.store.records();

        Ok(self
            .store
            .search(&vector, top_k)?
            .into_iter()
            .filter_map(|n| {
                entries.get(n.index).map(|entry| RetrievalResult {
                    index: n.index,
                    distance: n.distance,
                    metadata: entry.clone(),
                })
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// All recorded turns, oldest first.
    pub fn entries(&self) -> &[MemoryEntry] {
        self.store.records()
    }
}

impl std::fmt::Debug for ConversationMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationMemoryStore")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
