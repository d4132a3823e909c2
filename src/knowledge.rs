use std::{path::Path, sync::Arc};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    category::{CategoryTagger, SourceCategory},
    chunking::{ChunkRecord, ChunkingConfig, chunk_documents},
    embedding::Embedder,
    error::Result,
    loader::RawDocument,
    record_store::RecordStore,
};

/// Chunks are embedded in batches of this many texts.
pub(crate) const EMBED_BATCH_SIZE: usize = 64;

/// A nearest-neighbor hit returned by a record-store query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult<M> {
    /// Position of the hit in the store's record sequence.
    pub index: usize,
    /// Squared L2 distance; lower is more similar. Only comparable within
    /// one store.
    pub distance: f32,
    pub metadata: M,
}

/// The primary document index consumed by the sync controller and the
/// orchestrator.
pub trait VectorIndex {
    /// Replace all content with chunks derived from `documents`.
    /// Returns the number of chunks indexed.
    fn build_from_documents(
        &mut self,
        documents: &[RawDocument],
    ) -> Result<usize>;

    /// Append chunks derived from `documents`. Returns the number added.
    fn add_documents(&mut self, documents: &[RawDocument]) -> Result<usize>;

    /// Restore persisted state into memory.
    fn load(&mut self) -> Result<()>;

    /// Whether a built index has been persisted.
    fn exists(&self) -> bool;

    /// Whether the persisted index was built with a different embedder or
    /// different chunking/category settings than this instance uses.
    fn is_stale(&self) -> bool {
        false
    }

    fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult<ChunkRecord>>>;

    /// Records of every indexed chunk, in index order.
    fn metadata(&self) -> &[ChunkRecord];
}

/// Corpus composition used by the reranker's boost decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SourceStats {
    pub total_chunks: usize,
    pub boosted_category_chunks: usize,
    /// `boosted_category_chunks / total_chunks`, or 0 for an empty index.
    pub boosted_category_ratio: f32,
}

impl SourceStats {
    pub fn from_records(records: &[ChunkRecord]) -> Self {
        let total_chunks = records.len();
        let boosted_category_chunks = records
            .iter()
            .filter(|r| r.category == SourceCategory::Target)
            .count();
        let boosted_category_ratio = if total_chunks == 0 {
            0.0
        } else {
            boosted_category_chunks as f32 / total_chunks as f32
        };

        Self {
            total_chunks,
            boosted_category_chunks,
            boosted_category_ratio,
        }
    }
}

/// Chunked, embedded knowledge base stored in a [`RecordStore`].
pub struct KnowledgeIndex {
    store: RecordStore<ChunkRecord>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    tagger: CategoryTagger,
}

impl KnowledgeIndex {
    pub fn open(
        path: &Path,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        tagger: CategoryTagger,
    ) -> Result<Self> {
        let fingerprint =
            index_fingerprint(embedder.as_ref(), chunking, &tagger);
        let store = RecordStore::open(path)?.with_fingerprint(fingerprint);
        if store.is_stale() {
            info!(
                path = %path.display(),
                stored = store.stored_fingerprint().unwrap_or("none"),
                "knowledge index was built with other settings"
            );
        }
        Ok(Self {
            store,
            embedder,
            chunking,
            tagger,
        })
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn source_stats(&self) -> SourceStats {
        SourceStats::from_records(self.store.records())
    }

    fn embed_chunks(
        &self,
        documents: &[RawDocument],
    ) -> Result<(Vec<Vec<f32>>, Vec<ChunkRecord>)> {
        let records = chunk_documents(documents, self.chunking, &self.tagger);
        let mut vectors = Vec::with_capacity(records.len());
        for batch in records.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> =
                batch.iter().map(|r| r.text.clone()).collect();
            vectors.extend(self.embedder.embed(&texts)?);
        }
        debug!(
            documents = documents.len(),
            chunks = records.len(),
            "embedded chunks"
        );
        Ok((vectors, records))
    }
}

impl VectorIndex for KnowledgeIndex {
    fn build_from_documents(
        &mut self,
        documents: &[RawDocument],
    ) -> Result<usize> {
        let (vectors, records) = self.embed_chunks(documents)?;
        let count = records.len();
        self.store.replace(vectors, records)?;
        info!(chunks = count, "knowledge index rebuilt");
        Ok(count)
    }

    fn add_documents(&mut self, documents: &[RawDocument]) -> Result<usize> {
        let (vectors, records) = self.embed_chunks(documents)?;
        let count = records.len();
        if count == 0 {
            return Ok(0);
        }
        self.store.append(vectors, records)?;
        info!(
            added = count,
            total = self.store.len(),
            "knowledge index extended"
        );
        Ok(count)
    }

    fn load(&mut self) -> Result<()> {
        self.store.load()
    }

    fn exists(&self) -> bool {
        self.store.is_built()
    }

    fn is_stale(&self) -> bool {
        self.store.is_stale()
    }

    fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult<ChunkRecord>>> {
        if self.store.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_one(text)?;
        let records = self.store.records();
        Ok(self
            .store
            .search(&vector, top_k)?
            .into_iter()
            .filter_map(|n| {
                records.get(n.index).map(|record| RetrievalResult {
                    index: n.index,
                    distance: n.distance,
                    metadata: record.clone(),
                })
            })
            .collect())
    }

    fn metadata(&self) -> &[ChunkRecord] {
        self.store.records()
    }
}

/// Everything that shapes the stored vectors and records: the embedder,
/// the chunk windows and the category patterns.
fn index_fingerprint(
    embedder: &dyn Embedder,
    chunking: ChunkingConfig,
    tagger: &CategoryTagger,
) -> String {
    format!(
        "{};chunk={}/{};targets={}",
        embedder.fingerprint(),
        chunking.chunk_size,
        chunking.overlap,
        tagger.patterns().join("|")
    )
}

impl std::fmt::Debug for KnowledgeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeIndex")
            .field("store", &self.store)
            .field("chunking", &self.chunking)
            .finish_non_exhaustive()
    }
}
