//! examrag - retrieval-augmented question answering over a private archive
//! of exam papers and study notes.
//!
//! examrag keeps a vector index of a source directory in sync by comparing
//! file signatures against the last persisted manifest, rebuilding only
//! when a file was modified or removed and appending when files were only
//! added. Queries are answered from reranked chunks plus similar past turns
//! from a conversation memory, with the answer produced by a hosted
//! language model.
//!
//! # Quick start
//!
//! ```no_run
//! use examrag::{DataDir, RetrievalOrchestrator, Settings};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let settings = Settings::load(&data_dir.settings()).unwrap();
//! let top_k = settings.top_k;
//!
//! // Requires GROQ_API_KEY; syncs the index with `settings.source_dir`.
//! let mut rag = RetrievalOrchestrator::open(settings, &data_dir, false).unwrap();
//! let answer = rag
//!     .search_and_summarize("give me 3 questions on deadlocks", top_k, 3)
//!     .unwrap();
//! println!("{answer}");
//! ```

pub mod category;
pub mod chunking;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod incremental;
pub mod knowledge;
pub mod llm;
pub mod loader;
pub mod manifest;
pub mod mcp;
pub mod memory;
pub mod model_manager;
pub mod record_store;
pub mod reranker;
pub mod search;
pub mod settings;
pub mod walker;

pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use incremental::{SyncReport, SyncStrategy, sync_index};
pub use knowledge::{KnowledgeIndex, RetrievalResult, SourceStats, VectorIndex};
pub use memory::{ConversationMemoryStore, MemoryEntry};
pub use model_manager::ModelManager;
pub use reranker::AdaptiveReranker;
pub use search::{NO_RELEVANT_DOCUMENTS, RetrievalOrchestrator};
pub use settings::Settings;
