//! Deciding how to bring the knowledge index up to date with the source
//! directory, and doing it.
//!
//! The decision is a pure function of the current and saved manifests
//! ([`plan_sync`]); [`sync_index`] executes it against any
//! [`VectorIndex`] and [`DocumentLoader`].

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    knowledge::VectorIndex,
    loader::DocumentLoader,
    manifest::{self, ManifestDiff},
    walker::{self, Manifest},
};

/// Why a full rebuild was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildReason {
    /// Requested by the caller.
    Forced,
    /// No built index is persisted.
    MissingIndex,
    /// The index was built with another embedder or other chunking or
    /// category settings.
    ConfigChanged,
    /// No usable saved manifest.
    EmptyManifest,
    /// A previously indexed file was modified or deleted.
    SourcesChanged,
}

impl std::fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Forced => "forced",
            Self::MissingIndex => "index missing",
            Self::ConfigChanged => "index settings changed",
            Self::EmptyManifest => "no saved manifest",
            Self::SourcesChanged => "sources modified or removed",
        })
    }
}

/// What the persisted index looks like before a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Nothing has been built yet.
    Missing,
    /// Built, but under different settings; its vectors cannot be reused.
    Stale,
    Ready,
}

impl IndexState {
    pub fn of<I: VectorIndex + ?Sized>(index: &I) -> Self {
        if !index.exists() {
            Self::Missing
        } else if index.is_stale() {
            Self::Stale
        } else {
            Self::Ready
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum SyncStrategy {
    FullRebuild(RebuildReason),
    Incremental,
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub strategy: SyncStrategy,
    /// Empty when the decision was made before diffing.
    pub diff: ManifestDiff,
}

/// Outcome of [`sync_index`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub strategy: SyncStrategy,
    pub documents_loaded: usize,
    pub chunks_indexed: usize,
    /// Whether the manifest on disk was replaced.
    pub manifest_saved: bool,
}

/// Choose a strategy.
///
/// # Examples
///
/// ```
/// use examrag::incremental::{IndexState, SyncStrategy, plan_sync};
/// use examrag::walker::{FileSignature, Manifest};
///
/// let sig = |p: &str| FileSignature {
///     relative_path: p.to_string(),
///     size: 120,
///     mtime_ns: 1000,
/// };
/// let saved: Manifest = [("a.txt".to_string(), sig("a.txt"))].into();
/// let mut current = saved.clone();
/// current.insert("f.txt".to_string(), sig("f.txt"));
///
/// let plan = plan_sync(&current, &saved, IndexState::Ready, false);
/// assert_eq!(plan.strategy, SyncStrategy::Incremental);
/// assert!(plan.diff.added.contains("f.txt"));
/// ```
pub fn plan_sync(
    current: &Manifest,
    saved: &Manifest,
    index: IndexState,
    force_rebuild: bool,
) -> SyncPlan {
    let early = if force_rebuild {
        Some(RebuildReason::Forced)
    } else if index == IndexState::Missing {
        Some(RebuildReason::MissingIndex)
    } else if index == IndexState::Stale {
        Some(RebuildReason::ConfigChanged)
    } else if saved.is_empty() {
        Some(RebuildReason::EmptyManifest)
    } else {
        None
    };
    if let Some(reason) = early {
        return SyncPlan {
            strategy: SyncStrategy::FullRebuild(reason),
            diff: ManifestDiff::default(),
        };
    }

    let diff = manifest::diff(current, saved);
    let strategy = if diff.invalidates_index() {
        SyncStrategy::FullRebuild(RebuildReason::SourcesChanged)
    } else if !diff.added.is_empty() {
        SyncStrategy::Incremental
    } else {
        SyncStrategy::NoOp
    };

    SyncPlan { strategy, diff }
}

/// Bring `index` up to date with `source_dir`.
///
/// The manifest at `manifest_path` is replaced only after the index
/// mutation it describes has been persisted.
pub fn sync_index<I, L>(
    source_dir: &Path,
    manifest_path: &Path,
    extensions: &[String],
    index: &mut I,
    loader: &L,
    force_rebuild: bool,
) -> Result<SyncReport>
where
    I: VectorIndex + ?Sized,
    L: DocumentLoader + ?Sized,
{
    let current = walker::collect_signatures(source_dir, extensions)?;
    let saved = manifest::load_manifest(manifest_path);
    let state = IndexState::of(index);
    let plan = plan_sync(&current, &saved, state, force_rebuild);

    debug!(
        current = current.len(),
        saved = saved.len(),
        added = plan.diff.added.len(),
        removed = plan.diff.removed.len(),
        changed = plan.diff.changed.len(),
        "manifest compared"
    );

    let report = match plan.strategy {
        SyncStrategy::FullRebuild(reason) => {
            info!(%reason, files = current.len(), "rebuilding index");
            let documents = loader.load_all_documents(source_dir)?;
            let chunks = index.build_from_documents(&documents)?;
            manifest::save_manifest(manifest_path, &current)?;
            SyncReport {
                strategy: plan.strategy,
                documents_loaded: documents.len(),
                chunks_indexed: chunks,
                manifest_saved: true,
            }
        }
        SyncStrategy::Incremental => {
            index.load()?;
            let paths: Vec<PathBuf> = plan
                .diff
                .added
                .iter()
                .map(|relative| source_dir.join(relative))
                .collect();
            info!(files = paths.len(), "indexing new files");

            let documents = loader.load_documents_from_paths(&paths);
            let chunks = index.add_documents(&documents)?;
            let manifest_saved = chunks > 0;
            if manifest_saved {
                manifest::save_manifest(manifest_path, &current)?;
            } else {
                warn!(
                    files = paths.len(),
                    "new files produced no chunks; they will be retried"
                );
            }
            SyncReport {
                strategy: plan.strategy,
                documents_loaded: documents.len(),
                chunks_indexed: chunks,
                manifest_saved,
            }
        }
        SyncStrategy::NoOp => {
            index.load()?;
            info!(files = current.len(), "index is up to date");
            SyncReport {
                strategy: plan.strategy,
                documents_loaded: 0,
                chunks_indexed: 0,
                manifest_saved: false,
            }
        }
    };

    Ok(report)
}
