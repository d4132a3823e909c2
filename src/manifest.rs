//! Persisted snapshot of the source directory.
//!
//! On disk the manifest is a JSON object of the form
//! `{"files": {"<relative path>": {"mtime_ns": <int>, "size": <int>}}}`.
//! It is only ever replaced wholesale: the complete new content is written
//! to a sibling temp file which is then renamed over the old one.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::Result,
    walker::{FileSignature, Manifest},
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestFile {
    files: BTreeMap<String, SignatureEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignatureEntry {
    mtime_ns: u64,
    size: u64,
}

/// Load the last persisted manifest.
///
/// Returns an empty manifest if the file is absent or cannot be parsed;
/// never fails.
pub fn load_manifest(path: &Path) -> Manifest {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no manifest loaded");
            return Manifest::new();
        }
    };

    match serde_json::from_slice::<ManifestFile>(&bytes) {
        Ok(file) => file
            .files
            .into_iter()
            .map(|(relative_path, entry)| {
                let signature = FileSignature {
                    relative_path: relative_path.clone(),
                    size: entry.size,
                    mtime_ns: entry.mtime_ns,
                };
                (relative_path, signature)
            })
            .collect(),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "ignoring unparsable manifest"
            );
            Manifest::new()
        }
    }
}

/// Persist `manifest` at `path`, creating parent directories as needed.
pub fn save_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = ManifestFile {
        files: manifest
            .iter()
            .map(|(key, sig)| {
                (
                    key.clone(),
                    SignatureEntry {
                        mtime_ns: sig.mtime_ns,
                        size: sig.size,
                    },
                )
            })
            .collect(),
    };
    let bytes = serde_json::to_vec_pretty(&file)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;

    debug!(path = %path.display(), files = manifest.len(), "manifest saved");
    Ok(())
}

/// Difference between the current snapshot and the saved one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManifestDiff {
    /// Paths present now but not in the saved manifest.
    pub added: BTreeSet<String>,
    /// Paths in the saved manifest that no longer exist.
    pub removed: BTreeSet<String>,
    /// Paths present in both whose signatures differ.
    pub changed: BTreeSet<String>,
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
    }

    /// Whether any previously indexed file was modified or deleted.
    pub fn invalidates_index(&self) -> bool {
        !self.removed.is_empty() || !self.changed.is_empty()
    }
}

/// Compare the current snapshot against the saved one.
pub fn diff(current: &Manifest, saved: &Manifest) -> ManifestDiff {
    let mut result = ManifestDiff::default();

    for (path, sig) in current {
        match saved.get(path) {
            None => {
                result.added.insert(path.clone());
            }
            Some(stored) if stored != sig => {
                result.changed.insert(path.clone());
            }
            Some(_) => {}
        }
    }

    result.removed = saved
        .keys()
        .filter(|path| !current.contains_key(*path))
        .cloned()
        .collect();

    result
}
