use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "EXAMRAG_DATA_DIR";

/// Location of everything examrag persists: the manifest, both record
/// stores, and the optional settings file.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The EXAMRAG_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/examrag/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("examrag")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    pub fn knowledge_store(&self) -> PathBuf {
        self.root.join("knowledge.redb")
    }

    pub fn memory_store(&self) -> PathBuf {
        self.root.join("memory.redb")
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join("settings.json")
    }
}
