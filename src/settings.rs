//! User-tunable settings, read from `settings.json` in the data directory
//! and overridden by environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    category::DEFAULT_TARGET_PATTERNS,
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    error::{Error, Result},
    llm::{DEFAULT_BASE_URL, DEFAULT_LLM_MODEL},
    model_manager::{DEFAULT_MODEL_ID, MODEL_ENV_VAR},
    reranker::BoostPolicy,
    walker,
};

pub const SOURCE_DIR_ENV_VAR: &str = "EXAMRAG_SOURCE_DIR";
pub const EMBEDDER_ENV_VAR: &str = "EXAMRAG_EMBEDDER";
pub const LLM_MODEL_ENV_VAR: &str = "EXAMRAG_LLM_MODEL";

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MEMORY_TOP_K: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// pylate-rs ColBERT model, downloaded on first use.
    #[default]
    Colbert,
    /// Offline feature hashing.
    Hashing,
}

impl std::str::FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colbert" => Ok(Self::Colbert),
            "hashing" => Ok(Self::Hashing),
            other => Err(Error::Config(format!("unknown embedder '{other}'"))),
        }
    }
}

/// Category tagging and reranker boost settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostSettings {
    /// Globs over source paths selecting the boostable category.
    pub target_patterns: Vec<String>,
    #[serde(flatten)]
    pub policy: BoostPolicy,
}

impl Default for BoostSettings {
    fn default() -> Self {
        Self {
            target_patterns: DEFAULT_TARGET_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            policy: BoostPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory of source documents. Relative paths resolve against the
    /// working directory.
    pub source_dir: PathBuf,
    pub extensions: Vec<String>,
    pub embedder: EmbedderKind,
    pub model_id: String,
    pub llm_model: String,
    pub llm_base_url: String,
    pub top_k: usize,
    pub memory_top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub boost: BoostSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("data"),
            extensions: walker::default_extensions(),
            embedder: EmbedderKind::default(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            llm_base_url: DEFAULT_BASE_URL.to_string(),
            top_k: DEFAULT_TOP_K,
            memory_top_k: DEFAULT_MEMORY_TOP_K,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            boost: BoostSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from `path` (defaults if absent), then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = Self::from_file(path)?;
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Read settings from `path` without looking at the environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => {
                debug!(path = %path.display(), "loading settings");
                serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Config(format!("{}: {e}", path.display()))
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`Settings::load`]). Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(SOURCE_DIR_ENV_VAR) {
            self.source_dir = PathBuf::from(dir);
        }
        if let Some(kind) = get(EMBEDDER_ENV_VAR) {
            self.embedder = kind.parse()?;
        }
        if let Some(model) = get(MODEL_ENV_VAR) {
            self.model_id = model;
        }
        if let Some(model) = get(LLM_MODEL_ENV_VAR) {
            self.llm_model = model;
        }
        Ok(())
    }

    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::from_file(&tmp.path().join("none.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.top_k, 5);
        assert_eq!(settings.boost.policy.ratio_threshold, 0.30);
        assert_eq!(settings.llm_model, "openai/gpt-oss-20b");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"top_k": 8, "embedder": "hashing", "boost": {"bonus": 1.0}}"#,
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.top_k, 8);
        assert_eq!(settings.embedder, EmbedderKind::Hashing);
        assert_eq!(settings.boost.policy.bonus, 1.0);
        assert_eq!(settings.boost.policy.ratio_threshold, 0.30);
        assert_eq!(settings.boost.target_patterns.len(), 2);
        assert_eq!(settings.chunk_size, 1000);
    }

    #[test]
    fn invalid_file_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{\"top_k\": \"many\"}").unwrap();
        assert!(matches!(Settings::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            (SOURCE_DIR_ENV_VAR, "/srv/papers"),
            (EMBEDDER_ENV_VAR, "Hashing"),
            (LLM_MODEL_ENV_VAR, "llama-3.1-8b-instant"),
            (MODEL_ENV_VAR, ""),
        ]);
        let mut settings = Settings::default();
        settings
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.source_dir, PathBuf::from("/srv/papers"));
        assert_eq!(settings.embedder, EmbedderKind::Hashing);
        assert_eq!(settings.llm_model, "llama-3.1-8b-instant");
        assert_eq!(settings.model_id, DEFAULT_MODEL_ID);
    }

    #[test]
    fn unknown_embedder_is_rejected() {
        let mut settings = Settings::default();
        let result = settings.apply_overrides(|k| {
            (k == EMBEDDER_ENV_VAR).then(|| "word2vec".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
