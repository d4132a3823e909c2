use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which corpus subset a chunk belongs to, decided once at ingestion.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    /// The subset the reranker can boost (e.g. previous-year papers).
    Target,
    #[default]
    General,
}

/// Default glob patterns selecting the boostable subset.
pub const DEFAULT_TARGET_PATTERNS: &[&str] = &["*pyq*", "*question*paper*"];

/// Tags source paths with a [`SourceCategory`] using glob patterns.
///
/// Patterns are matched case-insensitively against the source path; `*`
/// also matches across `/`.
///
/// # Examples
///
/// ```
/// use examrag::category::{CategoryTagger, SourceCategory};
///
/// let tagger = CategoryTagger::new(&["*pyq*".to_string()]).unwrap();
/// assert_eq!(tagger.tag("data/PYQ/2021.pdf"), SourceCategory::Target);
/// assert_eq!(tagger.tag("data/notes/dfa.txt"), SourceCategory::General);
/// ```
#[derive(Debug, Clone)]
pub struct CategoryTagger {
    patterns: Vec<String>,
    set: GlobSet,
}

impl CategoryTagger {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    Error::Config(format!(
                        "invalid category pattern '{pattern}': {e}"
                    ))
                })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| {
            Error::Config(format!("invalid category patterns: {e}"))
        })?;
        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    /// The patterns this tagger was built from.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn tag(&self, source: &str) -> SourceCategory {
        let normalized = source.replace('\\', "/");
        if self.set.is_match(&normalized) {
            SourceCategory::Target
        } else {
            SourceCategory::General
        }
    }
}

impl Default for CategoryTagger {
    fn default() -> Self {
        let patterns: Vec<String> =
            DEFAULT_TARGET_PATTERNS.iter().map(|p| p.to_string()).collect();
        // The built-in patterns are valid globs.
        Self::new(&patterns).unwrap_or_else(|_| Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        })
    }
}
