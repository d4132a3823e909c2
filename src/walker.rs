use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use tracing::warn;

use crate::error::Result;

/// Default file extensions tracked in the source directory.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["pdf", "txt", "csv", "xlsx", "docx", "json", "md"];

/// Size and modification time of one source file.
///
/// Two signatures are equal iff path, size and mtime all match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSignature {
    /// `/`-separated path relative to the source root.
    pub relative_path: String,
    pub size: u64,
    /// Last modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: u64,
}

/// Snapshot of the source directory keyed by relative path.
pub type Manifest = BTreeMap<String, FileSignature>;

/// A discovered source file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub signature: FileSignature,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

/// Compute the signature snapshot of every supported file under `root`.
///
/// A directory that does not exist yields an empty manifest.
pub fn collect_signatures(
    root: &Path,
    extensions: &[String],
) -> Result<Manifest> {
    Ok(discover_files(root, extensions)?
        .into_iter()
        .map(|file| (file.signature.relative_path.clone(), file.signature))
        .collect())
}

/// Recursively walk a directory and discover eligible source files.
///
/// Skips hidden files/directories (names starting with `.`) and only
/// returns files whose lowercase extension is in `extensions`. Results are
/// sorted by relative path.
pub fn discover_files(
    root: &Path,
    extensions: &[String],
) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        warn!(path = %root.display(), "source directory does not exist");
        return Ok(Vec::new());
    }

    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, extensions, &mut results)?;
    results.sort_by(|a, b| {
        a.signature.relative_path.cmp(&b.signature.relative_path)
    });
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    extensions: &[String],
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &entry.path(), extensions, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = entry.path().canonicalize() else {
                continue; // broken symlink
            };
            if resolved.starts_with(root) && resolved.is_dir() {
                continue;
            }
            if resolved.is_file() && is_supported(&resolved, extensions) {
                results.push(make_discovered(root, &entry.path(), &resolved)?);
            }
        } else if file_type.is_file() && is_supported(&entry.path(), extensions)
        {
            let abs = entry.path().canonicalize()?;
            results.push(make_discovered(root, &entry.path(), &abs)?);
        }
    }

    Ok(())
}

/// Whether the path's extension (case-insensitive) is in `extensions`.
pub fn is_supported(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
        })
}

/// Render a relative path with `/` separators regardless of platform.
pub fn normalize_relative(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Result<DiscoveredFile> {
    let relative = original_path.strip_prefix(root).unwrap_or(original_path);
    let metadata = std::fs::metadata(absolute_path)?;

    let mtime_ns = metadata
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    Ok(DiscoveredFile {
        signature: FileSignature {
            relative_path: normalize_relative(relative),
            size: metadata.len(),
            mtime_ns: u64::try_from(mtime_ns).unwrap_or(u64::MAX),
        },
        absolute_path: absolute_path.to_path_buf(),
    })
}

/// The default extension set as owned strings.
pub fn default_extensions() -> Vec<String> {
    SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}
