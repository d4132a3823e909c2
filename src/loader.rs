use std::path::{Path, PathBuf};

use pdf_oxide::PdfDocument;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{error::Result, walker};

/// Text extracted from one source file (or one page/row of it).
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub text: String,
    /// Path of the file the text came from.
    pub source: String,
    pub page: Option<u32>,
}

/// Produces raw documents from source files.
///
/// Implementations skip files they cannot read or parse instead of failing
/// the whole call.
pub trait DocumentLoader {
    fn load_all_documents(&self, directory: &Path) -> Result<Vec<RawDocument>>;

    fn load_documents_from_paths(&self, paths: &[PathBuf]) -> Vec<RawDocument>;
}

/// Loads plain-text formats straight from the filesystem.
///
/// - `txt`, `md`: one document per file
/// - `pdf`: one document per page with text, `page` numbered from 1
/// - `csv`: one document per data row, rendered as `header: value` lines,
///   `page` numbered from 1
/// - `json`: one document per file, pretty-printed
///
/// Other tracked formats (`docx`, `xlsx`) have no extractor here and are
/// skipped with a warning.
///
/// A document's `source` is its `/`-separated path relative to the
/// directory being loaded, or to the configured root for explicit paths.
#[derive(Debug, Clone)]
pub struct FsLoader {
    extensions: Vec<String>,
    root: Option<PathBuf>,
}

impl FsLoader {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions,
            root: None,
        }
    }

    /// Label explicitly passed paths relative to `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn source_label(&self, path: &Path) -> String {
        match self.root.as_deref().and_then(|r| path.strip_prefix(r).ok()) {
            Some(relative) => walker::normalize_relative(relative),
            None => path.to_string_lossy().into_owned(),
        }
    }

    fn load_labeled(&self, files: &[(PathBuf, String)]) -> Vec<RawDocument> {
        // Read files in parallel; `collect` keeps input order.
        let loaded: Vec<Vec<RawDocument>> = files
            .par_iter()
            .map(|(path, source)| match load_file(path, source) {
                Ok(docs) => {
                    debug!(path = %path.display(), docs = docs.len(), "loaded");
                    docs
                }
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "skipping file");
                    Vec::new()
                }
            })
            .collect();

        let documents: Vec<RawDocument> =
            loaded.into_iter().flatten().collect();
        info!(
            files = files.len(),
            documents = documents.len(),
            "documents loaded"
        );
        documents
    }
}

impl Default for FsLoader {
    fn default() -> Self {
        Self::new(walker::default_extensions())
    }
}

impl DocumentLoader for FsLoader {
    fn load_all_documents(&self, directory: &Path) -> Result<Vec<RawDocument>> {
        let files = walker::discover_files(directory, &self.extensions)?;
        debug!(
            path = %directory.display(),
            files = files.len(),
            "discovered source files"
        );
        let labeled: Vec<(PathBuf, String)> = files
            .into_iter()
            .map(|f| (f.absolute_path, f.signature.relative_path))
            .collect();
        Ok(self.load_labeled(&labeled))
    }

    fn load_documents_from_paths(&self, paths: &[PathBuf]) -> Vec<RawDocument> {
        let labeled: Vec<(PathBuf, String)> = paths
            .iter()
            .map(|p| (p.clone(), self.source_label(p)))
            .collect();
        self.load_labeled(&labeled)
    }
}

fn load_file(
    path: &Path,
    source: &str,
) -> std::result::Result<Vec<RawDocument>, String> {
    let source = source.to_string();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" => {
            let text = read_text(path)?;
            Ok(vec![RawDocument {
                text,
                source,
                page: None,
            }])
        }
        "pdf" => pdf_pages(path, &source),
        "csv" => Ok(csv_rows(&read_text(path)?)
            .into_iter()
            .zip(1u32..)
            .map(|(text, row)| RawDocument {
                text,
                source: source.clone(),
                page: Some(row),
            })
            .collect()),
        "json" => {
            let value: serde_json::Value =
                serde_json::from_str(&read_text(path)?)
                    .map_err(|e| format!("invalid JSON: {e}"))?;
            let text = serde_json::to_string_pretty(&value)
                .map_err(|e| format!("cannot render JSON: {e}"))?;
            Ok(vec![RawDocument {
                text,
                source,
                page: None,
            }])
        }
        other => Err(format!("no text extractor for .{other} files")),
    }
}

/// Extract each page's text. Pages that fail to extract are skipped so one
/// damaged page does not drop the whole paper.
fn pdf_pages(
    path: &Path,
    source: &str,
) -> std::result::Result<Vec<RawDocument>, String> {
    let mut pdf =
        PdfDocument::open(path).map_err(|e| format!("invalid PDF: {e}"))?;
    let page_count =
        pdf.page_count().map_err(|e| format!("invalid PDF: {e}"))?;

    let mut documents = Vec::with_capacity(page_count);
    for (index, page) in (0..page_count).zip(1u32..) {
        match pdf.extract_text(index) {
            Ok(text) if text.trim().is_empty() => {}
            Ok(text) => documents.push(RawDocument {
                text,
                source: source.to_string(),
                page: Some(page),
            }),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    page,
                    error = %e,
                    "skipping page"
                );
            }
        }
    }
    if documents.is_empty() {
        warn!(
            path = %path.display(),
            pages = page_count,
            "PDF has no extractable text"
        );
    }
    Ok(documents)
}

fn read_text(path: &Path) -> std::result::Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Render each data row as `header: value` lines.
fn csv_rows(content: &str) -> Vec<String> {
    let mut records = csv_records(content).into_iter();
    let Some(headers) = records.next() else {
        return Vec::new();
    };

    records
        .map(|record| {
            record
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let header =
                        headers.get(i).map(String::as_str).unwrap_or("");
                    format!("{}: {}", header.trim(), value.trim())
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

/// Split CSV content into records. Double-quoted fields may contain
/// commas, line breaks and `""` escapes. Blank lines are dropped.
fn csv_records(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => record.push(std::mem::take(&mut field)),
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    records.retain(|r| r.iter().any(|f| !f.trim().is_empty()));
    records
}
