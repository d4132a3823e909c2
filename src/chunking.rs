//! Splitting loaded documents into the chunks that get embedded.
//!
//! Uses character windows with a word-boundary fallback. Each chunk keeps
//! its document's source and page and gets a category tag from the
//! [`CategoryTagger`].

use serde::{Deserialize, Serialize};

use crate::{
    category::{CategoryTagger, SourceCategory},
    loader::RawDocument,
};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// One indexed unit of document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub category: SourceCategory,
}

/// A window of a larger text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    /// Zero-based chunk index within the document.
    pub index: usize,
    /// Byte offset where this chunk starts in the original document.
    pub start_offset: usize,
}

/// Split every document and tag the resulting chunks.
///
/// Whitespace-only chunks are dropped, so a document with no text yields
/// nothing.
pub fn chunk_documents(
    documents: &[RawDocument],
    config: ChunkingConfig,
    tagger: &CategoryTagger,
) -> Vec<ChunkRecord> {
    documents
        .iter()
        .flat_map(|doc| {
            let category = tagger.tag(&doc.source);
            chunk_text(&doc.text, config.chunk_size, config.overlap)
                .into_iter()
                .map(move |chunk| ChunkRecord {
                    text: chunk.text,
                    source: doc.source.clone(),
                    page: doc.page,
                    category,
                })
        })
        .collect()
}

/// Split text into chunks (optionally overlapping).
///
/// If the text is shorter than `chunk_size`, returns a single chunk unless
/// it is blank. Handles UTF-8 multi-byte characters.
///
/// # Examples
///
/// ```
/// use examrag::chunking::chunk_text;
///
/// let chunks = chunk_text("Hello, world!", 1000, 0);
/// assert_eq!(chunks.len(), 1);
///
/// let text = "word ".repeat(500);
/// let chunks = chunk_text(&text, 1000, 200);
/// assert!(chunks.len() >= 2);
/// ```
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let char_count = text.chars().count();

    if char_count <= chunk_size {
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![Chunk {
            text: text.to_string(),
            index: 0,
            start_offset: 0,
        }];
    }

    // char index -> byte index
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start_char = 0;
    let mut index = 0;

    while start_char < char_count {
        let mut end_char = (start_char + chunk_size).min(char_count);
        // Fold a short remainder into this chunk instead of leaving a tiny
        // trailing one.
        if char_count - end_char < chunk_size / 4 {
            end_char = char_count;
        }

        let chunk_end_char = if end_char < char_count {
            find_word_boundary_char(text, &char_to_byte, start_char, end_char)
        } else {
            end_char
        };

        let start_byte = char_to_byte[start_char];
        let end_byte = char_to_byte[chunk_end_char];

        let chunk_text = &text[start_byte..end_byte];
        if !chunk_text.trim().is_empty() {
            chunks.push(Chunk {
                text: chunk_text.to_string(),
                index,
                start_offset: start_byte,
            });
            index += 1;
        }

        if chunk_end_char >= char_count {
            break;
        }
        // Never start past the end of the chunk just emitted, or the text
        // in between would be lost.
        start_char = (start_char + step).min(chunk_end_char);
    }

    chunks
}

/// Find a whitespace break at or before `pos_char`, looking back at most 100
/// chars and never before `floor_char`.
fn find_word_boundary_char(
    text: &str,
    char_to_byte: &[usize],
    floor_char: usize,
    pos_char: usize,
) -> usize {
    let search_start_char = pos_char.saturating_sub(100).max(floor_char + 1);
    if search_start_char >= pos_char {
        return pos_char;
    }

    let start_byte = char_to_byte[search_start_char];
    let end_byte = char_to_byte[pos_char];
    let search_region = &text[start_byte..end_byte];

    if let Some(ws_byte_offset) =
        search_region.rfind(|c: char| c.is_whitespace())
    {
        let ws_byte = start_byte + ws_byte_offset;
        if let Ok(idx) = char_to_byte.binary_search(&ws_byte) {
            return idx + 1;
        }
    }

    pos_char
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn doc(text: &str, source: &str) -> RawDocument {
        RawDocument {
            text: text.to_string(),
            source: source.to_string(),
            page: Some(3),
        }
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", DEFAULT_CHUNK_SIZE, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].start_offset, 0);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_text("   \n\t", 100, 0).is_empty());
        assert!(chunk_text("", 100, 0).is_empty());
    }

    #[test]
    fn long_text_chunks_overlap() {
        let text = "word ".repeat(500);
        let chunks = chunk_text(&text, 1000, 200);

        assert!(chunks.len() >= 2);
        assert_eq!(chunks[1].index, 1);
        let first_end = chunks[0].start_offset + chunks[0].text.len();
        assert!(chunks[1].start_offset < first_end, "chunks should overlap");
    }

    #[test]
    fn chunks_cover_full_text() {
        let text = "a".repeat(3000);
        let chunks = chunk_text(&text, 1000, 200);

        assert_eq!(chunks[0].start_offset, 0);
        let last = chunks.last().unwrap();
        assert_eq!(last.start_offset + last.text.len(), text.len());
    }

    /// Byte offsets of non-whitespace characters not inside any chunk.
    fn uncovered(text: &str, chunks: &[Chunk]) -> Vec<usize> {
        text.char_indices()
            .filter(|(_, c)| !c.is_whitespace())
            .map(|(i, _)| i)
            .filter(|&i| {
                !chunks.iter().any(|c| {
                    i >= c.start_offset && i < c.start_offset + c.text.len()
                })
            })
            .collect()
    }

    #[test]
    fn tail_after_word_boundary_is_kept() {
        let text = format!("{} {}", "x".repeat(920), "TAILWORD".repeat(14));
        let chunks = chunk_text(&text, 1000, 200);

        assert!(chunks.iter().any(|c| c.text.contains("TAILWORD")));
        assert!(uncovered(&text, &chunks).is_empty());
    }

    #[test]
    fn small_overlap_does_not_skip_text() {
        let text = "alpha beta gamma delta ".repeat(200);
        for (size, overlap) in [(100, 0), (100, 10), (1000, 200), (57, 3)] {
            let chunks = chunk_text(&text, size, overlap);
            assert!(
                uncovered(&text, &chunks).is_empty(),
                "size {size} overlap {overlap}"
            );
        }
    }

    #[test]
    fn short_remainder_joins_last_chunk() {
        let text = "a".repeat(1100);
        let chunks = chunk_text(&text, 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text.len(), 1100);
    }

    #[test]
    fn handles_multibyte_chars() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(50);
        let chunks = chunk_text(&text, 100, 20);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.text.chars().count() > 0);
        }
    }

    #[test]
    fn documents_keep_source_page_and_category() {
        let tagger = CategoryTagger::new(&["*pyq*".to_string()]).unwrap();
        let records = chunk_documents(
            &[doc("Explain DFA minimization.", "pyq/toc.txt"), doc("  ", "x.txt")],
            ChunkingConfig::default(),
            &tagger,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "pyq/toc.txt");
        assert_eq!(records[0].page, Some(3));
        assert_eq!(records[0].category, SourceCategory::Target);
    }

    proptest! {
        #[test]
        fn every_visible_char_is_chunked(
            words in prop::collection::vec("[a-z]{1,12}", 0..400),
            size in 20usize..300,
            overlap in 0usize..50,
        ) {
            let text = words.join(" ");
            let chunks = chunk_text(&text, size, overlap);
            prop_assert!(uncovered(&text, &chunks).is_empty());
        }
    }
}
