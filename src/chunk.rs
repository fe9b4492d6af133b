//! Overlapping, boundary-aware text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size`
//! characters. Each chunk after the first begins exactly `chunk_overlap`
//! characters before the end of the previous one, so neighbouring chunks
//! share context.
//!
//! # Algorithm
//!
//! 1. If the remaining text fits in `chunk_size` characters, emit it and stop.
//! 2. Otherwise look for the last boundary inside the window
//!    `(start + overlap, start + chunk_size]`, preferring a paragraph
//!    break (`\n\n`), then a sentence end (`.`, `!` or `?` followed by
//!    whitespace), then any whitespace.
//! 3. With no boundary in the window, hard-cut at `start + chunk_size`.
//! 4. The next chunk starts at `end - overlap`.
//!
//! Text is never trimmed, so dropping the first `chunk_overlap`
//! characters of every chunk but the first and concatenating the rest
//! reproduces the input exactly.
//!
//! Sizes are counted in Unicode scalar values; a UTF-8 sequence is never split.
//!
//! # Example
//!
//! ```rust
//! use knowledge_harness::chunk::Chunker;
//!
//! let chunker = Chunker::new(1000, 200).unwrap();
//! let pieces = chunker.split_text("Transformational leadership inspires change.");
//! assert_eq!(pieces, vec!["Transformational leadership inspires change.".to_string()]);
//! ```

use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::models::{Chunk, Document};

/// Boundary kinds in preference order.
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Sentence,
    Whitespace,
}

const BOUNDARY_PREFERENCE: [Boundary; 3] =
    [Boundary::Paragraph, Boundary::Sentence, Boundary::Whitespace];

impl Boundary {
    /// Whether a chunk ending at char offset `end` (exclusive) ends on this boundary.
    fn ends_at(self, chars: &[char], end: usize) -> bool {
        match self {
            Boundary::Paragraph => end >= 2 && chars[end - 2] == '\n' && chars[end - 1] == '\n',
            Boundary::Sentence => {
                end >= 2
                    && chars[end - 1].is_whitespace()
                    && matches!(chars[end - 2], '.' | '!' | '?')
            }
            Boundary::Whitespace => chars[end - 1].is_whitespace(),
        }
    }
}

/// Splits text into overlapping chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// Create a chunker, rejecting `chunk_size == 0` and `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split raw text into ordered segments.
    ///
    /// Empty or whitespace-only text yields no segments.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut pieces = Vec::new();
        let mut start = 0usize;

        loop {
            if total - start <= self.chunk_size {
                pieces.push(chars[start..].iter().collect());
                break;
            }

            // `end` must pass start + overlap or the next chunk would not advance.
            let end = find_break(
                &chars,
                start + self.chunk_overlap + 1,
                start + self.chunk_size,
            );
            pieces.push(chars[start..end].iter().collect());
            start = end - self.chunk_overlap;
        }

        pieces
    }

    /// Chunk a loaded document, attaching provenance to every chunk.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let pieces = self.split_text(&document.content);
        let chunk_count = pieces.len();

        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| Chunk {
                hash: content_hash(&text),
                text,
                filename: document.filename.clone(),
                source_path: document.source_path.clone(),
                source_type: document.source_type,
                chunk_index,
                chunk_count,
            })
            .collect()
    }

    /// Chunk a batch of documents, preserving document order.
    pub fn chunk_all(&self, documents: &[Document]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = documents.iter().flat_map(|d| self.chunk(d)).collect();
        tracing::info!(
            chunks = chunks.len(),
            documents = documents.len(),
            "chunked documents"
        );
        chunks
    }
}

/// Pick the chunk end in `[lo, hi]`, falling back to a hard cut at `hi`.
fn find_break(chars: &[char], lo: usize, hi: usize) -> usize {
    BOUNDARY_PREFERENCE
        .iter()
        .find_map(|boundary| (lo..=hi).rev().find(|&end| boundary.ends_at(chars, end)))
        .unwrap_or(hi)
}

/// SHA-256 of the chunk text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn doc(content: &str) -> Document {
        Document {
            content: content.to_string(),
            source_path: "/kb/leadership.txt".to_string(),
            filename: "leadership.txt".to_string(),
            source_type: SourceType::Txt,
        }
    }

    /// Drop the known overlap from every chunk but the first and concatenate.
    fn reconstruct(pieces: &[String], overlap: usize) -> String {
        let mut out = String::new();
        for (i, p) in pieces.iter().enumerate() {
            if i == 0 {
                out.push_str(p);
            } else {
                out.extend(p.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = Chunker::new(1000, 200).unwrap();
        let text = "Transformational leadership inspires change.";
        let chunks = chunker.chunk(&doc(text));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].chunk_count, 1);
        assert_eq!(chunks[0].filename, "leadership.txt");
        assert_eq!(chunks[0].source_type, SourceType::Txt);
    }

    #[test]
    fn test_empty_and_whitespace_yield_no_chunks() {
        let chunker = Chunker::new(100, 10).unwrap();
        assert!(chunker.split_text("").is_empty());
        assert!(chunker.split_text("  \n\n\t  ").is_empty());
        assert!(chunker.chunk(&doc("\n\n")).is_empty());
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        assert_eq!(Chunker::new(0, 0), Err(ConfigError::ZeroChunkSize));
        assert_eq!(
            Chunker::new(100, 100),
            Err(ConfigError::OverlapTooLarge {
                size: 100,
                overlap: 100
            })
        );
        assert!(Chunker::new(100, 250).is_err());
        assert!(Chunker::new(100, 99).is_ok());
    }

    #[test]
    fn test_hard_cut_round_trip() {
        let chunker = Chunker::new(10, 3).unwrap();
        let text = "abcdefghijklmnopqrstuvwxyz";
        let pieces = chunker.split_text(text);
        assert_eq!(
            pieces,
            vec!["abcdefghij", "hijklmnopq", "opqrstuvwx", "vwxyz"]
        );
        assert_eq!(reconstruct(&pieces, 3), text);
    }

    #[test]
    fn test_adjacent_chunks_share_overlap() {
        let chunker = Chunker::new(10, 3).unwrap();
        let pieces = chunker.split_text("abcdefghijklmnopqrstuvwxyz0123456789");
        for pair in pieces.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 3).collect();
            let head: String = pair[1].chars().take(3).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let chunker = Chunker::new(20, 0).unwrap();
        let pieces = chunker.split_text("First para here.\n\nSecond para is longer than the window.");
        assert_eq!(pieces[0], "First para here.\n\n");
    }

    #[test]
    fn test_prefers_sentence_over_whitespace() {
        let chunker = Chunker::new(15, 0).unwrap();
        let pieces = chunker.split_text("One two. Three four five six");
        assert_eq!(pieces[0], "One two. ");
    }

    #[test]
    fn test_falls_back_to_whitespace() {
        let chunker = Chunker::new(12, 0).unwrap();
        let pieces = chunker.split_text("alpha beta gamma delta");
        assert_eq!(pieces[0], "alpha beta ");
    }

    #[test]
    fn test_round_trip_with_boundaries() {
        let chunker = Chunker::new(40, 8).unwrap();
        let text = (0..30)
            .map(|i| format!("Sentence number {} talks about teams.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let pieces = chunker.split_text(&text);
        assert!(pieces.len() > 1);
        assert_eq!(reconstruct(&pieces, 8), text);
    }

    #[test]
    fn test_chunks_never_exceed_size() {
        let chunker = Chunker::new(25, 5).unwrap();
        let text = "Motivation theory.\n\nExpectancy theory links effort to outcomes. \
                    Equity theory compares ratios!  Goal setting works?\nYes.";
        for piece in chunker.split_text(text) {
            assert!(piece.chars().count() <= 25, "too long: {:?}", piece);
        }
    }

    #[test]
    fn test_multibyte_utf8() {
        let chunker = Chunker::new(7, 2).unwrap();
        let text = "ünïcödé wörds ✓ ┌──┐ │ok│ └──┘ ünïcödé";
        let pieces = chunker.split_text(text);
        for p in &pieces {
            assert!(p.chars().count() <= 7);
        }
        assert_eq!(reconstruct(&pieces, 2), text);
    }

    #[test]
    fn test_indices_and_counts() {
        let chunker = Chunker::new(30, 5).unwrap();
        let text = (0..20)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunker.chunk(&doc(&text));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.chunk_count, chunks.len());
            assert_eq!(c.hash, content_hash(&c.text));
        }
    }

    #[test]
    fn test_deterministic() {
        let chunker = Chunker::new(12, 4).unwrap();
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta epsilon zeta";
        assert_eq!(chunker.split_text(text), chunker.split_text(text));
    }
}
