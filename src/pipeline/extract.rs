//! Document extraction and chunking.
//!
//! Extraction turns a file path into plain text plus a document-type label.
//! Chunking slices that text into overlapping character windows, preferring
//! to break at paragraph and sentence boundaries so chunks stay coherent.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// Plain text pulled out of a source document.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Source path as given by the caller.
    pub source: String,
    /// Document-type label (file extension without the dot).
    pub doc_type: String,
    pub text: String,
}

/// Turns a document path into extractable text.
///
/// Implementations are registered per format; `Send + Sync` because workers
/// share one extractor across threads.
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError>;
}

/// Extractor for plain-text formats (`.txt`, `.md`).
#[derive(Debug, Default)]
pub struct TextExtractor;

impl DocumentExtractor for TextExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if extension != "txt" && extension != "md" {
            return Err(ExtractError::UnsupportedFormat {
                extension: if extension.is_empty() {
                    "(none)".to_string()
                } else {
                    format!(".{extension}")
                },
            });
        }

        let text = std::fs::read_to_string(path).map_err(|e| ExtractError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        if text.trim().is_empty() {
            return Err(ExtractError::EmptyDocument {
                path: path.display().to_string(),
            });
        }

        Ok(ExtractedDocument {
            source: path.display().to_string(),
            doc_type: extension,
            text,
        })
    }
}

/// A chunk of document text headed for the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Position within the document, starting at 0.
    pub index: usize,
    pub text: String,
    /// Rough token estimate (chars / 4).
    pub tokens: usize,
    /// Source document path.
    pub source: String,
    pub doc_type: String,
}

/// Character-window chunker with overlap.
///
/// Each window targets `chunk_size` characters and the next window starts
/// `chunk_size - overlap` further in. Window ends prefer, in order: a
/// paragraph break, a line break, a sentence end, a space; a hard cut only
/// when none appears in the tail of the window.
#[derive(Debug, Clone)]
pub struct ChunkingEngine {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingEngine {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        debug_assert!(overlap < chunk_size);
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Split an extracted document into chunks. Text at or under the window
    /// size yields a single chunk.
    pub fn chunk(&self, doc: &ExtractedDocument) -> Vec<Chunk> {
        let chars: Vec<char> = doc.text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let hard_end = (start + self.chunk_size).min(chars.len());
            let end = if hard_end == chars.len() {
                hard_end
            } else {
                self.break_point(&chars, start, hard_end)
            };

            let text: String = chars[start..end].iter().collect();
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                chunks.push(Chunk {
                    index: chunks.len(),
                    tokens: trimmed.chars().count() / 4,
                    text: trimmed.to_string(),
                    source: doc.source.clone(),
                    doc_type: doc.doc_type.clone(),
                });
            }

            if end == chars.len() {
                break;
            }
            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        tracing::debug!(source = %doc.source, chunks = chunks.len(), "document chunked");
        chunks
    }

    /// Find the best break position in `(start, hard_end]`, searching the
    /// last `overlap` characters of the window.
    fn break_point(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let search_from = hard_end.saturating_sub(self.overlap).max(start + 1);

        let find_last = |pred: &dyn Fn(usize) -> bool| -> Option<usize> {
            (search_from..hard_end).rev().find(|&i| pred(i))
        };

        // Paragraph break.
        if let Some(i) = find_last(&|i| chars[i] == '\n' && i > 0 && chars[i - 1] == '\n') {
            return i + 1;
        }
        // Line break.
        if let Some(i) = find_last(&|i| chars[i] == '\n') {
            return i + 1;
        }
        // Sentence end.
        if let Some(i) =
            find_last(&|i| chars[i] == ' ' && i > 0 && matches!(chars[i - 1], '.' | '!' | '?'))
        {
            return i + 1;
        }
        // Any space.
        if let Some(i) = find_last(&|i| chars[i] == ' ') {
            return i + 1;
        }
        hard_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(text: &str) -> ExtractedDocument {
        ExtractedDocument {
            source: "test.txt".into(),
            doc_type: "txt".into(),
            text: text.into(),
        }
    }

    #[test]
    fn txt_and_md_extract() {
        let dir = TempDir::new().unwrap();
        for name in ["a.txt", "b.md"] {
            let path = dir.path().join(name);
            std::fs::write(&path, "conteúdo").unwrap();
            let extracted = TextExtractor.extract(&path).unwrap();
            assert_eq!(extracted.text, "conteúdo");
        }
    }

    #[test]
    fn unsupported_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, "binary").unwrap();
        let err = TextExtractor.extract(&path).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat { .. }));
    }

    #[test]
    fn empty_document_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "   \n").unwrap();
        let err = TextExtractor.extract(&path).unwrap_err();
        assert!(matches!(err, ExtractError::EmptyDocument { .. }));
    }

    #[test]
    fn short_text_is_one_chunk() {
        let engine = ChunkingEngine::new(4_000, 400);
        let chunks = engine.chunk(&doc("short text"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "short text");
    }

    #[test]
    fn long_text_produces_overlapping_windows() {
        let engine = ChunkingEngine::new(100, 20);
        let sentence = "A Petrobras anunciou novos investimentos em energia. ";
        let text = sentence.repeat(20);
        let chunks = engine.chunk(&doc(&text));

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.text.chars().count() <= 100);
        }
    }

    #[test]
    fn breaks_prefer_paragraph_boundaries() {
        let engine = ChunkingEngine::new(50, 20);
        let text = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let chunks = engine.chunk(&doc(&text));

        // The first window (50 chars) would cut into the second paragraph,
        // but the paragraph break in the search tail wins.
        assert!(chunks[0].text.chars().all(|c| c == 'a'));
        assert_eq!(chunks[0].text.chars().count(), 40);
        // The last chunk reaches the end of the text.
        assert!(chunks.last().unwrap().text.ends_with('b'));
    }

    #[test]
    fn token_estimate_is_quarter_of_chars() {
        let engine = ChunkingEngine::new(4_000, 400);
        let chunks = engine.chunk(&doc(&"x".repeat(400)));
        assert_eq!(chunks[0].tokens, 100);
    }
}
