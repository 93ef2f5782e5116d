//! Splits document text into retrieval-sized units respecting sentence and
//! structural boundaries (4.B). Two strategies; the ingestion frontend picks one per
//! source format.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Heading,
    Table,
    Code,
    List,
    ImageText,
    ImageDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub content_type: ContentType,
    pub section_header: Option<String>,
    /// Format-specific metadata carried from the originating block (e.g. PDF page
    /// number, HTML heading level, code-block language). `None` for the plain
    /// sentence-aware chunker, which has no format-specific source block.
    pub format_metadata: Option<serde_json::Value>,
}

const SENTENCE_TERMINATORS: &[char] = &['.', '؟', '!', '?'];

/// Splits `text` into sentences, keeping the terminator attached to the sentence it
/// closes. A run of whitespace-only input yields zero sentences.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes_len = text.len();
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if SENTENCE_TERMINATORS.contains(&c) {
            let end = idx + c.len_utf8();
            let candidate = text[start..end].trim();
            if !candidate.is_empty() {
                sentences.push(text[start..end].trim_start());
            }
            start = end;
        }
    }
    if start < bytes_len {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(text[start..].trim_start());
        }
    }
    sentences
}

/// Splits a single oversized sentence on whitespace into pieces no longer than
/// `max_chunk_size` characters, never producing an empty piece.
fn split_on_whitespace(sentence: &str, max_chunk_size: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in sentence.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if char_len(&current) + 1 + char_len(word) <= max_chunk_size {
            current.push(' ');
            current.push_str(word);
        } else {
            pieces.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    if pieces.is_empty() && !sentence.trim().is_empty() {
        pieces.push(sentence.trim().to_string());
    }
    pieces
}

/// Grapheme-cluster length rather than char count: a base letter plus a combining
/// mark that survives normalization (e.g. in non-Arabic passages) must count as one
/// unit, not two, or `max_chunk_size` silently drifts.
fn char_len(s: &str) -> usize {
    s.graphemes(true).count()
}

/// Default, sentence-aware chunker. Greedily packs sentences until the next one
/// would exceed `max_chunk_size`, carrying `overlap` characters from the previous
/// chunk's tail into the next chunk's head to preserve cross-boundary context.
///
/// Empty or whitespace-only input returns zero chunks — not an error.
pub fn chunk_sentence_aware(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut units: Vec<String> = Vec::new();
    for sentence in sentences {
        if char_len(sentence) > max_chunk_size {
            units.extend(split_on_whitespace(sentence, max_chunk_size));
        } else {
            units.push(sentence.to_string());
        }
    }

    let mut bodies: Vec<String> = Vec::new();
    let mut current = String::new();

    for unit in units {
        let candidate_len = if current.is_empty() {
            char_len(&unit)
        } else {
            char_len(&current) + 1 + char_len(&unit)
        };
        if !current.is_empty() && candidate_len > max_chunk_size {
            bodies.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&unit);
    }
    if !current.is_empty() {
        bodies.push(current);
    }

    let total = bodies.len();
    let mut chunks = Vec::with_capacity(total);
    let mut previous_tail: Option<String> = None;

    for (i, body) in bodies.into_iter().enumerate() {
        let content = match &previous_tail {
            Some(tail) if !tail.is_empty() => format!("{tail} {body}"),
            _ => body.clone(),
        };
        previous_tail = Some(tail_chars(&body, overlap));
        chunks.push(Chunk {
            content,
            chunk_index: i,
            total_chunks: total,
            content_type: ContentType::Text,
            section_header: None,
            format_metadata: None,
        });
    }
    chunks
}

fn tail_chars(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let graphemes: Vec<&str> = s.graphemes(true).collect();
    let start = graphemes.len().saturating_sub(n);
    graphemes[start..].concat()
}

/// A pre-parsed logical block handed in by a format-specific extractor, before
/// chunking. `heading_level` is only meaningful for `ContentType::Heading`.
#[derive(Debug, Clone)]
pub struct Block {
    pub text: String,
    pub content_type: ContentType,
    pub format_metadata: Option<serde_json::Value>,
}

impl Block {
    pub fn new(text: impl Into<String>, content_type: ContentType) -> Self {
        Self { text: text.into(), content_type, format_metadata: None }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.format_metadata = Some(metadata);
        self
    }
}

/// Dynamic target size per content type, used by the structure-aware chunker instead
/// of a single uniform `max_chunk_size`.
fn target_size_for(content_type: ContentType, max_chunk_size: usize) -> usize {
    match content_type {
        ContentType::Heading => 150,
        ContentType::Table => 250,
        ContentType::List => 300,
        ContentType::Code | ContentType::Text | ContentType::ImageText | ContentType::ImageDescription => {
            max_chunk_size.min(400).max(1)
        }
    }
}

/// Splits a table's row lines (one row per line, assumed header on the first line)
/// into row-wise fragments, each retaining the header row, when the whole table
/// exceeds `1.5 * max_chunk_size`.
fn split_table_rows(text: &str, max_chunk_size: usize) -> Vec<String> {
    let limit = (max_chunk_size as f64 * 1.5) as usize;
    if char_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut lines = text.lines();
    let header = match lines.next() {
        Some(h) => h.to_string(),
        None => return vec![text.to_string()],
    };

    let mut fragments = Vec::new();
    let mut current = header.clone();
    for row in lines {
        let candidate_len = char_len(&current) + 1 + char_len(row);
        if char_len(&current) > char_len(&header) && candidate_len > limit {
            fragments.push(std::mem::take(&mut current));
            current = header.clone();
        }
        current.push('\n');
        current.push_str(row);
    }
    if char_len(&current) > char_len(&header) {
        fragments.push(current);
    }
    if fragments.is_empty() {
        fragments.push(header);
    }
    fragments
}

/// Structure-aware chunker for documents with typographic structure (PDF, DOCX,
/// HTML). Section headers begin a new chunk and are carried as `section_header` for
/// every chunk following them, until the next header. Tables are emitted whole when
/// they fit `1.5 * max_chunk_size`, otherwise split row-wise with the header row
/// retained in every fragment.
pub fn chunk_structure_aware(blocks: &[Block], max_chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let mut raw: Vec<(String, ContentType, Option<String>, Option<serde_json::Value>)> = Vec::new();
    let mut current_header: Option<String> = None;

    for block in blocks {
        if block.text.trim().is_empty() {
            continue;
        }
        match block.content_type {
            ContentType::Heading => {
                current_header = Some(block.text.trim().to_string());
                raw.push((block.text.clone(), ContentType::Heading, current_header.clone(), block.format_metadata.clone()));
            }
            ContentType::Table => {
                for fragment in split_table_rows(&block.text, max_chunk_size) {
                    raw.push((fragment, ContentType::Table, current_header.clone(), block.format_metadata.clone()));
                }
            }
            other => {
                let target = target_size_for(other, max_chunk_size);
                for sub in chunk_sentence_aware(&block.text, target, overlap.min(target.saturating_sub(1).max(1))) {
                    raw.push((sub.content, other, current_header.clone(), block.format_metadata.clone()));
                }
            }
        }
    }

    let total = raw.len();
    raw.into_iter()
        .enumerate()
        .map(|(i, (content, content_type, section_header, format_metadata))| Chunk {
            content,
            chunk_index: i,
            total_chunks: total,
            content_type,
            section_header,
            format_metadata,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_zero_chunks() {
        assert!(chunk_sentence_aware("", 350, 50).is_empty());
        assert!(chunk_sentence_aware("   \n\t  ", 350, 50).is_empty());
    }

    #[test]
    fn packs_sentences_until_limit() {
        let text = "الجملة الأولى. الجملة الثانية. الجملة الثالثة.";
        let chunks = chunk_sentence_aware(text, 1000, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].total_chunks, 1);
    }

    #[test]
    fn splits_when_sentences_exceed_max_size() {
        let text = "This is sentence one. This is sentence two. This is sentence three.";
        let chunks = chunk_sentence_aware(text, 25, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.content.is_empty());
        }
    }

    #[test]
    fn oversized_single_sentence_splits_on_whitespace_never_empty() {
        let long_word_sentence = "word ".repeat(100) + ".";
        let chunks = chunk_sentence_aware(&long_word_sentence, 30, 5);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.content.trim().is_empty());
            assert!(c.content.chars().count() > 0);
        }
    }

    #[test]
    fn chunk_indices_and_totals_are_consistent() {
        let text = "أولا. ثانيا. ثالثا. رابعا. خامسا.";
        let chunks = chunk_sentence_aware(text, 10, 2);
        let total = chunks.len();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.total_chunks, total);
        }
    }

    #[test]
    fn structure_aware_carries_section_header_forward() {
        let blocks = vec![
            Block::new("Introduction", ContentType::Heading),
            Block::new("Some prose under the introduction section.", ContentType::Text),
            Block::new("More prose, still under introduction.", ContentType::Text),
        ];
        let chunks = chunk_structure_aware(&blocks, 400, 20);
        assert!(chunks.iter().skip(1).all(|c| c.section_header.as_deref() == Some("Introduction")));
    }

    #[test]
    fn small_table_is_one_chunk() {
        let blocks = vec![Block::new("Name|Age\nAda|36\nAlan|41", ContentType::Table)];
        let chunks = chunk_structure_aware(&blocks, 350, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content_type, ContentType::Table);
    }

    #[test]
    fn large_table_splits_row_wise_retaining_header() {
        let header = "Name|Age";
        let rows: Vec<String> = (0..200).map(|i| format!("Person{i}|{i}")).collect();
        let text = format!("{header}\n{}", rows.join("\n"));
        let blocks = vec![Block::new(text, ContentType::Table)];
        let chunks = chunk_structure_aware(&blocks, 50, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.starts_with(header));
        }
    }
}
