//! 4.K Ingestion Frontend: format detection plus format-specific extraction,
//! dispatching a raw uploaded artifact into the normalized chunk stream the RAG
//! pipeline (4.J) accepts. Grounded in the teacher's `document::parser::DocumentParser`
//! (extension-keyed dispatch, `lopdf`/`docx-rs` extraction) and `document_service.rs`'s
//! `detect_file_type`, generalized from an extension-only lookup to the spec's
//! three-tier detection order and widened from {pdf, docx, txt} to the full format
//! set in spec.md §6.

pub mod formats;

use crate::error::{CoreError, CoreResult};
use crate::text::chunker::Block;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceFormat {
    Pdf,
    Html,
    Markdown,
    Docx,
    Text,
    Image,
    JsonFirecrawl,
    JsonGeneric,
}

impl SourceFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Html => "html",
            SourceFormat::Markdown => "markdown",
            SourceFormat::Docx => "docx",
            SourceFormat::Text => "text",
            SourceFormat::Image => "image",
            SourceFormat::JsonFirecrawl => "json-firecrawl",
            SourceFormat::JsonGeneric => "json-generic",
        }
    }
}

/// One logical document pulled out of an uploaded artifact. A plain-text, HTML, PDF,
/// or DOCX upload always yields exactly one; a JSON (firecrawl or generic) upload can
/// yield many, one per array element (4.K: "each top-level `pages[i]`/array element
/// becomes one document").
pub struct ExtractedDocument {
    /// Distinguishes sibling documents extracted from one upload (e.g. `"report.json#2"`);
    /// equal to the uploaded filename when an upload yields a single document.
    pub source_name: String,
    pub content: ExtractedContent,
}

/// Which chunker (4.B) a logical document should go through: plain text uses the
/// sentence-aware chunker, typographically structured content uses the
/// structure-aware chunker over pre-tagged blocks.
#[derive(Debug, Clone)]
pub enum ExtractedContent {
    PlainText(String),
    Blocks(Vec<Block>),
}

/// Detects the source format in the order spec.md §6 mandates: declared MIME type
/// from the upload, then file magic bytes (leading ~2KB), then filename extension,
/// then a `Text` fallback. Detection never fails — an unrecognized artifact is
/// treated as plain text, consistent with 4.K's "tolerate malformed inputs." A result
/// of `JsonGeneric` from any of those three steps is refined to `JsonFirecrawl` when
/// the body itself is a firecrawl-shaped object (`{"pages": [...]}`) rather than the
/// generic ingestion's expected top-level array — the wire shape, not the MIME type
/// or extension, is what actually distinguishes the two JSON source formats.
pub fn detect_format(declared_mime: Option<&str>, bytes: &[u8], filename: &str) -> SourceFormat {
    let detected = if let Some(format) = declared_mime.and_then(format_from_mime) {
        format
    } else if let Some(format) = infer::get(&bytes[..bytes.len().min(2048)]).and_then(|k| format_from_mime(k.mime_type())) {
        format
    } else if let Some(format) = format_from_extension(filename) {
        format
    } else {
        SourceFormat::Text
    };

    if detected == SourceFormat::JsonGeneric && looks_like_firecrawl_json(bytes) {
        return SourceFormat::JsonFirecrawl;
    }
    detected
}

/// A firecrawl export is a top-level JSON object with a `pages` array; generic JSON
/// ingestion expects a top-level array instead (`formats::extract_json_generic`).
fn looks_like_firecrawl_json(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| v.get("pages").map(|p| p.is_array()))
        .unwrap_or(false)
}

fn format_from_mime(mime: &str) -> Option<SourceFormat> {
    match mime {
        "application/pdf" => Some(SourceFormat::Pdf),
        "text/html" | "application/xhtml+xml" => Some(SourceFormat::Html),
        "text/markdown" => Some(SourceFormat::Markdown),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some(SourceFormat::Docx),
        "text/plain" => Some(SourceFormat::Text),
        "application/json" => Some(SourceFormat::JsonGeneric),
        m if m.starts_with("image/") => Some(SourceFormat::Image),
        _ => None,
    }
}

fn format_from_extension(filename: &str) -> Option<SourceFormat> {
    let ext = std::path::Path::new(filename).extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "pdf" => Some(SourceFormat::Pdf),
        "html" | "htm" => Some(SourceFormat::Html),
        "md" | "markdown" => Some(SourceFormat::Markdown),
        "docx" | "doc" => Some(SourceFormat::Docx),
        "txt" => Some(SourceFormat::Text),
        "png" | "jpg" | "jpeg" | "tiff" | "tif" | "bmp" | "webp" => Some(SourceFormat::Image),
        "json" => Some(SourceFormat::JsonGeneric),
        _ => None,
    }
}

/// Enforces the per-file size limit ahead of extraction, per 4.K's "size limit
/// enforced before extraction."
pub fn check_file_size(len: u64, max_file_size_bytes: u64) -> CoreResult<()> {
    if len > max_file_size_bytes {
        return Err(CoreError::resource_exceeded(format!(
            "file size {len} exceeds max_file_size_bytes {max_file_size_bytes}"
        )));
    }
    Ok(())
}

pub fn check_batch_size(total_len: u64, max_batch_size_bytes: u64) -> CoreResult<()> {
    if total_len > max_batch_size_bytes {
        return Err(CoreError::resource_exceeded(format!(
            "batch size {total_len} exceeds max_batch_size_bytes {max_batch_size_bytes}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_declared_mime_first() {
        assert_eq!(detect_format(Some("application/pdf"), b"not really a pdf", "report.txt"), SourceFormat::Pdf);
    }

    #[test]
    fn falls_back_to_extension_when_mime_unknown() {
        assert_eq!(detect_format(None, b"plain content", "notes.md"), SourceFormat::Markdown);
    }

    #[test]
    fn falls_back_to_text_when_nothing_matches() {
        assert_eq!(detect_format(None, b"\x00\x01\x02", "mystery.bin"), SourceFormat::Text);
    }

    #[test]
    fn detects_pdf_by_magic_bytes() {
        let pdf_bytes = b"%PDF-1.4\n%...rest of a real pdf would follow...";
        assert_eq!(detect_format(None, pdf_bytes, "upload"), SourceFormat::Pdf);
    }

    #[test]
    fn file_size_at_limit_succeeds_one_over_fails() {
        assert!(check_file_size(100, 100).is_ok());
        assert!(check_file_size(101, 100).is_err());
    }

    #[test]
    fn firecrawl_shaped_json_is_distinguished_from_generic_json() {
        let firecrawl = br#"{"pages":[{"text":"a"},{"text":"b"}]}"#;
        assert_eq!(detect_format(Some("application/json"), firecrawl, "export.json"), SourceFormat::JsonFirecrawl);
        assert_eq!(detect_format(None, firecrawl, "export.json"), SourceFormat::JsonFirecrawl);

        let generic = br#"[{"text":"a"},{"text":"b"}]"#;
        assert_eq!(detect_format(Some("application/json"), generic, "items.json"), SourceFormat::JsonGeneric);
    }
}
