//! Text extraction for uploaded documents.
//!
//! TXT and Markdown are decoded as UTF-8 with a latin-1 fallback for legacy
//! encodings. PDFs go through pure-Rust extraction on a blocking thread.
//! Output is capped so a pathological upload cannot blow up the LLM prompt.

use tracing::{debug, warn};

use docvid_models::{SourceDocument, SourceKind};

use crate::error::{WorkerError, WorkerResult};

/// Maximum characters handed to the script phase.
pub const MAX_EXTRACT_CHARS: usize = 50_000;

/// Extract the text content of an uploaded document.
pub async fn extract_text(doc: &SourceDocument) -> WorkerResult<String> {
    let bytes = tokio::fs::read(&doc.path).await?;

    let text = match doc.kind {
        SourceKind::Text | SourceKind::Markdown => decode_text(&bytes),
        SourceKind::Pdf => extract_pdf(bytes).await?,
    };

    let truncated = truncate_chars(&text, MAX_EXTRACT_CHARS);
    if truncated.trim().is_empty() {
        return Err(WorkerError::extraction(format!(
            "No text content in {}",
            doc.filename
        )));
    }

    debug!(
        filename = %doc.filename,
        kind = doc.kind.as_str(),
        chars = truncated.chars().count(),
        "Extracted source text"
    );

    Ok(truncated)
}

/// Decode as UTF-8, falling back to latin-1 (every byte maps to the code
/// point of the same value) when the upload uses a legacy encoding.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            warn!("Upload is not valid UTF-8, decoding as latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

async fn extract_pdf(bytes: Vec<u8>) -> WorkerResult<String> {
    tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| WorkerError::extraction(format!("PDF extraction failed: {}", e)))
    })
    .await
    .map_err(|e| WorkerError::extraction(format!("PDF extraction task panicked: {}", e)))?
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn doc_from(bytes: &[u8], filename: &str) -> (SourceDocument, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(filename);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        let doc = SourceDocument::new(&path, filename, bytes.len() as u64).unwrap();
        (doc, dir)
    }

    #[tokio::test]
    async fn test_extracts_utf8_text() {
        let (doc, _dir) = doc_from("Hello, world! Grüße.".as_bytes(), "note.txt").await;
        let text = extract_text(&doc).await.unwrap();
        assert_eq!(text, "Hello, world! Grüße.");
    }

    #[tokio::test]
    async fn test_latin1_fallback() {
        // 0xE9 is 'é' in latin-1 but invalid standalone UTF-8
        let bytes = b"caf\xe9 culture";
        let (doc, _dir) = doc_from(bytes, "legacy.txt").await;
        let text = extract_text(&doc).await.unwrap();
        assert_eq!(text, "café culture");
    }

    #[tokio::test]
    async fn test_markdown_passes_through_raw() {
        let md = "# Title\n\n- bullet one\n- bullet two\n";
        let (doc, _dir) = doc_from(md.as_bytes(), "readme.md").await;
        let text = extract_text(&doc).await.unwrap();
        assert_eq!(text, md);
    }

    #[tokio::test]
    async fn test_whitespace_only_upload_rejected() {
        let (doc, _dir) = doc_from(b"   \n\t  \n", "blank.txt").await;
        let result = extract_text(&doc).await;
        assert!(matches!(result, Err(WorkerError::Extraction(_))));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "é".repeat(10);
        let out = truncate_chars(&text, 4);
        assert_eq!(out.chars().count(), 4);
    }
}
