//! Source document types and upload validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum accepted upload size (50 MB).
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Unsupported file type: {0} (allowed: txt, md, pdf)")]
    UnsupportedType(String),

    #[error("File too large: {size} bytes (maximum {MAX_UPLOAD_BYTES})")]
    TooLarge { size: u64 },

    #[error("File is empty")]
    Empty,
}

/// Kind of text-bearing document accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Text,
    Markdown,
    Pdf,
}

impl SourceKind {
    /// Detect the kind from a filename extension.
    pub fn from_extension(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(SourceKind::Text),
            "md" | "markdown" => Some(SourceKind::Markdown),
            "pdf" => Some(SourceKind::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Text => "txt",
            SourceKind::Markdown => "md",
            SourceKind::Pdf => "pdf",
        }
    }
}

/// Reference to an uploaded source document on local disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Path to the stored upload
    pub path: PathBuf,
    /// Original filename
    pub filename: String,
    /// Detected document kind
    pub kind: SourceKind,
    /// Size in bytes
    pub size_bytes: u64,
}

impl SourceDocument {
    /// Validate and build a source document reference.
    ///
    /// Size and type violations surface to the submitter; they never reach
    /// the pipeline.
    pub fn new(
        path: impl Into<PathBuf>,
        filename: impl Into<String>,
        size_bytes: u64,
    ) -> Result<Self, SourceError> {
        let filename = filename.into();

        if size_bytes == 0 {
            return Err(SourceError::Empty);
        }
        if size_bytes > MAX_UPLOAD_BYTES {
            return Err(SourceError::TooLarge { size: size_bytes });
        }

        let kind = SourceKind::from_extension(&filename)
            .ok_or_else(|| SourceError::UnsupportedType(filename.clone()))?;

        Ok(Self {
            path: path.into(),
            filename,
            kind,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(SourceKind::from_extension("notes.txt"), Some(SourceKind::Text));
        assert_eq!(SourceKind::from_extension("README.MD"), Some(SourceKind::Markdown));
        assert_eq!(SourceKind::from_extension("paper.pdf"), Some(SourceKind::Pdf));
        assert_eq!(SourceKind::from_extension("image.png"), None);
        assert_eq!(SourceKind::from_extension("noext"), None);
    }

    #[test]
    fn test_upload_size_boundary() {
        // Exactly at the limit succeeds
        let ok = SourceDocument::new("/tmp/a.txt", "a.txt", MAX_UPLOAD_BYTES);
        assert!(ok.is_ok());

        // One byte over fails
        let err = SourceDocument::new("/tmp/a.txt", "a.txt", MAX_UPLOAD_BYTES + 1);
        assert!(matches!(err, Err(SourceError::TooLarge { .. })));
    }

    #[test]
    fn test_rejects_unsupported_and_empty() {
        assert!(matches!(
            SourceDocument::new("/tmp/a.exe", "a.exe", 10),
            Err(SourceError::UnsupportedType(_))
        ));
        assert!(matches!(
            SourceDocument::new("/tmp/a.txt", "a.txt", 0),
            Err(SourceError::Empty)
        ));
    }
}
