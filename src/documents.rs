//! Loading user documents for the knowledge base.
//!
//! Only text formats are read. Binary formats such as PDF or DOCX are rejected
//! with [`ParleyError::UnsupportedDocument`]; convert them to text first.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::debug;

use crate::error::{ParleyError, Result};

/// Extensions read as UTF-8 text.
pub const TEXT_EXTENSIONS: [&str; 8] = ["txt", "md", "markdown", "csv", "json", "log", "rst", "text"];

/// A document ready for chunking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Where the text came from (usually the file name).
    pub source: String,
    pub content: String,
    /// blake3 hash of `content`, hex encoded.
    pub fingerprint: String,
}

impl Document {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let fingerprint = blake3::hash(content.as_bytes()).to_hex().to_string();
        Self {
            source: source.into(),
            content,
            fingerprint,
        }
    }
}

fn unsupported(path: &Path, reason: impl Into<String>) -> ParleyError {
    ParleyError::UnsupportedDocument {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Read `path` as a [`Document`].
pub fn load_document(path: &Path) -> Result<Document> {
    if !path.is_file() {
        return Err(unsupported(path, "not a file"));
    }

    if let Some(ext) = path.extension() {
        let ext = ext.to_string_lossy().to_ascii_lowercase();
        if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return Err(unsupported(
                path,
                format!("`.{ext}` is not a text format; convert it to .txt or .md first"),
            ));
        }
    }

    let bytes = fs::read(path)?;
    let content = String::from_utf8(bytes).map_err(|_| unsupported(path, "not valid UTF-8"))?;
    if content.trim().is_empty() {
        return Err(unsupported(path, "document is empty"));
    }

    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!("Loaded {source} ({} chars)", content.chars().count());
    Ok(Document::new(source, content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_text_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "# Notes\n\nRust is fun.").unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.source, "notes.md");
        assert!(doc.content.contains("Rust is fun."));
        assert_eq!(doc.fingerprint.len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_only_on_content() {
        let a = Document::new("a.txt", "same text");
        let b = Document::new("b.txt", "same text");
        let c = Document::new("a.txt", "other text");
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_rejects_binary_formats_and_bad_input() {
        let dir = TempDir::new().unwrap();

        let pdf = dir.path().join("paper.pdf");
        fs::write(&pdf, b"%PDF-1.7").unwrap();
        assert!(matches!(
            load_document(&pdf),
            Err(ParleyError::UnsupportedDocument { .. })
        ));

        let binary = dir.path().join("blob.txt");
        fs::write(&binary, [0xff, 0xfe, 0x00]).unwrap();
        assert!(load_document(&binary).is_err());

        let empty = dir.path().join("empty.txt");
        fs::write(&empty, "  \n").unwrap();
        assert!(load_document(&empty).is_err());

        assert!(load_document(&dir.path().join("missing.txt")).is_err());
    }

    #[test]
    fn test_extensionless_file_is_read_as_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("README");
        fs::write(&path, "plain text").unwrap();
        assert_eq!(load_document(&path).unwrap().content, "plain text");
    }
}
