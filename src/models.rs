//! Core data models used throughout idxscan.
//!
//! These types represent the files discovered by the walker, the documents
//! produced by extraction, and the chunks and search hits produced by the
//! downstream index builder.

use std::fmt;
use std::path::PathBuf;

/// Separator between a container's identity and the path of an entry inside it.
pub const VIRTUAL_PATH_SEPARATOR: char = '!';

/// Join a container identity and an entry name into a virtual path.
pub fn virtual_path(container: &str, entry: &str) -> String {
    format!("{}{}{}", container, VIRTUAL_PATH_SEPARATOR, entry)
}

/// A regular file discovered by the directory walker.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Location on disk (may be reached through a symlink).
    pub abs_path: PathBuf,
    /// Document identity: path relative to the scan root, `/`-separated.
    pub path: String,
    pub size: u64,
    pub mtime_ns: i64,
    pub ctime: i64,
    pub mode: u32,
    /// Set when the file itself is a symlink.
    pub symlink_target: Option<String>,
    /// Type hint derived from the file name.
    pub mime: String,
}

/// Whether a document bundles nested entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Regular,
    Container,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Regular => "regular",
            DocumentKind::Container => "container",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regular" => Some(DocumentKind::Regular),
            "container" => Some(DocumentKind::Container),
            _ => None,
        }
    }
}

/// Outcome of extracting one document. Set once, when the document is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionStatus {
    Ok,
    /// Container expansion stopped early; entries parsed before the failure were kept.
    Partial(String),
    /// Content deliberately not extracted (e.g. over the size cutoff).
    Skipped(String),
    Failed(String),
}

/// Reason recorded on documents whose extraction was interrupted by a stop signal.
pub const REASON_CANCELLED: &str = "cancelled";
/// Reason recorded on documents larger than the content cutoff.
pub const REASON_OVERSIZED: &str = "content exceeds cutoff";

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Ok => "ok",
            ExtractionStatus::Partial(_) => "partial",
            ExtractionStatus::Skipped(_) => "skipped",
            ExtractionStatus::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ExtractionStatus::Ok => None,
            ExtractionStatus::Partial(r)
            | ExtractionStatus::Skipped(r)
            | ExtractionStatus::Failed(r) => Some(r.as_str()),
        }
    }

    /// Rebuild a status from its stored `(status, reason)` columns.
    pub fn from_parts(status: &str, reason: Option<String>) -> Option<Self> {
        let reason = reason.unwrap_or_default();
        match status {
            "ok" => Some(ExtractionStatus::Ok),
            "partial" => Some(ExtractionStatus::Partial(reason)),
            "skipped" => Some(ExtractionStatus::Skipped(reason)),
            "failed" => Some(ExtractionStatus::Failed(reason)),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExtractionStatus::Failed(r) if r == REASON_CANCELLED)
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} ({})", self.as_str(), reason),
            None => f.write_str(self.as_str()),
        }
    }
}

/// A rendered preview image, stored next to its document in the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    /// JPEG bytes.
    pub data: Vec<u8>,
}

/// One extracted document as stored in an index artifact.
#[derive(Debug, Clone)]
pub struct Document {
    /// Identity: relative path, or virtual path (`a.zip!dir/b.txt`) for archive entries.
    pub path: String,
    /// Top-level filesystem path this document was produced from.
    pub origin: String,
    /// Identity of the enclosing container, for archive entries.
    pub parent: Option<String>,
    /// Archive nesting depth; 0 for files on disk.
    pub depth: u32,
    pub kind: DocumentKind,
    pub size: u64,
    pub mtime_ns: i64,
    /// SHA-256 of the full content; absent when the content was never read.
    pub content_hash: Option<String>,
    pub mime: String,
    pub status: ExtractionStatus,
    pub text: Option<String>,
    pub metadata_json: String,
    pub thumbnail: Option<Thumbnail>,
}

/// A chunk of a document's text in a built search index.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A search hit returned from a built index.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub path: String,
    pub source: String,
    pub url: Option<String>,
    pub score: f64,
    pub snippet: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_columns() {
        let status = ExtractionStatus::Partial("truncated zip".to_string());
        let back = ExtractionStatus::from_parts(
            status.as_str(),
            status.reason().map(|r| r.to_string()),
        )
        .unwrap();
        assert_eq!(back, status);
        assert_eq!(
            ExtractionStatus::from_parts("ok", None),
            Some(ExtractionStatus::Ok)
        );
        assert_eq!(ExtractionStatus::from_parts("bogus", None), None);
    }

    #[test]
    fn cancelled_is_detected() {
        assert!(ExtractionStatus::Failed(REASON_CANCELLED.to_string()).is_cancelled());
        assert!(!ExtractionStatus::Failed("timeout".to_string()).is_cancelled());
        assert!(!ExtractionStatus::Ok.is_cancelled());
    }

    #[test]
    fn kind_column_values() {
        for kind in [DocumentKind::Regular, DocumentKind::Container] {
            assert_eq!(DocumentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(DocumentKind::Regular.as_str(), "regular");
        assert_eq!(DocumentKind::Container.as_str(), "container");
        assert_eq!(DocumentKind::parse("file"), None);
        assert_eq!(DocumentKind::parse("entry"), None);
    }

    #[test]
    fn virtual_paths_nest() {
        let inner = virtual_path(&virtual_path("a.zip", "b.tar"), "c.txt");
        assert_eq!(inner, "a.zip!b.tar!c.txt");
    }
}
