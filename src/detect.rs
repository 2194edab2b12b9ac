//! File type detection.
//!
//! Extension lookup (`mime_guess`) first, then magic-byte sniffing of the
//! first bytes when the name is not conclusive. Container detection is
//! separate: OOXML documents are zip files but are extracted as documents,
//! so only names and magic that denote an archive count as containers.

use std::path::Path;

pub const MIME_ZIP: &str = "application/zip";
pub const MIME_TAR: &str = "application/x-tar";
pub const MIME_GZIP: &str = "application/gzip";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";
pub const MIME_TEXT: &str = "text/plain";

/// Bytes read from the start of a file for sniffing.
pub const SNIFF_LEN: usize = 512;

/// Archive formats the expander understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Zip,
    Tar,
    TarGz,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Zip => "zip",
            ContainerKind::Tar => "tar",
            ContainerKind::TarGz => "tar.gz",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ContainerKind::Zip => MIME_ZIP,
            ContainerKind::Tar => MIME_TAR,
            ContainerKind::TarGz => MIME_GZIP,
        }
    }
}

/// Detect a container from its name, falling back to magic bytes for unknown extensions.
pub fn container_kind(name: &str, head: &[u8]) -> Option<ContainerKind> {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        return Some(ContainerKind::TarGz);
    }
    if lower.ends_with(".tar") {
        return Some(ContainerKind::Tar);
    }
    if lower.ends_with(".zip") {
        return Some(ContainerKind::Zip);
    }
    if guess_from_name(name).is_some() {
        return None;
    }
    if is_ustar_header(head) {
        Some(ContainerKind::Tar)
    } else if is_zip_magic(head) {
        Some(ContainerKind::Zip)
    } else {
        None
    }
}

/// Type hint from the file name alone (no I/O).
pub fn mime_from_name(name: &str) -> String {
    guess_from_name(name)
        .map(|m| m.to_string())
        .unwrap_or_else(|| MIME_OCTET_STREAM.to_string())
}

/// Full detection: container kind, then name, then magic bytes.
pub fn detect_mime(name: &str, head: &[u8]) -> String {
    if let Some(kind) = container_kind(name, head) {
        return kind.mime().to_string();
    }
    if let Some(mime) = guess_from_name(name) {
        return mime.to_string();
    }
    sniff(head).to_string()
}

fn guess_from_name(name: &str) -> Option<&'static str> {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    mime_guess::from_path(file_name).first_raw()
}

fn sniff(head: &[u8]) -> &'static str {
    if head.starts_with(b"%PDF-") {
        "application/pdf"
    } else if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        "image/gif"
    } else if is_gzip_magic(head) {
        MIME_GZIP
    } else if is_zip_magic(head) {
        MIME_ZIP
    } else if looks_like_text(head) {
        MIME_TEXT
    } else {
        MIME_OCTET_STREAM
    }
}

fn is_zip_magic(head: &[u8]) -> bool {
    head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06")
}

fn is_gzip_magic(head: &[u8]) -> bool {
    head.starts_with(&[0x1F, 0x8B])
}

fn is_ustar_header(head: &[u8]) -> bool {
    head.len() >= 262 && &head[257..262] == b"ustar"
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() || head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte sequence may be cut at the end of the sniff window.
        Err(e) => e.error_len().is_none() && e.valid_up_to() + 4 > head.len(),
    }
}

/// Whether the extractor treats this type as plain text.
pub fn is_text_mime(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json"
                | "application/xml"
                | "application/javascript"
                | "application/toml"
                | "application/x-yaml"
                | "application/yaml"
                | "application/x-sh"
                | "application/rtf"
                | "application/sql"
        )
}

pub fn is_image_mime(mime: &str) -> bool {
    matches!(
        mime,
        "image/png" | "image/jpeg" | "image/gif" | "image/bmp" | "image/webp" | "image/tiff"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archives_detected_by_extension() {
        assert_eq!(container_kind("b.zip", b""), Some(ContainerKind::Zip));
        assert_eq!(container_kind("x.TAR.GZ", b""), Some(ContainerKind::TarGz));
        assert_eq!(container_kind("x.tgz", b""), Some(ContainerKind::TarGz));
        assert_eq!(container_kind("dir/x.tar", b""), Some(ContainerKind::Tar));
    }

    #[test]
    fn office_documents_are_not_containers() {
        assert_eq!(container_kind("report.docx", b"PK\x03\x04"), None);
        assert_eq!(container_kind("a.txt", b"PK\x03\x04"), None);
    }

    #[test]
    fn unknown_extension_falls_back_to_magic() {
        assert_eq!(
            container_kind("blob.bin_unknown", b"PK\x03\x04rest"),
            Some(ContainerKind::Zip)
        );
        let mut tar_head = vec![0u8; 512];
        tar_head[257..262].copy_from_slice(b"ustar");
        assert_eq!(container_kind("noext", &tar_head), Some(ContainerKind::Tar));
    }

    #[test]
    fn sniffing_without_extension() {
        assert_eq!(detect_mime("README", b"hello world\n"), MIME_TEXT);
        assert_eq!(detect_mime("blob", &[0u8, 1, 2, 3]), MIME_OCTET_STREAM);
        assert_eq!(detect_mime("doc", b"%PDF-1.4\n"), "application/pdf");
    }

    #[test]
    fn name_hint_for_common_types() {
        assert_eq!(mime_from_name("a.txt"), "text/plain");
        assert_eq!(mime_from_name("dir/photo.png"), "image/png");
        assert!(is_text_mime("text/markdown"));
        assert!(is_text_mime("application/json"));
        assert!(!is_text_mime("application/pdf"));
    }
}
