//! Per-file processing: one walker entry in, its documents out.
//!
//! Runs on a blocking thread inside a scheduler slot. A regular file
//! produces one document; a container produces one document per entry,
//! expanded inline in entry order, and then its own document once its status
//! is known. Entry documents are handed out in bounded batches as they are
//! produced, so a large archive is never held in memory as a whole. Nothing
//! in here returns an error: every failure is recorded as the status of the
//! document it affected.

use std::fs::File;
use std::io::{BufReader, Read};
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::archive::{self, ArchiveEntry, ArchiveError, ExpandLimits, Expansion, ExpansionBudget};
use crate::cancel::{Checkpoint, StopSignal};
use crate::config::{ArchivePolicy, ScanJob};
use crate::detect::{self, ContainerKind, SNIFF_LEN};
use crate::digest::{digest_bytes, ContentDigests, ContentHasher};
use crate::extract::{self, ExtractError, ExtractLimits};
use crate::models::{
    Document, DocumentKind, ExtractionStatus, FileEntry, REASON_CANCELLED, REASON_OVERSIZED,
};

const HASH_BUFFER: usize = 1024 * 1024;
/// Entry documents collected before a batch is handed out.
const FLUSH_DOCUMENTS: usize = 256;
/// Text and thumbnail bytes collected before a batch is handed out.
const FLUSH_BYTES: usize = 32 * 1024 * 1024;

/// The subset of a [`ScanJob`] that extraction needs, cheap to clone into tasks.
#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub max_content_bytes: u64,
    pub archive_policy: ArchivePolicy,
    pub max_archive_entries: usize,
    pub max_expanded_bytes: u64,
    pub max_file_documents: usize,
    pub thumbnail_quality: u8,
    pub timeout: Duration,
    pub extra_digests: bool,
}

impl ExtractSettings {
    pub fn from_job(job: &ScanJob) -> Self {
        Self {
            max_content_bytes: job.max_content_bytes,
            archive_policy: job.archive_policy,
            max_archive_entries: job.max_archive_entries,
            max_expanded_bytes: job.max_expanded_bytes,
            max_file_documents: job.max_file_documents,
            thumbnail_quality: job.thumbnail_quality,
            timeout: job.timeout,
            extra_digests: job.extra_digests,
        }
    }

    fn extract_limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_content_bytes: self.max_content_bytes,
            thumbnail_quality: self.thumbnail_quality,
        }
    }
}

/// Process one file from disk, handing its documents to `emit` in batches.
pub fn process_file(
    entry: &FileEntry,
    settings: &ExtractSettings,
    stop: &StopSignal,
    emit: &mut dyn FnMut(Vec<Document>),
) {
    let checkpoint = Checkpoint::new(settings.timeout, stop.clone());
    let metadata = file_metadata(entry);

    let head = match read_head(entry) {
        Ok(head) => head,
        Err(e) => {
            emit(vec![file_document(
                entry,
                entry.mime.clone(),
                None,
                ExtractionStatus::Failed(e.to_string()),
                metadata,
            )]);
            return;
        }
    };

    if let Some(kind) = detect::container_kind(&entry.path, &head) {
        if settings.archive_policy.expands_at(0) {
            process_container_file(entry, kind, settings, stop, &checkpoint, metadata, emit);
            return;
        }
    }
    emit(vec![process_regular_file(entry, &head, settings, &checkpoint, metadata)]);
}

fn process_regular_file(
    entry: &FileEntry,
    head: &[u8],
    settings: &ExtractSettings,
    checkpoint: &Checkpoint,
    mut metadata: Map<String, Value>,
) -> Document {
    let mime = detect::detect_mime(&entry.path, head);
    if entry.size > settings.max_content_bytes {
        let (hash, status) = match hash_file(entry, settings.extra_digests, checkpoint) {
            Ok(digests) => {
                insert_digests(&mut metadata, &digests);
                (Some(digests.sha256), ExtractionStatus::Skipped(REASON_OVERSIZED.to_string()))
            }
            Err(e) => (None, failure_status(e)),
        };
        return file_document(entry, mime, hash, status, metadata);
    }

    let bytes = match read_bounded(entry, settings.max_content_bytes) {
        Ok(bytes) => bytes,
        Err(e) => {
            return file_document(
                entry,
                mime,
                None,
                ExtractionStatus::Failed(e.to_string()),
                metadata,
            )
        }
    };
    let digests = digest_bytes(&bytes, settings.extra_digests);
    insert_digests(&mut metadata, &digests);
    if bytes.len() as u64 > settings.max_content_bytes {
        // Grew past the cutoff since it was listed.
        let mut doc = file_document(
            entry,
            mime,
            Some(digests.sha256),
            ExtractionStatus::Skipped(REASON_OVERSIZED.to_string()),
            metadata,
        );
        doc.size = bytes.len() as u64;
        return doc;
    }

    let mut doc = file_document(entry, mime, Some(digests.sha256), ExtractionStatus::Ok, metadata);
    apply_extraction(&mut doc, &bytes, settings, checkpoint);
    doc
}

fn process_container_file(
    entry: &FileEntry,
    kind: ContainerKind,
    settings: &ExtractSettings,
    stop: &StopSignal,
    checkpoint: &Checkpoint,
    mut metadata: Map<String, Value>,
    emit: &mut dyn FnMut(Vec<Document>),
) {
    let mime = kind.mime().to_string();
    let digests = match hash_file(entry, settings.extra_digests, checkpoint) {
        Ok(digests) => digests,
        Err(e) => {
            emit(vec![file_document(entry, mime, None, failure_status(e), metadata)]);
            return;
        }
    };
    insert_digests(&mut metadata, &digests);

    let budget = ExpansionBudget::new(settings.max_expanded_bytes, settings.max_file_documents);
    let mut processor = EntryProcessor::new(&entry.path, settings, stop, &budget, emit);
    let limits = processor.expand_limits();
    let expand_checkpoint = processor.expand_checkpoint.clone();
    let outcome = archive::expand_file(
        &entry.abs_path,
        kind,
        &entry.path,
        0,
        entry.mtime_ns,
        limits,
        &expand_checkpoint,
        &mut |e| processor.process_entry(e),
    );
    insert_expansion(&mut metadata, kind, &outcome);
    let status = expansion_status(&entry.path, outcome);
    tracing::debug!(
        path = %entry.path,
        documents = budget.documents_used(),
        bytes = budget.bytes_used(),
        "container expanded"
    );

    processor.push(Document {
        kind: DocumentKind::Container,
        ..file_document(entry, mime, Some(digests.sha256), status, metadata)
    });
    processor.flush();
}

/// Expands containers and extracts their entries for one top-level file.
struct EntryProcessor<'a> {
    origin: &'a str,
    settings: &'a ExtractSettings,
    stop: &'a StopSignal,
    budget: &'a ExpansionBudget,
    expand_checkpoint: Checkpoint,
    batch: Vec<Document>,
    batch_bytes: usize,
    emit: &'a mut dyn FnMut(Vec<Document>),
}

impl<'a> EntryProcessor<'a> {
    fn new(
        origin: &'a str,
        settings: &'a ExtractSettings,
        stop: &'a StopSignal,
        budget: &'a ExpansionBudget,
        emit: &'a mut dyn FnMut(Vec<Document>),
    ) -> Self {
        Self {
            origin,
            settings,
            stop,
            budget,
            expand_checkpoint: Checkpoint::stop_only(stop.clone()),
            batch: Vec::new(),
            batch_bytes: 0,
            emit,
        }
    }

    fn expand_limits(&self) -> ExpandLimits<'a> {
        ExpandLimits {
            max_content_bytes: self.settings.max_content_bytes,
            max_entries: self.settings.max_archive_entries,
            budget: self.budget,
        }
    }

    fn push(&mut self, doc: Document) {
        self.batch_bytes += doc.text.as_ref().map_or(0, String::len)
            + doc.thumbnail.as_ref().map_or(0, |t| t.data.len());
        self.batch.push(doc);
        if self.batch.len() >= FLUSH_DOCUMENTS || self.batch_bytes >= FLUSH_BYTES {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        self.batch_bytes = 0;
        (self.emit)(std::mem::take(&mut self.batch));
    }

    fn process_entry(&mut self, entry: ArchiveEntry) {
        let mut doc = Document {
            path: entry.path.clone(),
            origin: self.origin.to_string(),
            parent: Some(entry.container),
            depth: entry.depth,
            kind: DocumentKind::Regular,
            size: entry.size,
            mtime_ns: entry.mtime_ns,
            content_hash: None,
            mime: detect::mime_from_name(&entry.name),
            status: ExtractionStatus::Skipped(REASON_OVERSIZED.to_string()),
            text: None,
            metadata_json: "{}".to_string(),
            thumbnail: None,
        };

        let data = match entry.data {
            Some(data) if !entry.oversized => data,
            _ => {
                tracing::debug!(path = %doc.path, "archive entry over cutoff");
                self.push(doc);
                return;
            }
        };

        let head = &data[..data.len().min(SNIFF_LEN)];
        let container = detect::container_kind(&entry.name, head);
        doc.mime = detect::detect_mime(&entry.name, head);
        let digests = digest_bytes(&data, self.settings.extra_digests);
        let mut metadata = Map::new();
        insert_digests(&mut metadata, &digests);
        doc.content_hash = Some(digests.sha256);

        match container {
            Some(kind) if self.settings.archive_policy.expands_at(entry.depth) => {
                let checkpoint = self.expand_checkpoint.clone();
                let limits = self.expand_limits();
                let outcome = archive::expand_bytes(
                    data,
                    kind,
                    &doc.path,
                    entry.depth,
                    entry.mtime_ns,
                    limits,
                    &checkpoint,
                    &mut |e| self.process_entry(e),
                );
                insert_expansion(&mut metadata, kind, &outcome);
                doc.kind = DocumentKind::Container;
                doc.status = expansion_status(&doc.path, outcome);
                doc.metadata_json = Value::Object(metadata).to_string();
                self.push(doc);
            }
            Some(kind) => {
                // Nested container beyond the expansion policy: opaque.
                metadata.insert("archive_format".into(), json!(kind.as_str()));
                doc.status = ExtractionStatus::Ok;
                doc.metadata_json = Value::Object(metadata).to_string();
                self.push(doc);
            }
            None => {
                doc.status = ExtractionStatus::Ok;
                doc.metadata_json = Value::Object(metadata).to_string();
                let checkpoint = Checkpoint::new(self.settings.timeout, self.stop.clone());
                apply_extraction(&mut doc, &data, self.settings, &checkpoint);
                self.push(doc);
            }
        }
    }
}

/// Run the extractor and fold its output into `doc`.
fn apply_extraction(doc: &mut Document, bytes: &[u8], settings: &ExtractSettings, checkpoint: &Checkpoint) {
    match extract::extract(bytes, &doc.mime, &settings.extract_limits(), checkpoint) {
        Ok(extracted) => {
            let mut metadata = match serde_json::from_str::<Value>(&doc.metadata_json) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            metadata.extend(extracted.metadata);
            doc.metadata_json = Value::Object(metadata).to_string();
            doc.text = extracted.text;
            doc.thumbnail = extracted.thumbnail;
            doc.status = ExtractionStatus::Ok;
        }
        Err(e) => {
            tracing::debug!(path = %doc.path, error = %e, "extraction failed");
            doc.status = failure_status(e);
        }
    }
}

fn failure_status(err: ExtractError) -> ExtractionStatus {
    match err {
        ExtractError::Cancelled => ExtractionStatus::Failed(REASON_CANCELLED.to_string()),
        other => ExtractionStatus::Failed(other.to_string()),
    }
}

/// Container status from its expansion outcome.
fn expansion_status(path: &str, outcome: Expansion) -> ExtractionStatus {
    match outcome.error {
        None => ExtractionStatus::Ok,
        Some(ArchiveError::Interrupted(e)) => failure_status(e),
        Some(err) => {
            tracing::warn!(path, error = %err, entries = outcome.entries, "archive expanded partially");
            ExtractionStatus::Partial(err.to_string())
        }
    }
}

fn insert_expansion(metadata: &mut Map<String, Value>, kind: ContainerKind, outcome: &Expansion) {
    metadata.insert("archive_format".into(), json!(kind.as_str()));
    metadata.insert("entries".into(), json!(outcome.entries));
    if outcome.duplicates > 0 {
        metadata.insert("duplicate_entries".into(), json!(outcome.duplicates));
    }
}

fn insert_digests(metadata: &mut Map<String, Value>, digests: &ContentDigests) {
    if let Some(extra) = &digests.extra {
        metadata.insert("digests".into(), extra.clone());
    }
}

fn file_metadata(entry: &FileEntry) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("mode".into(), json!(format!("{:o}", entry.mode)));
    metadata.insert("ctime".into(), json!(entry.ctime));
    if let Some(target) = &entry.symlink_target {
        metadata.insert("symlink_target".into(), json!(target));
    }
    metadata
}

fn file_document(
    entry: &FileEntry,
    mime: String,
    content_hash: Option<String>,
    status: ExtractionStatus,
    metadata: Map<String, Value>,
) -> Document {
    Document {
        path: entry.path.clone(),
        origin: entry.path.clone(),
        parent: None,
        depth: 0,
        kind: DocumentKind::Regular,
        size: entry.size,
        mtime_ns: entry.mtime_ns,
        content_hash,
        mime,
        status,
        text: None,
        metadata_json: Value::Object(metadata).to_string(),
        thumbnail: None,
    }
}

fn read_head(entry: &FileEntry) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(&entry.abs_path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(head)
}

/// Read at most `cutoff + 1` bytes, so growth past the cutoff is visible.
fn read_bounded(entry: &FileEntry, cutoff: u64) -> std::io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(entry.size as usize);
    File::open(&entry.abs_path)?
        .take(cutoff.saturating_add(1))
        .read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn hash_file(
    entry: &FileEntry,
    extra_digests: bool,
    checkpoint: &Checkpoint,
) -> Result<ContentDigests, ExtractError> {
    let mut reader = BufReader::new(File::open(&entry.abs_path)?);
    let mut hasher = ContentHasher::new(extra_digests);
    let mut buf = vec![0u8; HASH_BUFFER];
    loop {
        checkpoint.check()?;
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::{Cursor, Write};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn settings() -> ExtractSettings {
        let job = ScanJob::from_config(&Config::minimal().scan, vec![], PathBuf::from("o"));
        ExtractSettings::from_job(&job)
    }

    /// Every batch of one file, ordered by identity.
    fn process(entry: &FileEntry, settings: &ExtractSettings, stop: &StopSignal) -> Vec<Document> {
        let mut docs = Vec::new();
        process_file(entry, settings, stop, &mut |batch| docs.extend(batch));
        docs.sort_by(|a, b| a.path.cmp(&b.path));
        docs
    }

    fn file_entry(dir: &Path, name: &str) -> FileEntry {
        let abs_path = dir.join(name);
        let meta = std::fs::metadata(&abs_path).unwrap();
        FileEntry {
            abs_path,
            path: name.to_string(),
            size: meta.len(),
            mtime_ns: 1_000,
            ctime: 0,
            mode: 0o644,
            symlink_target: None,
            mime: detect::mime_from_name(name),
        }
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, data) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(data).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn text_file_is_extracted() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "hello text").unwrap();
        let docs = process(&file_entry(tmp.path(), "a.txt"), &settings(), &StopSignal::new());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status, ExtractionStatus::Ok);
        assert_eq!(docs[0].text.as_deref(), Some("hello text"));
        assert_eq!(docs[0].origin, "a.txt");
        assert!(docs[0].content_hash.is_some());
    }

    #[test]
    fn oversized_file_keeps_hash_but_no_text() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("big.txt"), "x".repeat(100)).unwrap();
        let mut s = settings();
        s.max_content_bytes = 10;
        let docs = process(&file_entry(tmp.path(), "big.txt"), &s, &StopSignal::new());
        assert_eq!(
            docs[0].status,
            ExtractionStatus::Skipped(REASON_OVERSIZED.to_string())
        );
        assert!(docs[0].text.is_none());
        assert_eq!(
            docs[0].content_hash.as_deref(),
            Some(digest_bytes("x".repeat(100).as_bytes(), false).sha256.as_str())
        );
    }

    #[test]
    fn zip_container_yields_container_and_entries() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("b.zip"),
            zip_bytes(&[("inner.txt", b"0123456789")]),
        )
        .unwrap();
        let docs = process(&file_entry(tmp.path(), "b.zip"), &settings(), &StopSignal::new());
        let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["b.zip", "b.zip!inner.txt"]);
        assert_eq!(docs[0].kind, DocumentKind::Container);
        assert_eq!(docs[1].parent.as_deref(), Some("b.zip"));
        assert_eq!(docs[1].origin, "b.zip");
        assert_eq!(docs[1].depth, 1);
        assert_eq!(docs[1].text.as_deref(), Some("0123456789"));
        assert!(docs.iter().all(|d| d.status == ExtractionStatus::Ok));
    }

    #[test]
    fn nested_containers_follow_policy() {
        let tmp = TempDir::new().unwrap();
        let inner = zip_bytes(&[("deep.txt", b"deep")]);
        std::fs::write(
            tmp.path().join("outer.zip"),
            zip_bytes(&[("inner.zip", &inner), ("top.txt", b"top")]),
        )
        .unwrap();
        let entry = file_entry(tmp.path(), "outer.zip");

        let recursive = process(&entry, &settings(), &StopSignal::new());
        let paths: Vec<&str> = recursive.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "outer.zip",
                "outer.zip!inner.zip",
                "outer.zip!inner.zip!deep.txt",
                "outer.zip!top.txt"
            ]
        );
        assert_eq!(recursive[2].depth, 2);
        assert_eq!(recursive[2].parent.as_deref(), Some("outer.zip!inner.zip"));

        let mut shallow_settings = settings();
        shallow_settings.archive_policy = ArchivePolicy::Shallow;
        let shallow = process(&entry, &shallow_settings, &StopSignal::new());
        let shallow_paths: Vec<&str> = shallow.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(shallow_paths, vec!["outer.zip", "outer.zip!inner.zip", "outer.zip!top.txt"]);
        assert_eq!(shallow[1].kind, DocumentKind::Regular);
    }

    #[test]
    fn corrupt_zip_is_partial_not_fatal() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bad.zip"), b"PK\x03\x04 garbage").unwrap();
        let docs = process(&file_entry(tmp.path(), "bad.zip"), &settings(), &StopSignal::new());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status.as_str(), "partial");
    }

    #[test]
    fn stopped_run_marks_cancelled() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "text").unwrap();
        let stop = StopSignal::new();
        stop.stop();
        let docs = process(&file_entry(tmp.path(), "a.txt"), &settings(), &stop);
        assert!(docs[0].status.is_cancelled());
    }

    #[test]
    fn missing_file_fails_alone() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("gone.txt"), "x").unwrap();
        let entry = file_entry(tmp.path(), "gone.txt");
        std::fs::remove_file(tmp.path().join("gone.txt")).unwrap();
        let docs = process(&entry, &settings(), &StopSignal::new());
        assert_eq!(docs[0].status.as_str(), "failed");
    }

    #[test]
    fn extra_digests_land_in_metadata() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "abc").unwrap();
        let mut s = settings();
        s.extra_digests = true;
        let docs = process(&file_entry(tmp.path(), "a.txt"), &s, &StopSignal::new());
        let meta: Value = serde_json::from_str(&docs[0].metadata_json).unwrap();
        assert_eq!(meta["digests"]["md5"], "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(meta["mode"], "644");
    }

    #[test]
    fn entry_names_with_separator_keep_their_parent() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.zip"), zip_bytes(&[("x!y.txt", b"bang")])).unwrap();
        let docs = process(&file_entry(tmp.path(), "b.zip"), &settings(), &StopSignal::new());
        assert_eq!(docs[1].path, "b.zip!x!y.txt");
        assert_eq!(docs[1].parent.as_deref(), Some("b.zip"));
    }

    #[test]
    fn expired_timeout_fails_the_item() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "slow text").unwrap();
        let mut s = settings();
        s.timeout = Duration::ZERO;
        let docs = process(&file_entry(tmp.path(), "a.txt"), &s, &StopSignal::new());
        assert_eq!(docs[0].status, ExtractionStatus::Failed("timeout".to_string()));
        assert!(docs[0].text.is_none());
        assert!(!docs[0].status.is_cancelled());
    }

    #[test]
    fn large_containers_are_emitted_in_batches() {
        let tmp = TempDir::new().unwrap();
        let names: Vec<String> = (0..300).map(|i| format!("e{:03}.txt", i)).collect();
        let entries: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"entry"[..])).collect();
        std::fs::write(tmp.path().join("many.zip"), zip_bytes(&entries)).unwrap();

        let mut batches: Vec<Vec<Document>> = Vec::new();
        process_file(
            &file_entry(tmp.path(), "many.zip"),
            &settings(),
            &StopSignal::new(),
            &mut |batch| batches.push(batch),
        );
        assert!(batches.len() >= 2);
        assert!(batches.iter().all(|b| b.len() <= FLUSH_DOCUMENTS));
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 301);
        let last = batches.last().unwrap().last().unwrap();
        assert_eq!(last.path, "many.zip");
        assert_eq!(last.kind, DocumentKind::Container);
        assert_eq!(last.status, ExtractionStatus::Ok);
    }

    #[test]
    fn file_budget_bounds_nested_expansion() {
        let tmp = TempDir::new().unwrap();
        let inner = zip_bytes(&[("1.txt", b"1"), ("2.txt", b"2"), ("3.txt", b"3"), ("4.txt", b"4")]);
        std::fs::write(
            tmp.path().join("outer.zip"),
            zip_bytes(&[("inner.zip", &inner), ("top.txt", b"top")]),
        )
        .unwrap();
        let mut s = settings();
        s.max_file_documents = 3;
        let docs = process(&file_entry(tmp.path(), "outer.zip"), &s, &StopSignal::new());
        let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "outer.zip",
                "outer.zip!inner.zip",
                "outer.zip!inner.zip!1.txt",
                "outer.zip!inner.zip!2.txt"
            ]
        );
        assert_eq!(docs[0].status.as_str(), "partial");
        assert_eq!(docs[1].status.as_str(), "partial");
    }
}
