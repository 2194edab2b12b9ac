//! Archive expansion.
//!
//! Streams the entries of a zip, tar or tar.gz container to a visitor, one
//! entry at a time. Each entry's bytes are read only when the entry fits
//! under the content cutoff; larger entries are reported as oversized with
//! no bytes. A corrupt or truncated container stops the stream at the first
//! failure and the error is returned alongside the count of entries already
//! delivered, so callers can keep them and flag the container as partial.
//!
//! Nesting is driven by the caller: it decides from the entry's depth and
//! its [`ArchivePolicy`](crate::config::ArchivePolicy) whether to call
//! [`expand_bytes`] again on a nested container. Every expansion made for
//! one file on disk draws from the same [`ExpansionBudget`], so nesting
//! cannot multiply the per-container limits.

use std::cell::Cell;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::cancel::Checkpoint;
use crate::detect::ContainerKind;
use crate::extract::ExtractError;
use crate::models::virtual_path;

/// One file inside a container, consumed once by the extractor.
#[derive(Debug)]
pub struct ArchiveEntry {
    /// Path inside the container.
    pub name: String,
    /// Identity: `<container>!<name>`.
    pub path: String,
    /// Identity of the enclosing container.
    pub container: String,
    pub size: u64,
    pub mtime_ns: i64,
    /// Depth of this entry: 1 for entries of a container on disk.
    pub depth: u32,
    /// Larger than the content cutoff; `data` is not read.
    pub oversized: bool,
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("cannot open container: {0}")]
    Open(String),
    #[error("zip error: {0}")]
    Zip(String),
    #[error("tar error: {0}")]
    Tar(String),
    #[error("entry budget of {0} exhausted")]
    EntryBudget(usize),
    #[error("expansion budget of {0} documents exhausted")]
    DocumentBudget(usize),
    #[error("expansion budget of {0} decompressed bytes exhausted")]
    ByteBudget(u64),
    #[error(transparent)]
    Interrupted(#[from] ExtractError),
}

/// Decompressed bytes and entries allowed for everything expanded from one
/// file on disk, across all nesting levels.
#[derive(Debug)]
pub struct ExpansionBudget {
    max_bytes: u64,
    max_documents: usize,
    bytes_left: Cell<u64>,
    documents_left: Cell<usize>,
}

impl ExpansionBudget {
    pub fn new(max_bytes: u64, max_documents: usize) -> Self {
        Self {
            max_bytes,
            max_documents,
            bytes_left: Cell::new(max_bytes),
            documents_left: Cell::new(max_documents),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(u64::MAX, usize::MAX)
    }

    pub fn bytes_used(&self) -> u64 {
        self.max_bytes - self.bytes_left.get()
    }

    pub fn documents_used(&self) -> usize {
        self.max_documents - self.documents_left.get()
    }

    fn take_document(&self) -> Result<(), ArchiveError> {
        match self.documents_left.get().checked_sub(1) {
            Some(left) => {
                self.documents_left.set(left);
                Ok(())
            }
            None => Err(ArchiveError::DocumentBudget(self.max_documents)),
        }
    }

    fn fits(&self, bytes: u64) -> Result<(), ArchiveError> {
        if bytes > self.bytes_left.get() {
            return Err(ArchiveError::ByteBudget(self.max_bytes));
        }
        Ok(())
    }

    fn take_bytes(&self, bytes: u64) -> Result<(), ArchiveError> {
        self.fits(bytes)?;
        self.bytes_left.set(self.bytes_left.get() - bytes);
        Ok(())
    }
}

/// Limits for one expansion call.
#[derive(Debug, Clone, Copy)]
pub struct ExpandLimits<'a> {
    pub max_content_bytes: u64,
    /// Entries this container may deliver.
    pub max_entries: usize,
    /// Shared with every other container expanded for the same file.
    pub budget: &'a ExpansionBudget,
}

/// What an expansion delivered.
#[derive(Debug, Default)]
pub struct Expansion {
    pub entries: usize,
    pub duplicates: usize,
    /// Set when the stream stopped early; delivered entries remain valid.
    pub error: Option<ArchiveError>,
}

impl Expansion {
    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}

struct Expander<'a> {
    container: &'a str,
    depth: u32,
    mtime_ns: i64,
    limits: ExpandLimits<'a>,
    checkpoint: &'a Checkpoint,
    seen: HashSet<String>,
    outcome: Expansion,
    visit: &'a mut dyn FnMut(ArchiveEntry),
}

/// Expand a container on disk. `depth` is the container's own depth (0 on disk).
pub fn expand_file(
    path: &Path,
    kind: ContainerKind,
    container: &str,
    depth: u32,
    mtime_ns: i64,
    limits: ExpandLimits<'_>,
    checkpoint: &Checkpoint,
    visit: &mut dyn FnMut(ArchiveEntry),
) -> Expansion {
    let mut expander = Expander::new(container, depth, mtime_ns, limits, checkpoint, visit);
    let result = match File::open(path) {
        Ok(file) => expander.run(kind, BufReader::new(file)),
        Err(e) => Err(ArchiveError::Open(e.to_string())),
    };
    expander.finish(result)
}

/// Expand a container held in memory (an entry of another container).
pub fn expand_bytes(
    data: Vec<u8>,
    kind: ContainerKind,
    container: &str,
    depth: u32,
    mtime_ns: i64,
    limits: ExpandLimits<'_>,
    checkpoint: &Checkpoint,
    visit: &mut dyn FnMut(ArchiveEntry),
) -> Expansion {
    let mut expander = Expander::new(container, depth, mtime_ns, limits, checkpoint, visit);
    let result = expander.run(kind, Cursor::new(data));
    expander.finish(result)
}

impl<'a> Expander<'a> {
    fn new(
        container: &'a str,
        depth: u32,
        mtime_ns: i64,
        limits: ExpandLimits<'a>,
        checkpoint: &'a Checkpoint,
        visit: &'a mut dyn FnMut(ArchiveEntry),
    ) -> Self {
        Self {
            container,
            depth,
            mtime_ns,
            limits,
            checkpoint,
            seen: HashSet::new(),
            outcome: Expansion::default(),
            visit,
        }
    }

    fn finish(mut self, result: Result<(), ArchiveError>) -> Expansion {
        self.outcome.error = result.err();
        self.outcome
    }

    fn run<R: Read + Seek>(&mut self, kind: ContainerKind, reader: R) -> Result<(), ArchiveError> {
        match kind {
            ContainerKind::Zip => self.expand_zip(reader)?,
            ContainerKind::Tar => self.expand_tar(reader)?,
            ContainerKind::TarGz => self.expand_tar(flate2::read::GzDecoder::new(reader))?,
        }
        // The visitor may have been cancelled while handling the last entry.
        self.checkpoint.check()?;
        Ok(())
    }

    fn expand_zip<R: Read + Seek>(&mut self, reader: R) -> Result<(), ArchiveError> {
        let mut archive =
            zip::ZipArchive::new(reader).map_err(|e| ArchiveError::Zip(e.to_string()))?;
        for i in 0..archive.len() {
            self.checkpoint.check()?;
            let file = archive
                .by_index(i)
                .map_err(|e| ArchiveError::Zip(e.to_string()))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let size = file.size();
            let mtime_ns = self.mtime_ns;
            self.deliver(name, size, mtime_ns, file, ArchiveError::Zip)?;
        }
        Ok(())
    }

    fn expand_tar<R: Read>(&mut self, reader: R) -> Result<(), ArchiveError> {
        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| ArchiveError::Tar(e.to_string()))?;
        for entry in entries {
            self.checkpoint.check()?;
            let entry = entry.map_err(|e| ArchiveError::Tar(e.to_string()))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .map_err(|e| ArchiveError::Tar(e.to_string()))?
                .to_string_lossy()
                .to_string();
            let size = entry.size();
            let mtime_ns = entry
                .header()
                .mtime()
                .map(|secs| (secs as i64).saturating_mul(1_000_000_000))
                .unwrap_or(self.mtime_ns);
            self.deliver(name, size, mtime_ns, entry, ArchiveError::Tar)?;
        }
        Ok(())
    }

    /// Read (or skip) one entry's bytes and hand the entry to the visitor.
    fn deliver<R: Read>(
        &mut self,
        name: String,
        size: u64,
        mtime_ns: i64,
        reader: R,
        wrap: fn(String) -> ArchiveError,
    ) -> Result<(), ArchiveError> {
        if !self.seen.insert(name.clone()) {
            tracing::warn!(container = self.container, entry = %name, "duplicate archive entry dropped");
            self.outcome.duplicates += 1;
            return Ok(());
        }
        if self.outcome.entries >= self.limits.max_entries {
            return Err(ArchiveError::EntryBudget(self.limits.max_entries));
        }
        let budget = self.limits.budget;
        budget.take_document()?;

        let cutoff = self.limits.max_content_bytes;
        let mut data = None;
        let mut oversized = size > cutoff;
        if !oversized {
            budget.fits(size)?;
            // Declared sizes can lie; never read past the cutoff.
            let mut buf = Vec::with_capacity(size as usize);
            reader
                .take(cutoff + 1)
                .read_to_end(&mut buf)
                .map_err(|e| wrap(format!("{}: {}", name, e)))?;
            budget.take_bytes(buf.len() as u64)?;
            if buf.len() as u64 > cutoff {
                oversized = true;
            } else if (buf.len() as u64) < size {
                return Err(wrap(format!("{}: truncated entry", name)));
            } else {
                data = Some(buf);
            }
        }
        self.checkpoint.check()?;

        let entry = ArchiveEntry {
            path: virtual_path(self.container, &name),
            container: self.container.to_string(),
            name,
            size,
            mtime_ns,
            depth: self.depth + 1,
            oversized,
            data,
        };
        self.outcome.entries += 1;
        (self.visit)(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn limits(budget: &ExpansionBudget) -> ExpandLimits<'_> {
        ExpandLimits {
            max_content_bytes: 1024,
            max_entries: 100,
            budget,
        }
    }

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
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

    fn tar_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_700_000_000);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn collect(data: Vec<u8>, kind: ContainerKind, limits: ExpandLimits<'_>) -> (Vec<ArchiveEntry>, Expansion) {
        let mut entries = Vec::new();
        let outcome = expand_bytes(
            data,
            kind,
            "c.bin",
            0,
            7,
            limits,
            &Checkpoint::unbounded(),
            &mut |e| entries.push(e),
        );
        (entries, outcome)
    }

    #[test]
    fn zip_entries_are_streamed_with_virtual_paths() {
        let data = zip_with(&[("inner.txt", b"0123456789"), ("dir/b.md", b"# b")]);
        let (entries, outcome) = collect(data, ContainerKind::Zip, limits(&ExpansionBudget::unlimited()));
        assert!(!outcome.is_partial());
        assert_eq!(outcome.entries, 2);
        assert_eq!(entries[0].path, "c.bin!inner.txt");
        assert_eq!(entries[0].size, 10);
        assert_eq!(entries[0].depth, 1);
        assert_eq!(entries[0].mtime_ns, 7);
        assert_eq!(entries[0].data.as_deref(), Some(&b"0123456789"[..]));
        assert_eq!(entries[1].path, "c.bin!dir/b.md");
    }

    #[test]
    fn oversized_entries_are_flagged_without_bytes() {
        let big = vec![b'x'; 2048];
        let data = zip_with(&[("big.txt", &big), ("small.txt", b"ok")]);
        let (entries, outcome) = collect(data, ContainerKind::Zip, limits(&ExpansionBudget::unlimited()));
        assert_eq!(outcome.entries, 2);
        assert!(entries[0].oversized);
        assert!(entries[0].data.is_none());
        assert!(!entries[1].oversized);
    }

    #[test]
    fn tar_and_tar_gz_entries() {
        let data = tar_with(&[("a.txt", b"alpha"), ("b/c.txt", b"gamma")]);
        let (entries, outcome) = collect(data.clone(), ContainerKind::Tar, limits(&ExpansionBudget::unlimited()));
        assert!(!outcome.is_partial());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].path, "c.bin!b/c.txt");
        assert_eq!(entries[0].mtime_ns, 1_700_000_000 * 1_000_000_000);

        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(&data).unwrap();
        let (entries, outcome) = collect(gz.finish().unwrap(), ContainerKind::TarGz, limits(&ExpansionBudget::unlimited()));
        assert!(!outcome.is_partial());
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn truncated_tar_keeps_parsed_prefix() {
        let mut data = tar_with(&[("a.txt", b"alpha"), ("b.txt", &[b'b'; 900])]);
        // Cut inside the second entry's data block.
        data.truncate(512 + 512 + 512 + 100);
        let (entries, outcome) = collect(data, ContainerKind::Tar, limits(&ExpansionBudget::unlimited()));
        assert!(outcome.is_partial());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
    }

    #[test]
    fn garbage_zip_is_partial_with_no_entries() {
        let (entries, outcome) = collect(
            b"definitely not a zip".to_vec(),
            ContainerKind::Zip,
            limits(&ExpansionBudget::unlimited()),
        );
        assert!(entries.is_empty());
        assert!(matches!(outcome.error, Some(ArchiveError::Zip(_))));
    }

    #[test]
    fn entry_budget_stops_expansion() {
        let data = zip_with(&[("1", b"a"), ("2", b"b"), ("3", b"c")]);
        let budget = ExpansionBudget::unlimited();
        let limits = ExpandLimits {
            max_content_bytes: 1024,
            max_entries: 2,
            budget: &budget,
        };
        let (entries, outcome) = collect(data, ContainerKind::Zip, limits);
        assert_eq!(entries.len(), 2);
        assert!(matches!(outcome.error, Some(ArchiveError::EntryBudget(2))));
    }

    #[test]
    fn duplicate_names_keep_first() {
        let data = tar_with(&[("a.txt", b"first"), ("a.txt", b"second")]);
        let (entries, outcome) = collect(data, ContainerKind::Tar, limits(&ExpansionBudget::unlimited()));
        assert_eq!(entries.len(), 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(entries[0].data.as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn stop_signal_interrupts_expansion() {
        let stop = crate::cancel::StopSignal::new();
        stop.stop();
        let mut seen = 0;
        let outcome = expand_bytes(
            zip_with(&[("a", b"a")]),
            ContainerKind::Zip,
            "c.zip",
            0,
            0,
            limits(&ExpansionBudget::unlimited()),
            &Checkpoint::stop_only(stop),
            &mut |_| seen += 1,
        );
        assert_eq!(seen, 0);
        assert!(matches!(
            outcome.error,
            Some(ArchiveError::Interrupted(ExtractError::Cancelled))
        ));
    }

    #[test]
    fn expand_file_reports_missing_container() {
        let outcome = expand_file(
            Path::new("/no/such/archive.zip"),
            ContainerKind::Zip,
            "archive.zip",
            0,
            0,
            limits(&ExpansionBudget::unlimited()),
            &Checkpoint::unbounded(),
            &mut |_| {},
        );
        assert!(matches!(outcome.error, Some(ArchiveError::Open(_))));
    }

    #[test]
    fn stop_during_last_entry_interrupts_container() {
        let stop = crate::cancel::StopSignal::new();
        let visitor_stop = stop.clone();
        let mut seen = Vec::new();
        let outcome = expand_bytes(
            tar_with(&[("only.png", b"pixels")]),
            ContainerKind::Tar,
            "pics.tar",
            0,
            0,
            limits(&ExpansionBudget::unlimited()),
            &Checkpoint::stop_only(stop),
            &mut |e| {
                seen.push(e.name);
                visitor_stop.stop();
            },
        );
        assert_eq!(seen, vec!["only.png"]);
        assert!(matches!(
            outcome.error,
            Some(ArchiveError::Interrupted(ExtractError::Cancelled))
        ));
    }

    #[test]
    fn entries_carry_their_container_identity() {
        let data = zip_with(&[("x!y.txt", b"bang")]);
        let (entries, _) = collect(data, ContainerKind::Zip, limits(&ExpansionBudget::unlimited()));
        assert_eq!(entries[0].path, "c.bin!x!y.txt");
        assert_eq!(entries[0].container, "c.bin");
    }

    #[test]
    fn shared_budget_caps_documents_across_calls() {
        let budget = ExpansionBudget::new(u64::MAX, 3);
        let data = zip_with(&[("1", b"a"), ("2", b"b")]);
        let (first, outcome) = collect(data.clone(), ContainerKind::Zip, limits(&budget));
        assert_eq!(first.len(), 2);
        assert!(!outcome.is_partial());

        let (second, outcome) = collect(data, ContainerKind::Zip, limits(&budget));
        assert_eq!(second.len(), 1);
        assert!(matches!(outcome.error, Some(ArchiveError::DocumentBudget(3))));
        assert_eq!(budget.documents_used(), 3);
    }

    #[test]
    fn shared_budget_caps_decompressed_bytes() {
        let budget = ExpansionBudget::new(100, usize::MAX);
        let data = zip_with(&[("a", &[b'a'; 60]), ("b", &[b'b'; 60]), ("c", &[b'c'; 10])]);
        let (entries, outcome) = collect(data, ContainerKind::Zip, limits(&budget));
        assert_eq!(entries.len(), 1);
        assert!(matches!(outcome.error, Some(ArchiveError::ByteBudget(100))));
        assert_eq!(budget.bytes_used(), 60);
    }
}
