//! Scan progress reporting.
//!
//! Reports observable progress during `idxscan scan` so users see how much
//! has been discovered and processed. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a scan.
#[derive(Clone, Debug)]
pub enum ScanProgressEvent {
    /// Files found so far and how many have resolved to documents.
    Scanning {
        root: String,
        discovered: u64,
        processed: u64,
        documents: u64,
    },
    /// Walk finished; remaining work is draining.
    Draining { root: String, pending: u64 },
}

/// Reports scan progress. Implementations write to stderr (human or JSON).
pub trait ScanProgressReporter: Send + Sync {
    fn report(&self, event: ScanProgressEvent);
}

/// Human-friendly progress on stderr: "scan docs  1,234 / 5,000 files  (7,012 documents)".
pub struct StderrProgress;

impl ScanProgressReporter for StderrProgress {
    fn report(&self, event: ScanProgressEvent) {
        let line = match &event {
            ScanProgressEvent::Scanning {
                root,
                discovered,
                processed,
                documents,
            } => format!(
                "scan {}  {} / {} files  ({} documents)\n",
                root,
                format_number(*processed),
                format_number(*discovered),
                format_number(*documents)
            ),
            ScanProgressEvent::Draining { root, pending } => {
                format!("scan {}  draining {} tasks...\n", root, format_number(*pending))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ScanProgressReporter for JsonProgress {
    fn report(&self, event: ScanProgressEvent) {
        let obj = match &event {
            ScanProgressEvent::Scanning {
                root,
                discovered,
                processed,
                documents,
            } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "scanning",
                "discovered": discovered,
                "processed": processed,
                "documents": documents
            }),
            ScanProgressEvent::Draining { root, pending } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "draining",
                "pending": pending
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ScanProgressReporter for NoProgress {
    fn report(&self, _event: ScanProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ScanProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
