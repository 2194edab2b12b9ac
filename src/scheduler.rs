//! Bounded-concurrency scan scheduler.
//!
//! The walker runs on a blocking thread and feeds a bounded channel. The
//! orchestrator loop classifies each file against the prior artifact;
//! unchanged files are carried forward without taking a slot, everything
//! else waits for one of N semaphore permits and is processed on a blocking
//! thread that holds the permit until extraction returns. Document batches
//! go to the writer from that thread as they are produced.
//!
//! Setting the run's [`StopSignal`] switches to drain-and-stop: the walk and
//! the orchestrator stop taking work, in-flight tasks run to their next
//! checkpoint and still deliver their documents.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

use crate::cancel::StopSignal;
use crate::config::ScanJob;
use crate::detect;
use crate::differ::{Change, PriorIndex};
use crate::models::{Document, DocumentKind, ExtractionStatus, FileEntry};
use crate::process::{process_file, ExtractSettings};
use crate::progress::{ScanProgressEvent, ScanProgressReporter};
use crate::walker::Walker;
use crate::writer::WriterMessage;

/// Walker entries buffered ahead of the orchestrator.
const WALK_QUEUE: usize = 1024;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

pub const REASON_PANICKED: &str = "worker panicked";

/// Per-run state shared by the orchestrator and every task.
#[derive(Debug, Default)]
pub struct ScanContext {
    pub stop: StopSignal,
    pending: AtomicUsize,
    discovered: AtomicU64,
    extracted: AtomicU64,
    documents: AtomicU64,
    ok: AtomicU64,
    partial: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    unchanged: AtomicU64,
    modified: AtomicU64,
    new: AtomicU64,
}

/// Point-in-time copy of a run's counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ScanCounts {
    pub discovered: u64,
    /// Files handed to extraction (unchanged files are not).
    pub extracted: u64,
    /// Documents produced by extraction, archive entries included.
    pub documents: u64,
    pub ok: u64,
    pub partial: u64,
    pub skipped: u64,
    pub failed: u64,
    pub unchanged: u64,
    pub modified: u64,
    pub new: u64,
}

impl ScanContext {
    pub fn new(stop: StopSignal) -> Self {
        Self {
            stop,
            ..Self::default()
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> ScanCounts {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ScanCounts {
            discovered: get(&self.discovered),
            extracted: get(&self.extracted),
            documents: get(&self.documents),
            ok: get(&self.ok),
            partial: get(&self.partial),
            skipped: get(&self.skipped),
            failed: get(&self.failed),
            unchanged: get(&self.unchanged),
            modified: get(&self.modified),
            new: get(&self.new),
        }
    }

    fn record(&self, docs: &[Document]) {
        self.documents.fetch_add(docs.len() as u64, Ordering::Relaxed);
        for doc in docs {
            let counter = match doc.status {
                ExtractionStatus::Ok => &self.ok,
                ExtractionStatus::Partial(_) => &self.partial,
                ExtractionStatus::Skipped(_) => &self.skipped,
                ExtractionStatus::Failed(_) => &self.failed,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Decrements the pending count however the task ends.
struct PendingGuard(Arc<ScanContext>);

impl PendingGuard {
    fn new(ctx: Arc<ScanContext>) -> Self {
        ctx.pending.fetch_add(1, Ordering::SeqCst);
        Self(ctx)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// How the walk ended.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOutcome {
    pub walk_errors: usize,
    /// Prior top-level paths not seen; zero when the walk was interrupted.
    pub deleted: usize,
    /// The run stopped before the walk finished.
    pub interrupted: bool,
}

/// Drive one scan to completion: every task has resolved when this returns.
pub async fn run(
    job: &ScanJob,
    mut prior: PriorIndex,
    ctx: Arc<ScanContext>,
    writer_tx: mpsc::Sender<WriterMessage>,
    reporter: &dyn ScanProgressReporter,
) -> Result<WalkOutcome> {
    let walker = Walker::new(job)?;
    let root = job.root_name();
    let (entry_tx, mut entry_rx) = mpsc::channel::<FileEntry>(WALK_QUEUE);

    let walk_stop = ctx.stop.clone();
    let walk = tokio::task::spawn_blocking(move || {
        let mut walker = walker;
        for entry in walker.by_ref() {
            if walk_stop.is_stopped() || entry_tx.blocking_send(entry).is_err() {
                break;
            }
        }
        walker.errors()
    });

    let semaphore = Arc::new(Semaphore::new(job.concurrency));
    let settings = Arc::new(ExtractSettings::from_job(job));
    let mut tasks = JoinSet::new();
    let mut last_report = Instant::now();

    while let Some(entry) = entry_rx.recv().await {
        if ctx.stop.is_stopped() {
            break;
        }
        ctx.discovered.fetch_add(1, Ordering::Relaxed);

        let change = prior.classify(&entry);
        tracing::debug!(path = %entry.path, change = change.as_str(), "classified");
        if change == Change::Unchanged {
            ctx.unchanged.fetch_add(1, Ordering::Relaxed);
            if writer_tx
                .send(WriterMessage::CarryForward(entry.path))
                .await
                .is_err()
            {
                ctx.stop.stop();
                break;
            }
            continue;
        }

        let permit = semaphore.clone().acquire_owned().await?;
        if ctx.stop.is_stopped() {
            break;
        }
        let task_settings = settings.clone();
        let task_stop = ctx.stop.clone();
        tasks.spawn(run_task(
            entry,
            move |entry, emit| process_file(entry, &task_settings, &task_stop, emit),
            PendingGuard::new(ctx.clone()),
            writer_tx.clone(),
            permit,
        ));
        match change {
            Change::Modified => ctx.modified.fetch_add(1, Ordering::Relaxed),
            _ => ctx.new.fetch_add(1, Ordering::Relaxed),
        };
        while tasks.try_join_next().is_some() {}

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            report_scanning(reporter, &root, &ctx);
            last_report = Instant::now();
        }
    }
    drop(entry_rx);
    drop(writer_tx);

    let walk_errors = walk.await?;
    let interrupted = ctx.stop.is_stopped();
    if interrupted {
        tracing::warn!(pending = ctx.pending(), "scan stopped; draining in-flight tasks");
    }
    reporter.report(ScanProgressEvent::Draining {
        root: root.clone(),
        pending: ctx.pending() as u64,
    });
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "scan task aborted");
        }
    }
    report_scanning(reporter, &root, &ctx);

    Ok(WalkOutcome {
        walk_errors,
        deleted: if interrupted { 0 } else { prior.unseen() },
        interrupted,
    })
}

/// Run `work` for one file on a blocking thread, holding `permit` until it returns.
async fn run_task<F>(
    entry: FileEntry,
    work: F,
    guard: PendingGuard,
    writer_tx: mpsc::Sender<WriterMessage>,
    permit: OwnedSemaphorePermit,
) where
    F: FnOnce(&FileEntry, &mut dyn FnMut(Vec<Document>)) + Send + 'static,
{
    let ctx = guard.0.clone();
    let fallback = entry.clone();
    let worker_ctx = ctx.clone();
    let worker_tx = writer_tx.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        work(&entry, &mut |docs| {
            for doc in &docs {
                tracing::debug!(path = %doc.path, status = %doc.status, "extracted");
            }
            worker_ctx.record(&docs);
            if worker_tx.blocking_send(WriterMessage::Documents(docs)).is_err() {
                worker_ctx.stop.stop();
            }
        })
    });

    let joined = handle.await;
    ctx.extracted.fetch_add(1, Ordering::Relaxed);
    if let Some(doc) = panic_fallback(joined, &fallback) {
        ctx.record(std::slice::from_ref(&doc));
        if writer_tx.send(WriterMessage::Documents(vec![doc])).await.is_err() {
            ctx.stop.stop();
        }
    }
    drop(guard);
}

/// A failed document standing in for a file whose worker panicked.
fn panic_fallback(joined: Result<(), JoinError>, entry: &FileEntry) -> Option<Document> {
    let err = joined.err()?;
    tracing::error!(path = %entry.path, error = %err, "extraction worker panicked");
    Some(panicked_document(entry))
}

fn panicked_document(entry: &FileEntry) -> Document {
    Document {
        path: entry.path.clone(),
        origin: entry.path.clone(),
        parent: None,
        depth: 0,
        kind: DocumentKind::Regular,
        size: entry.size,
        mtime_ns: entry.mtime_ns,
        content_hash: None,
        mime: detect::mime_from_name(&entry.path),
        status: ExtractionStatus::Failed(REASON_PANICKED.to_string()),
        text: None,
        metadata_json: "{}".to_string(),
        thumbnail: None,
    }
}

fn report_scanning(reporter: &dyn ScanProgressReporter, root: &str, ctx: &ScanContext) {
    let counts = ctx.counts();
    reporter.report(ScanProgressEvent::Scanning {
        root: root.to_string(),
        discovered: counts.discovered,
        processed: counts.extracted + counts.unchanged,
        documents: counts.documents,
    });
}
