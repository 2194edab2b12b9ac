//! Scan orchestration.
//!
//! Coordinates one run end to end: load the prior artifact (incremental
//! mode), open the writer, drive the scheduler, then seal. A failure before
//! the seal discards the partial artifact; the output path only ever holds
//! a sealed artifact.

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::cancel::StopSignal;
use crate::config::{ArchivePolicy, ScanJob};
use crate::differ::PriorIndex;
use crate::host::HostInfo;
use crate::progress::{ProgressMode, ScanProgressReporter};
use crate::scheduler::{self, ScanContext, ScanCounts, WalkOutcome};
use crate::writer::{run_writer, IndexWriter, WriterMessage, WriterStats};

/// Messages buffered between tasks and the writer.
const WRITER_QUEUE: usize = 256;

/// Result of a sealed run.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub run_id: String,
    pub output: PathBuf,
    pub counts: ScanCounts,
    pub walk: WalkOutcome,
    pub stored: WriterStats,
}

impl ScanReport {
    /// Documents in the sealed artifact.
    pub fn documents(&self) -> usize {
        self.stored.written + self.stored.carried
    }
}

/// Run a scan and seal its artifact.
///
/// Setting `stop` (from any thread) drains the run; whatever completed is
/// still sealed.
pub async fn run_scan(
    job: &ScanJob,
    stop: StopSignal,
    reporter: &dyn ScanProgressReporter,
) -> Result<ScanReport> {
    job.validate()?;

    let prior = match &job.prior {
        Some(path) => {
            let artifact = Artifact::open_sealed(path)
                .await
                .context("cannot use prior artifact for incremental scan")?;
            let index = PriorIndex::load(&artifact).await?;
            artifact.close().await;
            tracing::info!(prior = %path.display(), documents = index.len(), "loaded prior artifact");
            index
        }
        None => PriorIndex::empty(),
    };

    let run_id = Uuid::new_v4().to_string();
    let metadata = run_metadata(job, &run_id)?;
    let writer = IndexWriter::create(&job.output, job.prior.as_deref(), &metadata).await?;
    tracing::info!(run_id = %run_id, output = %job.output.display(), "scan started");

    let (tx, rx) = mpsc::channel::<WriterMessage>(WRITER_QUEUE);
    let writer_task = tokio::spawn(run_writer(writer, rx));
    let ctx = Arc::new(ScanContext::new(stop));

    let walked = scheduler::run(job, prior, ctx.clone(), tx, reporter).await;
    let writer = writer_task.await??;
    let walk = match walked {
        Ok(walk) => walk,
        Err(e) => {
            writer.abort().await;
            return Err(e);
        }
    };

    let counts = ctx.counts();
    let stored = writer.stats();
    let summary = summary_metadata(&counts, &walk)?;
    let output = writer.seal(ctx.pending(), &summary).await?;
    tracing::info!(run_id = %run_id, documents = stored.written + stored.carried, "scan finished");

    Ok(ScanReport {
        run_id,
        output,
        counts,
        walk,
        stored,
    })
}

/// CLI entry point: run with Ctrl-C handling and print the summary.
pub async fn scan_command(job: &ScanJob, progress: ProgressMode) -> Result<()> {
    let stop = StopSignal::new();
    let ctrl_c_stop = stop.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight work before sealing");
            ctrl_c_stop.stop();
        }
    });

    let reporter = progress.reporter();
    let result = run_scan(job, stop, reporter.as_ref()).await;
    watcher.abort();
    let report = result?;

    println!("scan {}", job.root_name());
    println!("  documents: {}", report.documents());
    println!("  ok: {}", report.counts.ok);
    println!("  partial: {}", report.counts.partial);
    println!("  skipped: {}", report.counts.skipped);
    println!("  failed: {}", report.counts.failed);
    println!("  unchanged: {}", report.counts.unchanged);
    println!("  modified: {}", report.counts.modified);
    println!("  new: {}", report.counts.new);
    println!("  deleted: {}", report.walk.deleted);
    if report.walk.walk_errors > 0 {
        println!("  walk errors: {}", report.walk.walk_errors);
    }
    if report.stored.duplicates > 0 {
        println!("  duplicates ignored: {}", report.stored.duplicates);
    }
    if report.walk.interrupted {
        println!("  interrupted: yes");
    }
    println!("  sealed: {}", report.output.display());
    println!("ok");
    Ok(())
}

fn run_metadata(job: &ScanJob, run_id: &str) -> Result<BTreeMap<String, String>> {
    let roots: Vec<String> = job
        .roots
        .iter()
        .map(|r| {
            std::fs::canonicalize(r)
                .unwrap_or_else(|_| r.clone())
                .display()
                .to_string()
        })
        .collect();
    let (archives, max_depth) = match job.archive_policy {
        ArchivePolicy::Shallow => ("shallow", None),
        ArchivePolicy::Recursive { max_depth } => ("recursive", Some(max_depth)),
    };
    let settings = json!({
        "concurrency": job.concurrency,
        "max_content_bytes": job.max_content_bytes,
        "archives": archives,
        "max_archive_depth": max_depth,
        "max_archive_entries": job.max_archive_entries,
        "max_expanded_bytes": job.max_expanded_bytes,
        "max_file_documents": job.max_file_documents,
        "thumbnail_quality": job.thumbnail_quality,
        "timeout_secs": job.timeout.as_secs(),
        "follow_symlinks": job.follow_symlinks,
        "include_hidden": job.include_hidden,
        "include_globs": job.include_globs,
        "exclude_globs": job.exclude_globs,
        "extra_digests": job.extra_digests,
    });

    let mut meta = BTreeMap::new();
    meta.insert("run_id".to_string(), run_id.to_string());
    meta.insert("root_name".to_string(), job.root_name());
    meta.insert("roots".to_string(), serde_json::to_string(&roots)?);
    if let Some(name) = &job.display_name {
        meta.insert("display_name".to_string(), name.clone());
    }
    if let Some(prefix) = &job.url_prefix {
        meta.insert("url_prefix".to_string(), prefix.clone());
    }
    if let Some(prior) = &job.prior {
        meta.insert("prior".to_string(), prior.display().to_string());
    }
    meta.insert("started_at".to_string(), chrono::Utc::now().to_rfc3339());
    meta.insert("tool_version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    meta.insert("host".to_string(), serde_json::to_string(&HostInfo::detect())?);
    meta.insert("settings".to_string(), settings.to_string());
    Ok(meta)
}

fn summary_metadata(counts: &ScanCounts, walk: &WalkOutcome) -> Result<BTreeMap<String, String>> {
    let mut summary = BTreeMap::new();
    summary.insert("finished_at".to_string(), chrono::Utc::now().to_rfc3339());
    summary.insert("counts".to_string(), serde_json::to_string(counts)?);
    summary.insert("deleted".to_string(), walk.deleted.to_string());
    summary.insert("walk_errors".to_string(), walk.walk_errors.to_string());
    summary.insert("interrupted".to_string(), walk.interrupted.to_string());
    Ok(summary)
}
