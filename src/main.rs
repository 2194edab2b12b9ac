//! # idxscan CLI
//!
//! The `idxscan` binary scans directory trees into sealed index artifacts,
//! compiles artifacts into full-text indices and inspects both.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `idxscan scan <ROOT>... --output <PATH>` | Crawl, extract and seal an artifact |
//! | `idxscan build <ARTIFACT>...` | Compile sealed artifacts into an FTS5 index |
//! | `idxscan search <INDEX> <QUERY>` | Keyword lookup in a built index |
//! | `idxscan stats <ARTIFACT>` | Print run metadata and document counts |
//!
//! ## Examples
//!
//! ```bash
//! # Full scan
//! idxscan scan ~/share --output share.idx --name "Team share" --url-prefix https://files.example/share
//!
//! # Incremental rescan, reusing everything unchanged in share.idx
//! idxscan scan ~/share --output share.idx --incremental
//!
//! # Build and query the search index
//! idxscan build share.idx
//! idxscan search share.index.sqlite "quarterly report"
//! ```
//!
//! Diagnostics go to stderr and are controlled with `RUST_LOG`
//! (default `warn`); summaries go to stdout.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use idxscan::config::{self, ArchivePolicy, ScanJob};
use idxscan::progress::ProgressMode;
use idxscan::{builder, scan, search, stats};

/// idxscan: crawl directory trees into portable, incremental index artifacts.
#[derive(Parser)]
#[command(name = "idxscan", version, about)]
struct Cli {
    /// Path to a configuration file (TOML). Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "./idxscan.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan one or more directory trees into a sealed artifact.
    ///
    /// The artifact is written to `<output>.partial` and only moved to
    /// `<output>` once every task has resolved. Ctrl-C stops taking new
    /// work, lets in-flight files finish and seals what completed.
    Scan {
        /// Directories to scan.
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        /// Artifact to write.
        #[arg(long, short)]
        output: PathBuf,

        /// Maximum files extracted at the same time.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Files (and archive entries) larger than this are recorded without content.
        #[arg(long)]
        max_content_bytes: Option<u64>,

        /// Archive expansion policy.
        #[arg(long, value_enum)]
        archives: Option<ArchivesArg>,

        /// Deepest archive nesting expanded in recursive mode.
        #[arg(long)]
        max_depth: Option<u32>,

        /// Thumbnail quality level, 0 (off) to 4.
        #[arg(long)]
        thumbnail_quality: Option<u8>,

        /// Per-file extraction timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Display name stored for the serving layer.
        #[arg(long)]
        name: Option<String>,

        /// URL prefix the serving layer maps the root to.
        #[arg(long)]
        url_prefix: Option<String>,

        /// Reuse unchanged documents from a prior sealed artifact.
        #[arg(long)]
        incremental: bool,

        /// Prior artifact for --incremental (defaults to --output).
        #[arg(long, requires = "incremental")]
        prior: Option<PathBuf>,

        /// Additional exclude glob, relative to the root (repeatable).
        #[arg(long = "exclude")]
        excludes: Vec<String>,

        /// Include dot-files and dot-directories.
        #[arg(long)]
        include_hidden: bool,

        /// Do not follow symbolic links.
        #[arg(long)]
        no_follow_symlinks: bool,

        /// Also compute SHA-1, SHA-512, MD5 and CRC32 digests.
        #[arg(long)]
        extra_digests: bool,

        /// Progress on stderr. Defaults to human on a terminal, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Compile sealed artifacts into a full-text search index.
    Build {
        #[arg(required = true)]
        artifacts: Vec<PathBuf>,

        /// Index to write (defaults to `<first artifact>.index.sqlite`).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Keyword search in a built index.
    Search {
        index: PathBuf,

        query: String,

        #[arg(long, default_value_t = 10)]
        limit: i64,
    },

    /// Show run metadata and document counts of an artifact.
    Stats { artifact: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ArchivesArg {
    Shallow,
    Recursive,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Scan {
            roots,
            output,
            concurrency,
            max_content_bytes,
            archives,
            max_depth,
            thumbnail_quality,
            timeout_secs,
            name,
            url_prefix,
            incremental,
            prior,
            excludes,
            include_hidden,
            no_follow_symlinks,
            extra_digests,
            progress,
        } => {
            let mut job = ScanJob::from_config(&cfg.scan, roots, output);
            if let Some(n) = concurrency {
                job.concurrency = n;
            }
            if let Some(bytes) = max_content_bytes {
                job.max_content_bytes = bytes;
            }
            let depth = max_depth.unwrap_or(cfg.scan.max_archive_depth);
            job.archive_policy = match archives {
                Some(ArchivesArg::Shallow) => ArchivePolicy::Shallow,
                Some(ArchivesArg::Recursive) => ArchivePolicy::Recursive { max_depth: depth },
                None => match job.archive_policy {
                    ArchivePolicy::Recursive { .. } => ArchivePolicy::Recursive { max_depth: depth },
                    shallow => shallow,
                },
            };
            if let Some(q) = thumbnail_quality {
                job.thumbnail_quality = q;
            }
            if let Some(secs) = timeout_secs {
                job.timeout = Duration::from_secs(secs);
            }
            job.display_name = name;
            job.url_prefix = url_prefix;
            job.exclude_globs.extend(excludes);
            job.include_hidden |= include_hidden;
            if no_follow_symlinks {
                job.follow_symlinks = false;
            }
            job.extra_digests |= extra_digests;

            if incremental {
                job.prior = match prior {
                    Some(path) if !path.exists() => {
                        bail!("prior artifact not found: {}", path.display())
                    }
                    Some(path) => Some(path),
                    // First incremental run: nothing to reuse yet.
                    None if job.output.exists() => Some(job.output.clone()),
                    None => {
                        tracing::info!(output = %job.output.display(), "no prior artifact; running a full scan");
                        None
                    }
                };
            }

            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            scan::scan_command(&job, mode).await?;
        }
        Commands::Build { artifacts, output } => {
            builder::build_command(&artifacts, output, cfg.build.max_tokens).await?;
        }
        Commands::Search {
            index,
            query,
            limit,
        } => {
            search::search_command(&index, &query, limit).await?;
        }
        Commands::Stats { artifact } => {
            stats::run_stats(&artifact).await?;
        }
    }

    Ok(())
}
