use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

/// How containers found during a scan are expanded.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    Shallow,
    Recursive,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: u64,
    #[serde(default = "default_archives")]
    pub archives: ArchiveMode,
    #[serde(default = "default_max_archive_depth")]
    pub max_archive_depth: u32,
    #[serde(default = "default_max_archive_entries")]
    pub max_archive_entries: usize,
    /// Decompressed bytes read from all containers nested in one file on disk.
    #[serde(default = "default_max_expanded_bytes")]
    pub max_expanded_bytes: u64,
    /// Archive entries produced for one file on disk, across all nesting levels.
    #[serde(default = "default_max_file_documents")]
    pub max_file_documents: usize,
    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_follow_symlinks")]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub extra_digests: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_content_bytes: default_max_content_bytes(),
            archives: default_archives(),
            max_archive_depth: default_max_archive_depth(),
            max_archive_entries: default_max_archive_entries(),
            max_expanded_bytes: default_max_expanded_bytes(),
            max_file_documents: default_max_file_documents(),
            thumbnail_quality: default_thumbnail_quality(),
            timeout_secs: default_timeout_secs(),
            follow_symlinks: default_follow_symlinks(),
            include_hidden: false,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            extra_digests: false,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_max_content_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_archives() -> ArchiveMode {
    ArchiveMode::Recursive
}
fn default_max_archive_depth() -> u32 {
    4
}
fn default_max_archive_entries() -> usize {
    10_000
}
fn default_max_expanded_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_max_file_documents() -> usize {
    100_000
}
fn default_thumbnail_quality() -> u8 {
    2
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_follow_symlinks() -> bool {
    true
}
fn default_include_globs() -> Vec<String> {
    vec!["**".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

impl Config {
    /// Configuration used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

/// Load the config file if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.scan.concurrency == 0 {
        bail!("scan.concurrency must be >= 1");
    }
    if config.scan.thumbnail_quality > MAX_THUMBNAIL_QUALITY {
        bail!("scan.thumbnail_quality must be in [0, {}]", MAX_THUMBNAIL_QUALITY);
    }
    if config.scan.archives == ArchiveMode::Recursive && config.scan.max_archive_depth == 0 {
        bail!("scan.max_archive_depth must be >= 1 for recursive expansion");
    }
    if config.scan.max_archive_entries == 0 || config.scan.max_file_documents == 0 {
        bail!("scan.max_archive_entries and scan.max_file_documents must be >= 1");
    }
    if config.build.max_tokens == 0 {
        bail!("build.max_tokens must be > 0");
    }

    Ok(config)
}

/// Highest thumbnail quality level; 0 disables thumbnails.
pub const MAX_THUMBNAIL_QUALITY: u8 = 4;

/// Archive expansion policy for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchivePolicy {
    /// Only top-level entries; nested containers are opaque.
    Shallow,
    /// Nested containers are expanded while their depth is below `max_depth`.
    Recursive { max_depth: u32 },
}

impl ArchivePolicy {
    /// Whether a container found at `depth` (0 = on disk) may be expanded.
    pub fn expands_at(&self, depth: u32) -> bool {
        match self {
            ArchivePolicy::Shallow => depth == 0,
            ArchivePolicy::Recursive { max_depth } => depth < *max_depth,
        }
    }
}

/// One scan invocation: everything the pipeline needs for a single run.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub roots: Vec<PathBuf>,
    pub output: PathBuf,
    /// Prior sealed artifact for incremental mode.
    pub prior: Option<PathBuf>,
    pub display_name: Option<String>,
    /// URL prefix the serving layer maps the root to.
    pub url_prefix: Option<String>,
    pub concurrency: usize,
    pub max_content_bytes: u64,
    pub archive_policy: ArchivePolicy,
    pub max_archive_entries: usize,
    pub max_expanded_bytes: u64,
    pub max_file_documents: usize,
    pub thumbnail_quality: u8,
    pub timeout: Duration,
    pub follow_symlinks: bool,
    pub include_hidden: bool,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub extra_digests: bool,
}

impl ScanJob {
    pub fn from_config(config: &ScanConfig, roots: Vec<PathBuf>, output: PathBuf) -> Self {
        let archive_policy = match config.archives {
            ArchiveMode::Shallow => ArchivePolicy::Shallow,
            ArchiveMode::Recursive => ArchivePolicy::Recursive {
                max_depth: config.max_archive_depth,
            },
        };
        Self {
            roots,
            output,
            prior: None,
            display_name: None,
            url_prefix: None,
            concurrency: config.concurrency,
            max_content_bytes: config.max_content_bytes,
            archive_policy,
            max_archive_entries: config.max_archive_entries,
            max_expanded_bytes: config.max_expanded_bytes,
            max_file_documents: config.max_file_documents,
            thumbnail_quality: config.thumbnail_quality,
            timeout: Duration::from_secs(config.timeout_secs),
            follow_symlinks: config.follow_symlinks,
            include_hidden: config.include_hidden,
            include_globs: config.include_globs.clone(),
            exclude_globs: config.exclude_globs.clone(),
            extra_digests: config.extra_digests,
        }
    }

    /// Checks settings and roots. Every error here is fatal for the run.
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            bail!("at least one root path is required");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be >= 1");
        }
        if self.thumbnail_quality > MAX_THUMBNAIL_QUALITY {
            bail!("thumbnail quality must be in [0, {}]", MAX_THUMBNAIL_QUALITY);
        }
        if let ArchivePolicy::Recursive { max_depth: 0 } = self.archive_policy {
            bail!("max archive depth must be >= 1 for recursive expansion");
        }
        for root in &self.roots {
            if !root.exists() {
                bail!("scan root does not exist: {}", root.display());
            }
            if !root.is_dir() {
                bail!("scan root is not a directory: {}", root.display());
            }
        }
        Ok(())
    }

    /// Name recorded for the scanned tree: the display name, or the root's last path component.
    pub fn root_name(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        self.roots
            .iter()
            .map(|root| root_label(root))
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Last path component of a root, used to prefix identities when scanning several roots.
pub fn root_label(root: &Path) -> String {
    let canonical = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string())
}
