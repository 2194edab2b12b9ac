//! Directory walker.
//!
//! Lazily yields one [`FileEntry`] per regular file under the scan roots.
//! Directories are visited in file-name order, so the sequence is
//! deterministic for an unchanged tree.
//!
//! When symlinks are followed, each directory's `(device, inode)` pair is
//! recorded and a directory already visited is never entered again. This
//! terminates symlink cycles and stops two links to the same directory from
//! producing duplicate documents.
//!
//! Exclusion happens before anything is emitted: hidden dot-paths (unless
//! enabled), `.git` and `node_modules` directories, and the configured
//! exclude globs. Excluded directories are pruned. Unreadable entries are
//! logged, counted and skipped; the walk continues.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{root_label, ScanJob};
use crate::detect::mime_from_name;
use crate::models::FileEntry;

/// Directory names that are never scanned.
const SYSTEM_DIRS: &[&str] = &[".git", "node_modules"];

struct Root {
    path: PathBuf,
    /// Identity prefix when several roots are scanned together.
    label: Option<String>,
}

pub struct Walker {
    roots: std::vec::IntoIter<Root>,
    current: Option<(Root, walkdir::IntoIter)>,
    follow_symlinks: bool,
    include_hidden: bool,
    include_set: GlobSet,
    exclude_set: GlobSet,
    visited: HashSet<(u64, u64)>,
    errors: usize,
}

impl Walker {
    pub fn new(job: &ScanJob) -> Result<Self> {
        let roots = scan_roots(&job.roots)?;
        Ok(Self {
            roots: roots.into_iter(),
            current: None,
            follow_symlinks: job.follow_symlinks,
            include_hidden: job.include_hidden,
            include_set: build_globset(&job.include_globs)?,
            exclude_set: build_globset(&job.exclude_globs)?,
            visited: HashSet::new(),
            errors: 0,
        })
    }

    /// Entries that could not be read and were excluded.
    pub fn errors(&self) -> usize {
        self.errors
    }

    fn is_excluded(&self, relative: &Path, rel_str: &str, is_dir: bool) -> bool {
        for component in relative.components() {
            let name = component.as_os_str().to_string_lossy();
            if !self.include_hidden && name.starts_with('.') {
                return true;
            }
            if SYSTEM_DIRS.contains(&name.as_ref()) {
                return true;
            }
        }
        if self.exclude_set.is_match(rel_str) {
            return true;
        }
        !is_dir && !self.include_set.is_match(rel_str)
    }

    fn next_in_current(&mut self) -> Option<FileEntry> {
        loop {
            let (root, iter) = self.current.as_mut()?;
            let entry = match iter.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    if err.loop_ancestor().is_some() {
                        tracing::debug!(path = ?err.path(), "symlink loop not followed");
                    } else {
                        tracing::warn!(path = ?err.path(), error = %err, "walk error");
                        self.errors += 1;
                    }
                    continue;
                }
            };
            if entry.depth() == 0 {
                if entry.file_type().is_dir() {
                    if let Some(key) = dir_key(entry.path()) {
                        self.visited.insert(key);
                    }
                }
                continue;
            }

            let relative = entry.path().strip_prefix(&root.path).unwrap_or(entry.path());
            let rel_str = identity_path(relative);
            let label = root.label.clone();
            let is_dir = entry.file_type().is_dir();

            if self.is_excluded(relative, &rel_str, is_dir) {
                if is_dir {
                    if let Some((_, iter)) = self.current.as_mut() {
                        iter.skip_current_dir();
                    }
                }
                continue;
            }

            if is_dir {
                if self.follow_symlinks {
                    let key = dir_key(entry.path());
                    if let Some(key) = key {
                        if !self.visited.insert(key) {
                            tracing::debug!(path = %rel_str, "directory already visited");
                            if let Some((_, iter)) = self.current.as_mut() {
                                iter.skip_current_dir();
                            }
                        }
                    }
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    tracing::warn!(path = %rel_str, error = %err, "cannot stat file");
                    self.errors += 1;
                    continue;
                }
            };
            let symlink_target = if entry.path_is_symlink() {
                std::fs::read_link(entry.path())
                    .ok()
                    .map(|t| t.to_string_lossy().to_string())
            } else {
                None
            };
            let path = match label {
                Some(label) => format!("{}/{}", label, rel_str),
                None => rel_str,
            };
            let (mtime_ns, ctime, mode) = unix_times(&metadata);

            return Some(FileEntry {
                abs_path: entry.path().to_path_buf(),
                mime: mime_from_name(&path),
                path,
                size: metadata.len(),
                mtime_ns,
                ctime,
                mode,
                symlink_target,
            });
        }
    }
}

impl Iterator for Walker {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        loop {
            if self.current.is_none() {
                let root = self.roots.next()?;
                let iter = WalkDir::new(&root.path)
                    .follow_links(self.follow_symlinks)
                    .sort_by_file_name()
                    .into_iter();
                self.current = Some((root, iter));
            }
            if let Some(entry) = self.next_in_current() {
                return Some(entry);
            }
            self.current = None;
        }
    }
}

fn scan_roots(paths: &[PathBuf]) -> Result<Vec<Root>> {
    if paths.len() == 1 {
        return Ok(vec![Root {
            path: paths[0].clone(),
            label: None,
        }]);
    }
    let mut labels = HashSet::new();
    let mut roots = Vec::with_capacity(paths.len());
    for path in paths {
        let label = root_label(path);
        if !labels.insert(label.clone()) {
            bail!(
                "two scan roots share the name '{}'; rename one or scan them separately",
                label
            );
        }
        roots.push(Root {
            path: path.clone(),
            label: Some(label),
        });
    }
    Ok(roots)
}

/// `/`-separated identity for a path relative to its root.
fn identity_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(unix)]
fn dir_key(path: &Path) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| (m.dev(), m.ino()))
}

#[cfg(not(unix))]
fn dir_key(path: &Path) -> Option<(u64, u64)> {
    // No inode numbers: fall back to the canonical path.
    use std::hash::{Hash, Hasher};
    let canonical = std::fs::canonicalize(path).ok()?;
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    canonical.hash(&mut hasher);
    Some((0, hasher.finish()))
}

#[cfg(unix)]
fn unix_times(metadata: &std::fs::Metadata) -> (i64, i64, u32) {
    use std::os::unix::fs::MetadataExt;
    let mtime_ns = metadata
        .mtime()
        .saturating_mul(1_000_000_000)
        .saturating_add(metadata.mtime_nsec());
    (mtime_ns, metadata.ctime(), metadata.mode())
}

#[cfg(not(unix))]
fn unix_times(metadata: &std::fs::Metadata) -> (i64, i64, u32) {
    let mtime_ns = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    (mtime_ns, mtime_ns / 1_000_000_000, 0)
}
