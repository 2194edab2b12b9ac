//! Incremental classification against a prior sealed artifact.

use std::collections::{HashMap, HashSet};

use crate::artifact::{Artifact, PriorRow};
use crate::models::FileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Same size and mtime: carry the prior documents forward.
    Unchanged,
    /// Present before with a different size or mtime, or interrupted last time.
    Modified,
    New,
}

impl Change {
    pub fn as_str(&self) -> &'static str {
        match self {
            Change::Unchanged => "unchanged",
            Change::Modified => "modified",
            Change::New => "new",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PriorState {
    size: u64,
    mtime_ns: i64,
    /// False when the prior extraction, or any of its members, was cancelled.
    reusable: bool,
}

/// Prior top-level documents indexed by identity.
#[derive(Debug, Default)]
pub struct PriorIndex {
    entries: HashMap<String, PriorState>,
    seen: HashSet<String>,
}

impl PriorIndex {
    /// An empty index: every path is new.
    pub fn empty() -> Self {
        Self::default()
    }

    pub async fn load(artifact: &Artifact) -> anyhow::Result<Self> {
        Ok(Self::from_rows(artifact.prior_rows().await?))
    }

    pub fn from_rows(rows: impl IntoIterator<Item = PriorRow>) -> Self {
        let entries = rows
            .into_iter()
            .map(|row| {
                let state = PriorState {
                    size: row.size,
                    mtime_ns: row.mtime_ns,
                    reusable: !row.status.is_cancelled() && !row.cancelled_members,
                };
                (row.path, state)
            })
            .collect();
        Self {
            entries,
            seen: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn classify(&mut self, entry: &FileEntry) -> Change {
        let Some(prior) = self.entries.get(&entry.path) else {
            return Change::New;
        };
        self.seen.insert(entry.path.clone());
        if prior.reusable && prior.size == entry.size && prior.mtime_ns == entry.mtime_ns {
            Change::Unchanged
        } else {
            Change::Modified
        }
    }

    /// Prior paths not classified so far; after a full walk, the deleted ones.
    pub fn unseen(&self) -> usize {
        self.entries.len() - self.seen.len()
    }
}
