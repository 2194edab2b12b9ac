//! # idxscan
//!
//! A filesystem crawler and content-extraction pipeline that turns directory
//! trees into portable, incremental index artifacts.
//!
//! A scan walks one or more roots, expands archives, extracts text, metadata
//! and thumbnails under size and time limits, and writes one document per
//! file or archive entry into a SQLite artifact. The artifact is sealed
//! exactly once, after every task has resolved; unsealed artifacts are
//! rejected by every consumer. Incremental scans carry unchanged documents
//! forward from the previous artifact instead of re-extracting them.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐   ┌───────────┐   ┌─────────┐   ┌───────────┐   ┌────────┐
//! │ Walker │──▶│ Scheduler │──▶│ Archive │──▶│ Extractor │──▶│ Writer │──▶ sealed artifact
//! └────────┘   │ + Differ  │   └─────────┘   └───────────┘   └────────┘        │
//!              └───────────┘                                                  ▼
//!                                                                  ┌─────────────────┐
//!                                                                  │  Index builder  │
//!                                                                  │  (FTS5 SQLite)  │
//!                                                                  └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and the per-run [`config::ScanJob`] |
//! | [`models`] | Core data types |
//! | [`walker`] | Directory traversal with symlink-cycle protection |
//! | [`detect`] | MIME and container detection |
//! | [`archive`] | Streaming zip / tar / tar.gz expansion |
//! | [`extract`] | Text, metadata and thumbnail extraction |
//! | [`process`] | One file in, its documents out |
//! | [`scheduler`] | Bounded-concurrency execution and cancellation |
//! | [`differ`] | Incremental classification against a prior artifact |
//! | [`writer`] | Artifact writer with a single seal |
//! | [`artifact`] | Read-only artifact access |
//! | [`scan`] | Scan orchestration |
//! | [`builder`] | Full-text index builder |
//! | [`search`] | Keyword lookup over a built index |
//! | [`stats`] | Artifact inspection |

pub mod archive;
pub mod artifact;
pub mod builder;
pub mod cancel;
pub mod chunk;
pub mod config;
pub mod db;
pub mod detect;
pub mod differ;
pub mod digest;
pub mod extract;
pub mod host;
pub mod models;
pub mod process;
pub mod progress;
pub mod scan;
pub mod scheduler;
pub mod search;
pub mod stats;
pub mod walker;
pub mod writer;
