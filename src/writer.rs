//! Index artifact writer.
//!
//! A single task owns the artifact connection and applies
//! [`WriterMessage`]s in arrival order. The artifact is built at
//! `<output>.partial` and only [`IndexWriter::seal`] moves it into place,
//! so a crashed or aborted run never leaves a file that looks complete.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::db::{self, PRIOR_SCHEMA};
use crate::models::Document;

/// Artifact layout version; readers reject anything else.
pub const FORMAT_VERSION: &str = "1";

pub const DOCUMENT_COLUMNS: &str = "path, origin, parent, depth, kind, size, mtime_ns, \
     content_hash, mime, status, status_reason, text, metadata_json";
const THUMBNAIL_COLUMNS: &str = "path, quality, width, height, data";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE run (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE documents (
        path TEXT PRIMARY KEY,
        origin TEXT NOT NULL,
        parent TEXT,
        depth INTEGER NOT NULL,
        kind TEXT NOT NULL,
        size INTEGER NOT NULL,
        mtime_ns INTEGER NOT NULL,
        content_hash TEXT,
        mime TEXT NOT NULL,
        status TEXT NOT NULL,
        status_reason TEXT,
        text TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    "CREATE INDEX idx_documents_origin ON documents(origin)",
    r#"
    CREATE TABLE thumbnails (
        path TEXT PRIMARY KEY,
        quality INTEGER NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        data BLOB NOT NULL
    )
    "#,
];

/// Work handed to the writer task.
#[derive(Debug)]
pub enum WriterMessage {
    /// Freshly extracted documents of one task, container first.
    Documents(Vec<Document>),
    /// Copy every prior document produced from this top-level path.
    CarryForward(String),
}

/// What the writer has stored so far.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriterStats {
    pub written: usize,
    pub carried: usize,
    pub duplicates: usize,
}

pub struct IndexWriter {
    pool: SqlitePool,
    partial: PathBuf,
    output: PathBuf,
    has_prior: bool,
    stats: WriterStats,
}

/// `<output>.partial`
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    output.with_file_name(name)
}

impl IndexWriter {
    /// Start a new artifact. Any stale partial file from an earlier crash is replaced.
    pub async fn create(
        output: &Path,
        prior: Option<&Path>,
        run_metadata: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let partial = partial_path(output);
        let pool = db::connect_writer(&partial, prior).await?;

        let writer = Self {
            pool,
            partial,
            output: output.to_path_buf(),
            has_prior: prior.is_some(),
            stats: WriterStats::default(),
        };
        if let Err(e) = writer.init(run_metadata).await {
            writer.abort().await;
            return Err(e);
        }
        Ok(writer)
    }

    async fn init(&self, run_metadata: &BTreeMap<String, String>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        for (key, value) in run_metadata {
            put_run_value(&mut tx, key, value).await?;
        }
        put_run_value(&mut tx, "format_version", FORMAT_VERSION).await?;
        put_run_value(&mut tx, "sealed", "0").await?;
        tx.commit().await?;
        Ok(())
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial
    }

    /// Insert documents (and their thumbnails) in one transaction.
    /// An identity that is already present is ignored and counted.
    pub async fn write_documents(&mut self, docs: Vec<Document>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for doc in docs {
            let result = sqlx::query(&format!(
                "INSERT OR IGNORE INTO documents ({}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                DOCUMENT_COLUMNS
            ))
            .bind(&doc.path)
            .bind(&doc.origin)
            .bind(&doc.parent)
            .bind(doc.depth as i64)
            .bind(doc.kind.as_str())
            .bind(doc.size as i64)
            .bind(doc.mtime_ns)
            .bind(&doc.content_hash)
            .bind(&doc.mime)
            .bind(doc.status.as_str())
            .bind(doc.status.reason())
            .bind(&doc.text)
            .bind(&doc.metadata_json)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tracing::warn!(path = %doc.path, "duplicate document identity ignored");
                self.stats.duplicates += 1;
                continue;
            }
            written += 1;

            if let Some(thumb) = &doc.thumbnail {
                sqlx::query(&format!(
                    "INSERT OR IGNORE INTO thumbnails ({}) VALUES (?, ?, ?, ?, ?)",
                    THUMBNAIL_COLUMNS
                ))
                .bind(&doc.path)
                .bind(thumb.quality as i64)
                .bind(thumb.width as i64)
                .bind(thumb.height as i64)
                .bind(&thumb.data)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        self.stats.written += written;
        Ok(written)
    }

    /// Copy the prior generation's rows for `origin` verbatim.
    pub async fn carry_forward(&mut self, origin: &str) -> Result<usize> {
        if !self.has_prior {
            bail!("no prior artifact attached; cannot carry forward {}", origin);
        }
        let mut tx = self.pool.begin().await?;
        let copied = sqlx::query(&format!(
            "INSERT OR IGNORE INTO documents ({cols}) \
             SELECT {cols} FROM {prior}.documents WHERE origin = ?",
            cols = DOCUMENT_COLUMNS,
            prior = PRIOR_SCHEMA
        ))
        .bind(origin)
        .execute(&mut *tx)
        .await?
        .rows_affected() as usize;

        sqlx::query(&format!(
            "INSERT OR IGNORE INTO thumbnails ({cols}) \
             SELECT t.path, t.quality, t.width, t.height, t.data \
             FROM {prior}.thumbnails t JOIN {prior}.documents d ON d.path = t.path \
             WHERE d.origin = ?",
            cols = THUMBNAIL_COLUMNS,
            prior = PRIOR_SCHEMA
        ))
        .bind(origin)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.stats.carried += copied;
        Ok(copied)
    }

    async fn apply(&mut self, message: WriterMessage) -> Result<()> {
        match message {
            WriterMessage::Documents(docs) => {
                self.write_documents(docs).await?;
            }
            WriterMessage::CarryForward(origin) => {
                self.carry_forward(&origin).await?;
            }
        }
        Ok(())
    }

    /// Mark the artifact complete and move it to the output path.
    ///
    /// Consumes the writer, so a run seals at most once. Refuses while any
    /// task is still pending. On any failure the partial file is removed and
    /// whatever was at the output path before is left untouched.
    pub async fn seal(self, pending: usize, summary: &BTreeMap<String, String>) -> Result<PathBuf> {
        if pending != 0 {
            self.abort().await;
            bail!("cannot seal with {} tasks still pending", pending);
        }

        let stats = self.stats;
        let result: Result<()> = async {
            let mut tx = self.pool.begin().await?;
            for (key, value) in summary {
                put_run_value(&mut tx, key, value).await?;
            }
            put_run_value(&mut tx, "stored_documents", &(stats.written + stats.carried).to_string()).await?;
            put_run_value(&mut tx, "duplicates", &stats.duplicates.to_string()).await?;
            put_run_value(&mut tx, "sealed", "1").await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        self.pool.close().await;
        if let Err(e) = result {
            remove_partial(&self.partial);
            return Err(e.context("failed to seal artifact"));
        }

        if let Err(e) = std::fs::rename(&self.partial, &self.output) {
            remove_partial(&self.partial);
            return Err(e).with_context(|| format!("cannot move artifact to {}", self.output.display()));
        }
        tracing::info!(output = %self.output.display(), "artifact sealed");
        Ok(self.output)
    }

    /// Discard the run: close the connection and delete the partial file.
    pub async fn abort(self) {
        self.pool.close().await;
        remove_partial(&self.partial);
        tracing::info!(partial = %self.partial.display(), "artifact discarded");
    }
}

async fn put_run_value(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    key: &str,
    value: &str,
) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO run (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub(crate) fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "cannot remove partial file");
        }
    }
}

/// Writer task body: apply messages until every sender is dropped.
///
/// On a failed write the artifact is aborted and the error returned; the
/// dropped receiver then makes senders fail, which stops the run.
pub async fn run_writer(
    mut writer: IndexWriter,
    mut rx: mpsc::Receiver<WriterMessage>,
) -> Result<IndexWriter> {
    while let Some(message) = rx.recv().await {
        if let Err(e) = writer.apply(message).await {
            rx.close();
            writer.abort().await;
            return Err(e.context("artifact write failed"));
        }
    }
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentKind, ExtractionStatus, Thumbnail};
    use tempfile::TempDir;

    fn doc(path: &str) -> Document {
        Document {
            path: path.to_string(),
            origin: path.to_string(),
            parent: None,
            depth: 0,
            kind: DocumentKind::Regular,
            size: 3,
            mtime_ns: 42,
            content_hash: Some("abc".to_string()),
            mime: "text/plain".to_string(),
            status: ExtractionStatus::Ok,
            text: Some("hey".to_string()),
            metadata_json: "{}".to_string(),
            thumbnail: None,
        }
    }

    async fn count(path: &Path, sql: &str) -> i64 {
        let pool = db::connect_read_only(path).await.unwrap();
        let n: i64 = sqlx::query_scalar(sql).fetch_one(&pool).await.unwrap();
        pool.close().await;
        n
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/tmp/run.idx")),
            PathBuf::from("/tmp/run.idx.partial")
        );
    }

    #[tokio::test]
    async fn seal_moves_partial_into_place() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("run.idx");
        let mut writer = IndexWriter::create(&output, None, &BTreeMap::new())
            .await
            .unwrap();
        assert!(writer.partial_path().exists());
        assert!(!output.exists());

        writer.write_documents(vec![doc("a.txt"), doc("a.txt")]).await.unwrap();
        assert_eq!(writer.stats().duplicates, 1);

        let sealed = writer.seal(0, &BTreeMap::new()).await.unwrap();
        assert_eq!(sealed, output);
        assert!(!partial_path(&output).exists());
        assert_eq!(count(&output, "SELECT COUNT(*) FROM documents").await, 1);
        assert_eq!(
            count(&output, "SELECT CAST(value AS INTEGER) FROM run WHERE key = 'sealed'").await,
            1
        );
    }

    #[tokio::test]
    async fn seal_refuses_pending_tasks() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("run.idx");
        let writer = IndexWriter::create(&output, None, &BTreeMap::new())
            .await
            .unwrap();
        assert!(writer.seal(2, &BTreeMap::new()).await.is_err());
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn carry_forward_copies_rows_and_thumbnails() {
        let tmp = TempDir::new().unwrap();
        let prior_path = tmp.path().join("prior.idx");
        let mut prior = IndexWriter::create(&prior_path, None, &BTreeMap::new())
            .await
            .unwrap();
        let mut container = doc("b.zip");
        container.kind = DocumentKind::Container;
        let mut member = doc("b.zip!img.png");
        member.origin = "b.zip".to_string();
        member.parent = Some("b.zip".to_string());
        member.thumbnail = Some(Thumbnail {
            quality: 2,
            width: 4,
            height: 4,
            data: vec![1, 2, 3],
        });
        prior
            .write_documents(vec![container, member, doc("a.txt")])
            .await
            .unwrap();
        prior.seal(0, &BTreeMap::new()).await.unwrap();

        let output = tmp.path().join("next.idx");
        let mut writer = IndexWriter::create(&output, Some(&prior_path), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(writer.carry_forward("b.zip").await.unwrap(), 2);
        writer.seal(0, &BTreeMap::new()).await.unwrap();

        assert_eq!(count(&output, "SELECT COUNT(*) FROM documents").await, 2);
        assert_eq!(count(&output, "SELECT COUNT(*) FROM thumbnails").await, 1);
    }

    #[tokio::test]
    async fn abort_leaves_existing_output_untouched() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("run.idx");
        std::fs::write(&output, b"previous").unwrap();
        let writer = IndexWriter::create(&output, None, &BTreeMap::new())
            .await
            .unwrap();
        writer.abort().await;
        assert_eq!(std::fs::read(&output).unwrap(), b"previous");
        assert!(!partial_path(&output).exists());
    }
}
