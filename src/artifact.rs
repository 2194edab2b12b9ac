//! Read-only access to index artifacts.
//!
//! [`Artifact::open_sealed`] is the only way downstream consumers open an
//! artifact: it rejects files that are missing, are not artifacts, carry an
//! unknown format version, or were never sealed. [`Artifact::open_unchecked`]
//! skips the seal check and exists for inspection.

use anyhow::{bail, Context, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::db;
use crate::models::{Document, DocumentKind, ExtractionStatus, Thumbnail, REASON_CANCELLED};
use crate::writer::{DOCUMENT_COLUMNS, FORMAT_VERSION};

const PAGE_SIZE: i64 = 500;

pub struct Artifact {
    pool: SqlitePool,
    path: PathBuf,
    run: BTreeMap<String, String>,
}

/// What the differ needs from one prior top-level document.
#[derive(Debug, Clone)]
pub struct PriorRow {
    pub path: String,
    pub size: u64,
    pub mtime_ns: i64,
    pub status: ExtractionStatus,
    /// Some document expanded from this file was cancelled.
    pub cancelled_members: bool,
}

impl Artifact {
    pub async fn open_sealed(path: &Path) -> Result<Self> {
        let artifact = Self::open_unchecked(path).await?;
        if !artifact.is_sealed() {
            artifact.close().await;
            bail!(
                "{} is not sealed (the run that wrote it did not complete)",
                path.display()
            );
        }
        Ok(artifact)
    }

    /// Open without requiring the seal flag.
    pub async fn open_unchecked(path: &Path) -> Result<Self> {
        let pool = db::connect_read_only(path).await?;
        let run = match load_run(&pool).await {
            Ok(run) => run,
            Err(e) => {
                pool.close().await;
                return Err(e).with_context(|| format!("{} is not an index artifact", path.display()));
            }
        };
        let version = run.get("format_version").map(String::as_str);
        if version != Some(FORMAT_VERSION) {
            pool.close().await;
            bail!(
                "{} has unsupported format version {} (expected {})",
                path.display(),
                version.unwrap_or("none"),
                FORMAT_VERSION
            );
        }
        Ok(Self {
            pool,
            path: path.to_path_buf(),
            run,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_sealed(&self) -> bool {
        self.run_value("sealed") == Some("1")
    }

    pub fn run_value(&self, key: &str) -> Option<&str> {
        self.run.get(key).map(String::as_str)
    }

    pub fn run_metadata(&self) -> &BTreeMap<String, String> {
        &self.run
    }

    /// Documents ordered by path, one page at a time.
    pub fn documents(&self) -> DocumentPages<'_> {
        DocumentPages {
            artifact: self,
            after: None,
            done: false,
        }
    }

    pub async fn document(&self, path: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE path = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    pub async fn thumbnail(&self, path: &str) -> Result<Option<Thumbnail>> {
        let row = sqlx::query("SELECT quality, width, height, data FROM thumbnails WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Thumbnail {
            quality: r.get::<i64, _>("quality") as u8,
            width: r.get::<i64, _>("width") as u32,
            height: r.get::<i64, _>("height") as u32,
            data: r.get("data"),
        }))
    }

    /// Top-level (on-disk) documents, for incremental classification.
    pub async fn prior_rows(&self) -> Result<Vec<PriorRow>> {
        let rows = sqlx::query(
            "SELECT d.path, d.size, d.mtime_ns, d.status, d.status_reason,
                    EXISTS (
                        SELECT 1 FROM documents m
                        WHERE m.origin = d.path AND m.depth > 0
                          AND m.status = 'failed' AND m.status_reason = ?
                    ) AS cancelled_members
             FROM documents d WHERE d.depth = 0",
        )
        .bind(REASON_CANCELLED)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                let path: String = r.get("path");
                let status = parse_status(&path, r.get("status"), r.get("status_reason"))?;
                Ok(PriorRow {
                    size: r.get::<i64, _>("size") as u64,
                    mtime_ns: r.get("mtime_ns"),
                    status,
                    cancelled_members: r.get("cancelled_members"),
                    path,
                })
            })
            .collect()
    }

    /// `(status, count)` pairs, most common first.
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        self.grouped_counts("status").await
    }

    pub async fn kind_counts(&self) -> Result<Vec<(String, i64)>> {
        self.grouped_counts("kind").await
    }

    async fn grouped_counts(&self, column: &str) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT {col}, COUNT(*) AS n FROM documents GROUP BY {col} ORDER BY n DESC, {col}",
            col = column
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn thumbnail_stats(&self) -> Result<(i64, i64)> {
        let row: (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(LENGTH(data)), 0) FROM thumbnails")
                .fetch_one(&self.pool)
                .await?;
        Ok(row)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Keyset pagination over an artifact's documents.
pub struct DocumentPages<'a> {
    artifact: &'a Artifact,
    after: Option<String>,
    done: bool,
}

impl DocumentPages<'_> {
    /// Next page, or `None` once every document was returned.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Document>>> {
        if self.done {
            return Ok(None);
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE path > ? ORDER BY path LIMIT ?",
            DOCUMENT_COLUMNS
        ))
        .bind(self.after.as_deref().unwrap_or(""))
        .bind(PAGE_SIZE)
        .fetch_all(&self.artifact.pool)
        .await?;

        if (rows.len() as i64) < PAGE_SIZE {
            self.done = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }
        let docs = rows
            .iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>>>()?;
        self.after = docs.last().map(|d| d.path.clone());
        Ok(Some(docs))
    }
}

async fn load_run(pool: &SqlitePool) -> Result<BTreeMap<String, String>> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM run")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().collect())
}

fn parse_status(path: &str, status: String, reason: Option<String>) -> Result<ExtractionStatus> {
    ExtractionStatus::from_parts(&status, reason)
        .with_context(|| format!("unknown status '{}' for {}", status, path))
}

/// Thumbnails are loaded separately with [`Artifact::thumbnail`].
fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let path: String = row.get("path");
    let kind: String = row.get("kind");
    let kind = DocumentKind::parse(&kind)
        .with_context(|| format!("unknown document kind '{}' for {}", kind, path))?;
    let status = parse_status(&path, row.get("status"), row.get("status_reason"))?;
    Ok(Document {
        origin: row.get("origin"),
        parent: row.get("parent"),
        depth: row.get::<i64, _>("depth") as u32,
        kind,
        size: row.get::<i64, _>("size") as u64,
        mtime_ns: row.get("mtime_ns"),
        content_hash: row.get("content_hash"),
        mime: row.get("mime"),
        status,
        text: row.get("text"),
        metadata_json: row.get("metadata_json"),
        thumbnail: None,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{partial_path, IndexWriter};
    use tempfile::TempDir;

    fn doc(path: &str) -> Document {
        Document {
            path: path.to_string(),
            origin: path.to_string(),
            parent: None,
            depth: 0,
            kind: DocumentKind::Regular,
            size: 10,
            mtime_ns: 7,
            content_hash: None,
            mime: "text/plain".to_string(),
            status: ExtractionStatus::Skipped("content exceeds cutoff".to_string()),
            text: None,
            metadata_json: "{}".to_string(),
            thumbnail: None,
        }
    }

    #[tokio::test]
    async fn sealed_artifact_round_trips_documents() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("a.idx");
        let mut writer = IndexWriter::create(&output, None, &BTreeMap::new())
            .await
            .unwrap();
        let docs: Vec<Document> = (0..1203).map(|i| doc(&format!("f{:05}.txt", i))).collect();
        writer.write_documents(docs).await.unwrap();
        writer.seal(0, &BTreeMap::new()).await.unwrap();

        let artifact = Artifact::open_sealed(&output).await.unwrap();
        let mut pages = artifact.documents();
        let mut seen = Vec::new();
        while let Some(page) = pages.next_page().await.unwrap() {
            seen.extend(page.into_iter().map(|d| d.path));
        }
        assert_eq!(seen.len(), 1203);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));

        let one = artifact.document("f00003.txt").await.unwrap().unwrap();
        assert_eq!(one.status, ExtractionStatus::Skipped("content exceeds cutoff".to_string()));
        assert_eq!(artifact.prior_rows().await.unwrap().len(), 1203);
        artifact.close().await;
    }

    #[tokio::test]
    async fn prior_rows_flag_containers_with_cancelled_members() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("a.idx");
        let mut writer = IndexWriter::create(&output, None, &BTreeMap::new())
            .await
            .unwrap();
        let mut container = doc("pics.tar");
        container.kind = DocumentKind::Container;
        container.status = ExtractionStatus::Ok;
        let mut member = doc("pics.tar!big.png");
        member.origin = "pics.tar".to_string();
        member.parent = Some("pics.tar".to_string());
        member.depth = 1;
        member.status = ExtractionStatus::Failed(REASON_CANCELLED.to_string());
        let mut kept = doc("docs.tar!a.txt");
        kept.origin = "docs.tar".to_string();
        kept.parent = Some("docs.tar".to_string());
        kept.depth = 1;
        writer
            .write_documents(vec![container, member, doc("docs.tar"), kept])
            .await
            .unwrap();
        writer.seal(0, &BTreeMap::new()).await.unwrap();

        let artifact = Artifact::open_sealed(&output).await.unwrap();
        let mut rows = artifact.prior_rows().await.unwrap();
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        let flags: Vec<(&str, bool)> = rows
            .iter()
            .map(|r| (r.path.as_str(), r.cancelled_members))
            .collect();
        assert_eq!(flags, vec![("docs.tar", false), ("pics.tar", true)]);
        assert_eq!(rows[1].status, ExtractionStatus::Ok);
        artifact.close().await;
    }

    #[tokio::test]
    async fn unsealed_artifact_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("a.idx");
        let mut writer = IndexWriter::create(&output, None, &BTreeMap::new())
            .await
            .unwrap();
        writer.write_documents(vec![doc("x.txt")]).await.unwrap();
        let partial = partial_path(&output);

        let err = Artifact::open_sealed(&partial).await.err().unwrap();
        assert!(err.to_string().contains("not sealed"));
        let unchecked = Artifact::open_unchecked(&partial).await.unwrap();
        assert!(!unchecked.is_sealed());
        unchecked.close().await;
        writer.abort().await;
    }

    #[tokio::test]
    async fn non_artifact_files_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("junk.idx");
        std::fs::write(&path, b"not a database at all, just some bytes").unwrap();
        assert!(Artifact::open_sealed(&path).await.is_err());
        assert!(Artifact::open_sealed(&tmp.path().join("missing.idx")).await.is_err());
    }
}
