//! Index builder: compiles sealed artifacts into a full-text search index.
//!
//! The output is rebuilt from scratch on every run. It is written next to
//! its destination as `<output>.partial` and renamed into place once
//! complete, so a serving layer reading the previous index never observes
//! a half-built one.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `sources` | one row per input artifact: name, display name, URL prefix |
//! | `documents` | every artifact document, with title and serving URL |
//! | `chunks` | paragraph chunks of extracted text |
//! | `chunks_fts` | FTS5 index over chunk text |

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::chunk::chunk_text;
use crate::db;
use crate::models::{Chunk, Document, VIRTUAL_PATH_SEPARATOR};
use crate::writer::{partial_path, remove_partial};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE sources (
        name TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        url_prefix TEXT,
        root TEXT NOT NULL,
        run_id TEXT NOT NULL,
        scanned_at TEXT
    )
    "#,
    r#"
    CREATE TABLE documents (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        path TEXT NOT NULL,
        mime TEXT NOT NULL,
        size INTEGER NOT NULL,
        mtime_ns INTEGER NOT NULL,
        status TEXT NOT NULL,
        title TEXT NOT NULL,
        url TEXT,
        UNIQUE(source, path),
        FOREIGN KEY (source) REFERENCES sources(name)
    )
    "#,
    r#"
    CREATE TABLE chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        hash TEXT NOT NULL,
        UNIQUE(document_id, chunk_index),
        FOREIGN KEY (document_id) REFERENCES documents(id)
    )
    "#,
    r#"
    CREATE VIRTUAL TABLE chunks_fts USING fts5(
        chunk_id UNINDEXED,
        document_id UNINDEXED,
        text
    )
    "#,
    "CREATE INDEX idx_chunks_document_id ON chunks(document_id)",
    "CREATE INDEX idx_documents_source ON documents(source)",
];

/// Counts for one build.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub output: PathBuf,
    pub sources: usize,
    pub documents: usize,
    pub chunks: usize,
}

/// `<artifact stem>.index.sqlite` next to the artifact.
pub fn default_output(artifact: &Path) -> PathBuf {
    artifact.with_extension("index.sqlite")
}

/// Build a search index from sealed artifacts.
pub async fn build_index(artifacts: &[PathBuf], output: &Path, max_tokens: usize) -> Result<BuildReport> {
    if artifacts.is_empty() {
        bail!("at least one artifact is required");
    }
    if max_tokens == 0 {
        bail!("max_tokens must be > 0");
    }

    let mut opened = Vec::with_capacity(artifacts.len());
    let mut names = HashSet::new();
    for path in artifacts {
        let artifact = Artifact::open_sealed(path).await?;
        let name = source_name(&artifact);
        if !names.insert(name.clone()) {
            bail!(
                "two artifacts share the source name '{}'; scan them with distinct --name values",
                name
            );
        }
        opened.push((name, artifact));
    }

    let partial = partial_path(output);
    let pool = db::connect_writer(&partial, None).await?;
    let result = write_index(&pool, &opened, max_tokens).await;
    pool.close().await;
    for (_, artifact) in opened {
        artifact.close().await;
    }

    let (documents, chunks) = match result {
        Ok(counts) => counts,
        Err(e) => {
            remove_partial(&partial);
            return Err(e);
        }
    };
    std::fs::rename(&partial, output)
        .with_context(|| format!("cannot move index to {}", output.display()))?;

    Ok(BuildReport {
        output: output.to_path_buf(),
        sources: names.len(),
        documents,
        chunks,
    })
}

/// CLI entry point for `idxscan build`.
pub async fn build_command(artifacts: &[PathBuf], output: Option<PathBuf>, max_tokens: usize) -> Result<()> {
    let output = match output {
        Some(path) => path,
        None => match artifacts.first() {
            Some(first) => default_output(first),
            None => bail!("at least one artifact is required"),
        },
    };
    let report = build_index(artifacts, &output, max_tokens).await?;

    println!("build {}", report.output.display());
    println!("  sources: {}", report.sources);
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    println!("ok");
    Ok(())
}

fn source_name(artifact: &Artifact) -> String {
    artifact
        .run_value("display_name")
        .or_else(|| artifact.run_value("root_name"))
        .unwrap_or("default")
        .to_string()
}

async fn write_index(
    pool: &SqlitePool,
    artifacts: &[(String, Artifact)],
    max_tokens: usize,
) -> Result<(usize, usize)> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    let mut documents = 0;
    let mut chunks = 0;
    for (name, artifact) in artifacts {
        let url_prefix = artifact.run_value("url_prefix");
        sqlx::query(
            "INSERT INTO sources (name, display_name, url_prefix, root, run_id, scanned_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(artifact.run_value("display_name").unwrap_or(name))
        .bind(url_prefix)
        .bind(artifact.run_value("roots").unwrap_or("[]"))
        .bind(artifact.run_value("run_id").unwrap_or_default())
        .bind(artifact.run_value("finished_at"))
        .execute(pool)
        .await?;

        let mut pages = artifact.documents();
        while let Some(page) = pages.next_page().await? {
            let mut tx = pool.begin().await?;
            for doc in &page {
                let doc_id = document_id(name, &doc.path);
                insert_document(&mut tx, &doc_id, name, doc, url_prefix).await?;
                documents += 1;
                if let Some(text) = &doc.text {
                    let doc_chunks = chunk_text(&doc_id, text, max_tokens);
                    insert_chunks(&mut tx, &doc_chunks).await?;
                    chunks += doc_chunks.len();
                }
            }
            tx.commit().await?;
        }
        tracing::info!(source = %name, artifact = %artifact.path().display(), "source indexed");
    }
    Ok((documents, chunks))
}

fn document_id(source: &str, path: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{}\0{}", source, path).as_bytes()).to_string()
}

/// Last component of a path or virtual path.
fn title_of(path: &str) -> &str {
    path.rsplit(['/', VIRTUAL_PATH_SEPARATOR])
        .next()
        .filter(|t| !t.is_empty())
        .unwrap_or(path)
}

/// Serving URL: the source's prefix joined with the document path.
pub fn document_url(prefix: &str, path: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), path.trim_start_matches('/'))
}

async fn insert_document(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: &str,
    source: &str,
    doc: &Document,
    url_prefix: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO documents (id, source, path, mime, size, mtime_ns, status, title, url) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(source)
    .bind(&doc.path)
    .bind(&doc.mime)
    .bind(doc.size as i64)
    .bind(doc.mtime_ns)
    .bind(doc.status.as_str())
    .bind(title_of(&doc.path))
    .bind(url_prefix.map(|p| document_url(p, &doc.path)))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_chunks(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, chunks: &[Chunk]) -> Result<()> {
    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut **tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentKind, ExtractionStatus};
    use crate::writer::IndexWriter;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn doc(path: &str, text: Option<&str>) -> Document {
        Document {
            path: path.to_string(),
            origin: path.split('!').next().unwrap().to_string(),
            parent: None,
            depth: 0,
            kind: DocumentKind::Regular,
            size: 10,
            mtime_ns: 1,
            content_hash: None,
            mime: "text/plain".to_string(),
            status: ExtractionStatus::Ok,
            text: text.map(String::from),
            metadata_json: "{}".to_string(),
            thumbnail: None,
        }
    }

    async fn sealed(dir: &Path, file: &str, name: &str, docs: Vec<Document>) -> PathBuf {
        let path = dir.join(file);
        let mut meta = BTreeMap::new();
        meta.insert("root_name".to_string(), name.to_string());
        meta.insert("run_id".to_string(), "r1".to_string());
        meta.insert("url_prefix".to_string(), "https://files.example/".to_string());
        let mut writer = IndexWriter::create(&path, None, &meta).await.unwrap();
        writer.write_documents(docs).await.unwrap();
        writer.seal(0, &BTreeMap::new()).await.unwrap();
        path
    }

    #[test]
    fn titles_and_urls() {
        assert_eq!(title_of("a/b/c.txt"), "c.txt");
        assert_eq!(title_of("b.zip!inner/x.md"), "x.md");
        assert_eq!(title_of("plain"), "plain");
        assert_eq!(
            document_url("https://h/docs/", "a/b.txt"),
            "https://h/docs/a/b.txt"
        );
        assert_eq!(
            default_output(Path::new("/tmp/run.idx")),
            PathBuf::from("/tmp/run.index.sqlite")
        );
    }

    #[tokio::test]
    async fn builds_searchable_index() {
        let tmp = TempDir::new().unwrap();
        let artifact = sealed(
            tmp.path(),
            "a.idx",
            "docs",
            vec![
                doc("a.txt", Some("the quick brown fox")),
                doc("b.zip!inner.txt", Some("lazy dog")),
                doc("photo.bin", None),
            ],
        )
        .await;

        let output = tmp.path().join("out.sqlite");
        let report = build_index(&[artifact], &output, 700).await.unwrap();
        assert_eq!(report.sources, 1);
        assert_eq!(report.documents, 3);
        assert_eq!(report.chunks, 2);

        let pool = db::connect_read_only(&output).await.unwrap();
        let url: String = sqlx::query_scalar("SELECT url FROM documents WHERE path = 'a.txt'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(url, "https://files.example/a.txt");
        let hits: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts WHERE chunks_fts MATCH 'fox'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(hits, 1);
        pool.close().await;
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn failed_build_leaves_no_partial() {
        let tmp = TempDir::new().unwrap();
        let artifact = sealed(
            tmp.path(),
            "a.idx",
            "docs",
            vec![doc("a.txt", Some("text")), doc("b.txt", Some("more"))],
        )
        .await;
        let options = sqlx::sqlite::SqliteConnectOptions::new().filename(&artifact);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        sqlx::query("UPDATE documents SET kind = 'bogus' WHERE path = 'b.txt'")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let output = tmp.path().join("out.sqlite");
        let err = build_index(&[artifact], &output, 700).await.unwrap_err();
        assert!(err.to_string().contains("unknown document kind"), "{}", err);
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn rejects_unsealed_and_clashing_inputs() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("out.sqlite");

        let unsealed = tmp.path().join("u.idx");
        let writer = IndexWriter::create(&unsealed, None, &BTreeMap::new())
            .await
            .unwrap();
        let err = build_index(&[partial_path(&unsealed)], &output, 700)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not sealed"));
        writer.abort().await;

        let a = sealed(tmp.path(), "a.idx", "same", vec![doc("x", Some("x"))]).await;
        let b = sealed(tmp.path(), "b.idx", "same", vec![doc("y", Some("y"))]).await;
        assert!(build_index(&[a, b], &output, 700).await.is_err());
        assert!(!output.exists());
    }
}
