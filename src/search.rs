//! Keyword lookup over a built index.
//!
//! Opens the index read-only and ranks chunks with SQLite's FTS5 `bm25`.
//! Results are grouped per document, keeping each document's best chunk.
//! Meant for checking a build, not as a ranking engine.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;

use crate::db;
use crate::models::SearchResult;

/// Chunks fetched per requested result, to survive per-document grouping.
const CANDIDATE_FACTOR: i64 = 4;

pub async fn search_index(index: &Path, query: &str, limit: i64) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() || limit <= 0 {
        return Ok(Vec::new());
    }
    let pool = db::connect_read_only(index).await?;
    let result = fetch_results(&pool, query, limit).await;
    pool.close().await;
    result.with_context(|| format!("search failed for query '{}'", query))
}

async fn fetch_results(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchResult>> {
    let rows = sqlx::query(
        r#"
        SELECT d.path, d.source, d.url, bm25(chunks_fts) AS rank,
               snippet(chunks_fts, 2, '>>>', '<<<', '...', 24) AS snippet
        FROM chunks_fts
        JOIN documents d ON d.id = chunks_fts.document_id
        WHERE chunks_fts MATCH ?
        ORDER BY rank, d.path
        LIMIT ?
        "#,
    )
    .bind(query)
    .bind(limit * CANDIDATE_FACTOR)
    .fetch_all(pool)
    .await?;

    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for row in rows {
        let path: String = row.get("path");
        let source: String = row.get("source");
        if !seen.insert((source.clone(), path.clone())) {
            continue;
        }
        let rank: f64 = row.get("rank");
        results.push(SearchResult {
            path,
            source,
            url: row.get("url"),
            // bm25 is lower-is-better; negate so higher = better
            score: -rank,
            snippet: row.get("snippet"),
        });
        if results.len() as i64 >= limit {
            break;
        }
    }
    Ok(results)
}

/// CLI entry point for `idxscan search`.
pub async fn search_command(index: &Path, query: &str, limit: i64) -> Result<()> {
    let results = search_index(index, query, limit).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.2}] {} / {}", i + 1, result.score, result.source, result.path);
        if let Some(url) = &result.url {
            println!("    url: {}", url);
        }
        println!("    excerpt: \"{}\"", result.snippet.replace('\n', " ").trim());
        println!();
    }
    Ok(())
}
