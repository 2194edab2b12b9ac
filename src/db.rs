//! SQLite connections for artifacts and built indices.
//!
//! Writers own a single connection (`max_connections(1)`) so every write is
//! serialized through one task. Consumers always open read-only.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Schema name under which a prior artifact is attached to the writer connection.
pub const PRIOR_SCHEMA: &str = "prior";

/// Create (or truncate) a database file for writing.
///
/// With `attach_prior`, the given sealed artifact is attached read-only to
/// the connection as [`PRIOR_SCHEMA`] so rows can be copied without leaving
/// SQLite.
pub async fn connect_writer(path: &Path, attach_prior: Option<&Path>) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
    }
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("cannot remove stale {}", path.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);

    let prior = attach_prior.map(read_only_uri);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .after_connect(move |conn, _meta| {
            let prior = prior.clone();
            Box::pin(async move {
                if let Some(prior) = prior {
                    sqlx::query(&format!("ATTACH DATABASE ? AS {}", PRIOR_SCHEMA))
                        .bind(prior.clone())
                        .execute(&mut *conn)
                        .await?;
                    // A literal (non-URI) open would attach a fresh empty file.
                    let (tables,): (i64,) = sqlx::query_as(&format!(
                        "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table'",
                        PRIOR_SCHEMA
                    ))
                    .fetch_one(&mut *conn)
                    .await?;
                    if tables == 0 {
                        return Err(sqlx::Error::Configuration(
                            format!("prior {} attached without tables", prior).into(),
                        ));
                    }
                }
                Ok(())
            })
        })
        .connect_with(options)
        .await
        .with_context(|| format!("cannot create {}", path.display()))?;

    Ok(pool)
}

/// `file:` URI opening `path` with `mode=ro`.
fn read_only_uri(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut uri = String::from("file:");
    if cfg!(windows) && raw.as_bytes().get(1) == Some(&b':') {
        uri.push('/');
    }
    for c in raw.chars() {
        match c {
            '%' => uri.push_str("%25"),
            '?' => uri.push_str("%3f"),
            '#' => uri.push_str("%23"),
            '\\' if cfg!(windows) => uri.push('/'),
            c => uri.push(c),
        }
    }
    uri.push_str("?mode=ro");
    uri
}

/// Open an existing database read-only.
pub async fn connect_read_only(path: &Path) -> Result<SqlitePool> {
    if !path.exists() {
        anyhow::bail!("no such file: {}", path.display());
    }
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;

    Ok(pool)
}
