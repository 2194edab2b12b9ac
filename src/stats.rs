//! Artifact inspection.
//!
//! Prints an artifact's run metadata and what it holds: documents per
//! status and kind, thumbnail volume, and the counts recorded at seal time.
//! Unsealed artifacts are shown too, clearly flagged, so a crashed run can
//! be examined.

use anyhow::Result;
use std::path::Path;

use crate::artifact::Artifact;

/// Run the stats command: open the artifact read-only and print a summary.
pub async fn run_stats(path: &Path) -> Result<()> {
    let artifact = Artifact::open_unchecked(path).await?;
    let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    let statuses = artifact.status_counts().await?;
    let kinds = artifact.kind_counts().await?;
    let (thumb_count, thumb_bytes) = artifact.thumbnail_stats().await?;
    let total: i64 = statuses.iter().map(|(_, n)| n).sum();

    let value = |key: &str| artifact.run_value(key).unwrap_or("-").to_string();

    println!("idxscan artifact");
    println!("================");
    println!();
    println!("  Artifact:    {}", path.display());
    println!("  Size:        {}", format_bytes(file_size));
    println!(
        "  Sealed:      {}",
        if artifact.is_sealed() { "yes" } else { "NO (incomplete run)" }
    );
    println!("  Run:         {}", value("run_id"));
    println!("  Root:        {}", value("root_name"));
    if let Some(name) = artifact.run_value("display_name") {
        println!("  Name:        {}", name);
    }
    if let Some(prefix) = artifact.run_value("url_prefix") {
        println!("  URL prefix:  {}", prefix);
    }
    println!("  Started:     {}", format_time(artifact.run_value("started_at")));
    println!("  Finished:    {}", format_time(artifact.run_value("finished_at")));
    println!("  Tool:        {}", value("tool_version"));
    println!();
    println!("  Documents:   {}", total);
    println!(
        "  Thumbnails:  {} ({})",
        thumb_count,
        format_bytes(thumb_bytes.max(0) as u64)
    );

    if !statuses.is_empty() {
        println!();
        println!("  By status:");
        for (status, n) in &statuses {
            println!("    {:<12} {:>8}", status, n);
        }
    }
    if !kinds.is_empty() {
        println!();
        println!("  By kind:");
        for (kind, n) in &kinds {
            println!("    {:<12} {:>8}", kind, n);
        }
    }
    if let Some(counts) = artifact.run_value("counts") {
        println!();
        println!("  Run counts:  {}", counts);
        println!("  Deleted:     {}", value("deleted"));
        println!("  Walk errors: {}", value("walk_errors"));
    }
    println!();

    artifact.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// RFC 3339 timestamp rendered with its age, e.g. "2026-01-02 10:00 (3 hours ago)".
fn format_time(value: Option<&str>) -> String {
    let Some(raw) = value else {
        return "-".to_string();
    };
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => {
            let ts = dt.timestamp();
            format!(
                "{} ({})",
                dt.format("%Y-%m-%d %H:%M"),
                format_relative(chrono::Utc::now().timestamp() - ts)
            )
        }
        Err(_) => raw.to_string(),
    }
}

fn format_relative(delta: i64) -> String {
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn relative_ages() {
        assert_eq!(format_relative(5), "just now");
        assert_eq!(format_relative(60), "1 min ago");
        assert_eq!(format_relative(7200), "2 hours ago");
        assert_eq!(format_relative(86400 * 3), "3 days ago");
        assert_eq!(format_time(None), "-");
        assert_eq!(format_time(Some("garbage")), "garbage");
    }
}
