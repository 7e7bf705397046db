//! Inspect command implementation.

use hearth_core::StoreStats;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Counts reported by the store.
    #[serde(flatten)]
    pub stats: StoreStats,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_existing(path)?;
    let result = InspectResult {
        path: path.display().to_string(),
        stats: db.stats()?,
    };
    db.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print!("{}", render_text(&result)),
    }
    Ok(())
}

fn render_text(result: &InspectResult) -> String {
    let stats = &result.stats;
    let mut out = String::new();
    out.push_str("HearthDB Store Inspection\n");
    out.push_str("=========================\n\n");
    out.push_str(&format!("Path:     {}\n", result.path));
    out.push_str(&format!("Sequence: {}\n\n", stats.sequence.as_u64()));

    out.push_str("Storage:\n");
    out.push_str(&format!("  Journal:  {}\n", format_size(stats.journal_size)));
    out.push_str(&format!("  Snapshot: {}\n", format_size(stats.snapshot_size)));

    out.push_str(&format!("\nCollections ({} documents):\n", stats.documents));
    if stats.collections.is_empty() {
        out.push_str("  (none)\n");
    }
    for (name, count) in &stats.collections {
        out.push_str(&format!("  {name:<24} {count}\n"));
    }

    out.push_str(&format!("\nLogs ({} events):\n", stats.events));
    if stats.logs.is_empty() {
        out.push_str("  (none)\n");
    }
    for (name, count) in &stats.logs {
        out.push_str(&format!("  {name:<24} {count}\n"));
    }
    out
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
