//! Export and import commands.
//!
//! Both go through the `Database` API so imports are validated and applied
//! in one transaction, exactly as the application would.

use hearth_core::{Database, ImportMode, ImportReport};
use std::fs;
use std::path::Path;
use tracing::info;

/// Writes a JSON snapshot of the store to `output_path`.
pub fn export(db_path: &Path, output_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Exporting {}", db_path.display());

    let db = super::open_existing(db_path)?;
    let snapshot = db.export()?;
    fs::write(output_path, snapshot.to_json()?)?;
    db.close()?;

    println!("✓ Snapshot exported");
    println!("  Path:        {}", output_path.display());
    println!("  Collections: {}", snapshot.collections.len());
    println!("  Documents:   {}", snapshot.document_count());
    println!("  Logs:        {}", snapshot.logs.len());
    println!("  Events:      {}", snapshot.event_count());
    Ok(())
}

/// Loads a JSON snapshot into the store, creating the store if needed.
pub fn import(
    db_path: &Path,
    input_path: &Path,
    merge: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Importing {} into {}", input_path.display(), db_path.display());

    let json = fs::read_to_string(input_path)?;
    let mode = if merge {
        ImportMode::Merge
    } else {
        ImportMode::Replace
    };

    let db = Database::open(db_path)?;
    let report = db.import_json(&json, mode)?;
    db.close()?;

    print!("{}", render_report(&report));
    Ok(())
}

fn render_report(report: &ImportReport) -> String {
    let mut out = String::new();
    let mark = if report.is_clean() { "✓" } else { "!" };
    out.push_str(&format!(
        "{mark} Import finished ({:?}): {} imported, {} failed\n",
        report.mode,
        report.imported(),
        report.failed()
    ));

    for (name, c) in &report.collections {
        out.push_str(&format!(
            "  collection {name:<20} imported {:>5}  failed {:>3}\n",
            c.imported, c.failed
        ));
        for error in &c.errors {
            out.push_str(&format!("    - {error}\n"));
        }
    }
    for (name, l) in &report.logs {
        out.push_str(&format!(
            "  log        {name:<20} appended {:>5}  skipped {:>3}  failed {:>3}\n",
            l.appended, l.skipped, l.failed
        ));
        for error in &l.errors {
            out.push_str(&format!("    - {error}\n"));
        }
    }
    out
}
