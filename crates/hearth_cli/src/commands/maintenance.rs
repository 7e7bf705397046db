//! Reset and checkpoint commands.

use std::path::Path;
use tracing::info;

/// Wipes the store. Refuses to run without `confirmed`.
pub fn reset(db_path: &Path, confirmed: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirmed {
        return Err("Reset deletes every collection and log. Re-run with --yes to confirm.".into());
    }

    let db = super::open_existing(db_path)?;
    let before = db.stats()?;
    db.reset()?;
    db.close()?;

    info!(documents = before.documents, events = before.events, "store wiped");
    println!("✓ Store reset");
    println!("  Removed documents: {}", before.documents);
    println!("  Removed events:    {}", before.events);
    Ok(())
}

/// Writes a snapshot and clears the journal.
pub fn checkpoint(db_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_existing(db_path)?;
    let journal_before = db.stats()?.journal_size;
    db.checkpoint()?;
    let after = db.stats()?;
    db.close()?;

    println!("✓ Checkpoint written");
    println!("  Sequence:       {}", after.sequence.as_u64());
    println!("  Journal before: {journal_before} bytes");
    println!("  Snapshot:       {} bytes", after.snapshot_size);
    Ok(())
}
