//! CLI command implementations.

pub mod inspect;
pub mod maintenance;
pub mod snapshot;

use hearth_core::{Config, Database};
use std::path::Path;

/// Opens an existing store; the CLI never creates one implicitly.
pub(crate) fn open_existing(path: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    Ok(Database::open_with_config(
        path,
        Config::default().create_if_missing(false),
    )?)
}
