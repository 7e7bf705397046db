//! Versioned JSON snapshots of the whole store.
//!
//! ```json
//! {
//!   "version": 1,
//!   "exportedAt": 1760000000000,
//!   "collections": { "parts": [ { "id": "p1", "name": "Ada" } ] },
//!   "logs": { "ledger": [ { "amount": -3 } ] }
//! }
//! ```
//!
//! Import validates the whole snapshot before it writes anything and then
//! applies it in a single transaction.

use crate::entity::{Document, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::notifier::Topic;
use crate::transaction::TransactionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A portable copy of every collection and log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Format version.
    pub version: u32,
    /// Export time in milliseconds since the Unix epoch.
    pub exported_at: u64,
    /// Documents per collection.
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<Value>>,
    /// Events per log, oldest first.
    #[serde(default)]
    pub logs: BTreeMap<String, Vec<Value>>,
}

impl Snapshot {
    /// Parses a snapshot from JSON.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CoreError::validation(format!("malformed snapshot: {e}")))
    }

    /// Serializes the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns the number of documents across all collections.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Returns the number of events across all logs.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.logs.values().map(Vec::len).sum()
    }
}

/// How an import treats existing data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Wipe every collection and log, then load. Any invalid item fails
    /// the whole import.
    #[default]
    Replace,
    /// Upsert documents by id and append events not already present.
    /// Invalid items are skipped and reported.
    Merge,
}

/// Outcome for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    /// Documents written.
    pub imported: usize,
    /// Documents rejected by validation.
    pub failed: usize,
    /// One message per rejected document.
    pub errors: Vec<String>,
}

/// Outcome for one log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogReport {
    /// Events appended.
    pub appended: usize,
    /// Events skipped because an equal event was already present.
    pub skipped: usize,
    /// Events rejected by validation.
    pub failed: usize,
    /// One message per rejected event.
    pub errors: Vec<String>,
}

/// Per-item results of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// The mode the import ran in.
    pub mode: ImportMode,
    /// Results per collection.
    pub collections: BTreeMap<String, CollectionReport>,
    /// Results per log.
    pub logs: BTreeMap<String, LogReport>,
}

impl ImportReport {
    /// Returns the number of documents written.
    #[must_use]
    pub fn imported(&self) -> usize {
        self.collections.values().map(|c| c.imported).sum()
    }

    /// Returns the number of documents and events rejected.
    #[must_use]
    pub fn failed(&self) -> usize {
        let docs: usize = self.collections.values().map(|c| c.failed).sum();
        let events: usize = self.logs.values().map(|l| l.failed).sum();
        docs + events
    }

    /// Returns true if nothing was rejected.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }
}

/// Copies the committed state into a snapshot.
pub(crate) fn export(manager: &TransactionManager) -> CoreResult<Snapshot> {
    manager.ensure_open()?;
    let state = manager.read_state();
    let collections = state
        .collections
        .iter()
        .map(|(name, map)| {
            let docs = map.iter().map(|doc| doc.clone().into_value()).collect();
            (name.clone(), docs)
        })
        .collect();
    let logs = state
        .logs
        .iter()
        .map(|(name, log)| (name.clone(), log.to_vec()))
        .collect();

    Ok(Snapshot {
        version: SNAPSHOT_VERSION,
        exported_at: now_millis(),
        collections,
        logs,
    })
}

/// Validated snapshot contents, ready to be written.
#[derive(Default)]
struct Prepared {
    collections: BTreeMap<String, Vec<Document>>,
    logs: BTreeMap<String, Vec<Value>>,
}

/// Loads a snapshot in one transaction.
pub(crate) fn import(
    manager: &TransactionManager,
    snapshot: &Snapshot,
    mode: ImportMode,
) -> CoreResult<ImportReport> {
    if snapshot.version == 0 || snapshot.version > SNAPSHOT_VERSION {
        return Err(CoreError::validation(format!(
            "unsupported snapshot version {} (expected 1..={SNAPSHOT_VERSION})",
            snapshot.version
        )));
    }

    let mut report = ImportReport {
        mode,
        ..ImportReport::default()
    };
    let prepared = prepare(manager, snapshot, mode, &mut report)?;

    manager.transaction(|txn| {
        if mode == ImportMode::Replace {
            let state = manager.read_state();
            let collections: BTreeSet<String> = state
                .collections
                .keys()
                .chain(snapshot.collections.keys())
                .cloned()
                .collect();
            let logs: BTreeSet<String> = state
                .logs
                .keys()
                .chain(snapshot.logs.keys())
                .cloned()
                .collect();
            drop(state);

            for name in &collections {
                txn.clear_collection(name)?;
            }
            for name in &logs {
                txn.clear_log(name)?;
            }
        }

        for (name, docs) in &prepared.collections {
            for doc in docs {
                txn.upsert(name, doc.clone())?;
            }
            report.collections.entry(name.clone()).or_default().imported += docs.len();
        }

        for (name, events) in &prepared.logs {
            let entry = report.logs.entry(name.clone()).or_default();
            let mut present = match mode {
                ImportMode::Replace => Vec::new(),
                ImportMode::Merge => txn.log_events(name)?,
            };
            for event in events {
                if mode == ImportMode::Merge && present.contains(event) {
                    entry.skipped += 1;
                    continue;
                }
                txn.push_event(name, event.clone())?;
                present.push(event.clone());
                entry.appended += 1;
            }
        }
        Ok(())
    })?;

    tracing::info!(
        mode = ?mode,
        imported = report.imported(),
        failed = report.failed(),
        "snapshot imported"
    );
    Ok(report)
}

/// Checks every item. In `Replace` mode the first invalid item fails the
/// import; in `Merge` mode it is recorded and skipped.
fn prepare(
    manager: &TransactionManager,
    snapshot: &Snapshot,
    mode: ImportMode,
    report: &mut ImportReport,
) -> CoreResult<Prepared> {
    let mut prepared = Prepared::default();

    for (name, values) in &snapshot.collections {
        let validator = manager.validator(&Topic::Collection(name.clone()));
        let mut seen: BTreeSet<EntityId> = BTreeSet::new();
        let mut docs = Vec::with_capacity(values.len());
        let entry = report.collections.entry(name.clone()).or_default();

        for (index, value) in values.iter().enumerate() {
            let checked = Document::from_value(value.clone()).and_then(|doc| {
                if !seen.insert(doc.id().clone()) {
                    return Err(CoreError::validation(format!("duplicate id {}", doc.id())));
                }
                if let Some(validator) = &validator {
                    validator(value)?;
                }
                Ok(doc)
            });
            match checked {
                Ok(doc) => docs.push(doc),
                Err(err) => {
                    let message = format!("{name}[{index}]: {err}");
                    if mode == ImportMode::Replace {
                        return Err(CoreError::validation(message));
                    }
                    tracing::debug!(collection = %name, index, error = %err, "skipping invalid document");
                    entry.failed += 1;
                    entry.errors.push(message);
                }
            }
        }
        prepared.collections.insert(name.clone(), docs);
    }

    for (name, values) in &snapshot.logs {
        let validator = manager.validator(&Topic::Log(name.clone()));
        let mut events = Vec::with_capacity(values.len());
        let entry = report.logs.entry(name.clone()).or_default();

        for (index, value) in values.iter().enumerate() {
            let checked = match &validator {
                Some(validator) => validator(value),
                None => Ok(()),
            };
            match checked {
                Ok(()) => events.push(value.clone()),
                Err(err) => {
                    let message = format!("{name}[{index}]: {err}");
                    if mode == ImportMode::Replace {
                        return Err(CoreError::validation(message));
                    }
                    tracing::debug!(log = %name, index, error = %err, "skipping invalid event");
                    entry.failed += 1;
                    entry.errors.push(message);
                }
            }
        }
        prepared.logs.insert(name.clone(), events);
    }

    Ok(prepared)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
