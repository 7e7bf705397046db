//! Crash recovery testing for HearthDB.
//!
//! This module simulates crashes at various points and verifies that the
//! store recovers to exactly its committed state.
//!
//! ## Test Strategy
//!
//! 1. **Crash after commit** - committed batches survive a reopen
//! 2. **Crash mid-append** - the torn batch is dropped, earlier ones kept
//! 3. **Torn journal tail** - every truncation point recovers a prefix
//! 4. **Crash after checkpoint** - snapshot plus journal replay agree
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hearth_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new()?;
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use crate::fixtures::{Part, PARTS};
use hearth_core::{Config, CoreError, Database, ImportMode};
use hearth_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected entities after recovery.
    pub expected_entities: usize,
    /// Actual entities after recovery.
    pub actual_entities: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, entities: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_entities: entities,
            actual_entities: entities,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_entities: expected,
            actual_entities: actual,
            error: Some(error.to_string()),
        }
    }

    fn check(description: &str, expected: usize, actual: usize) -> Self {
        if expected == actual {
            Self::pass(description, actual)
        } else {
            Self::fail(description, expected, actual, "entity count mismatch")
        }
    }
}

/// Crash switches shared between a test and its [`CrashableBackend`].
#[derive(Debug)]
pub struct CrashControl {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
}

impl CrashControl {
    /// Creates a control that never crashes until armed.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
        })
    }

    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate a power loss.
///
/// Once crashed, every write fails and bytes already appended stay where
/// they are, the way a torn write looks after a restart.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: Arc<CrashControl>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>, control: Arc<CrashControl>) -> Self {
        Self { inner, control }
    }

    fn crashed_error(what: &str) -> StorageError {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }

    fn check(&self, what: &str) -> StorageResult<()> {
        if self.control.has_crashed() {
            Err(Self::crashed_error(what))
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.check("write")?;
        let current = self
            .control
            .bytes_written
            .fetch_add(bytes.len(), Ordering::SeqCst);
        let threshold = self.control.crash_after_bytes.load(Ordering::SeqCst);

        if current + bytes.len() > threshold {
            self.control.crashed.store(true, Ordering::SeqCst);
            let partial_len = threshold.saturating_sub(current);
            if partial_len > 0 {
                self.inner.append(&bytes[..partial_len])?;
            }
            return Err(Self::crashed_error("partial write"));
        }

        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check("flush")?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check("sync")?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check("truncate")?;
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.check("replace")?;
        self.inner.replace(data)
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    temp_dir: TempDir,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a new harness with a temporary directory.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
            results: Vec::new(),
        })
    }

    fn store_path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    fn seed(path: &Path, count: usize) -> Result<(), CoreError> {
        let db = Database::open(path)?;
        let parts = db.collection::<Part>(PARTS);
        for i in 0..count {
            parts.upsert(&Part::new(&format!("p{i}"), "seeded"))?;
        }
        db.close()
    }

    fn count_parts(path: &Path) -> Result<usize, CoreError> {
        let db = Database::open(path)?;
        let count = db.collection::<Part>(PARTS).count()?;
        db.close()?;
        Ok(count)
    }

    fn record(&mut self, description: &str, result: Result<CrashRecoveryResult, CoreError>) -> CrashRecoveryResult {
        let result = result.unwrap_or_else(|e| CrashRecoveryResult::fail(description, 0, 0, &e.to_string()));
        self.results.push(result.clone());
        result
    }

    /// Tests that committed data survives a close and reopen.
    pub fn test_committed_data_survives(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Committed data survives restart";
        let path = self.store_path("committed");
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            Self::seed(&path, 10)?;
            Ok(CrashRecoveryResult::check(DESC, 10, Self::count_parts(&path)?))
        })();
        self.record(DESC, result)
    }

    /// Tests that a batch torn mid-append is dropped on recovery.
    pub fn test_crash_mid_append(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Torn batch is dropped, earlier batches kept";
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            let journal = InMemoryBackend::new();
            let snapshot = InMemoryBackend::new();
            let control = CrashControl::new();

            let db = Database::open_with_backends(
                Config::default(),
                Box::new(CrashableBackend::new(Box::new(journal.share()), Arc::clone(&control))),
                Box::new(snapshot.share()),
            )?;
            let parts = db.collection::<Part>(PARTS);
            for i in 0..5 {
                parts.upsert(&Part::new(&format!("p{i}"), "before crash"))?;
            }

            control.crash_after(10);
            let crashed = parts.upsert(&Part::new("lost", "torn")).is_err();
            let in_memory = parts.count()?;
            drop(db);

            let recovered = Database::open_with_backends(
                Config::default(),
                Box::new(journal),
                Box::new(snapshot),
            )?;
            let count = recovered.collection::<Part>(PARTS).count()?;

            if !crashed || in_memory != 5 {
                return Ok(CrashRecoveryResult::fail(DESC, 5, in_memory, "failed commit became visible"));
            }
            Ok(CrashRecoveryResult::check(DESC, 5, count))
        })();
        self.record(DESC, result)
    }

    /// Tests that truncating the journal at every byte offset recovers a
    /// prefix of the committed batches.
    pub fn test_torn_tail_every_offset(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Every journal truncation recovers a prefix";
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            let journal = InMemoryBackend::new();
            {
                let db = Database::open_with_backends(
                    Config::default(),
                    Box::new(journal.share()),
                    Box::new(InMemoryBackend::new()),
                )?;
                let parts = db.collection::<Part>(PARTS);
                for i in 0..4 {
                    parts.upsert(&Part::new(&format!("p{i}"), "seeded"))?;
                }
            }

            let bytes = journal.data();
            let mut last = 0;
            for cut in 0..=bytes.len() {
                let db = Database::open_with_backends(
                    Config::default(),
                    Box::new(InMemoryBackend::with_data(bytes[..cut].to_vec())),
                    Box::new(InMemoryBackend::new()),
                )?;
                let count = db.collection::<Part>(PARTS).count()?;
                for i in 0..count {
                    if !db.collection::<Part>(PARTS).contains(format!("p{i}"))? {
                        return Ok(CrashRecoveryResult::fail(DESC, i + 1, i, "recovered a non-prefix"));
                    }
                }
                if count < last {
                    return Ok(CrashRecoveryResult::fail(DESC, last, count, "recovery went backwards"));
                }
                last = count;
            }
            Ok(CrashRecoveryResult::check(DESC, 4, last))
        })();
        self.record(DESC, result)
    }

    /// Tests recovery from a checkpoint followed by more journaled commits.
    pub fn test_checkpoint_then_journal(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Checkpoint plus journal replay";
        let path = self.store_path("checkpoint");
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            {
                let db = Database::open(&path)?;
                let parts = db.collection::<Part>(PARTS);
                for i in 0..6 {
                    parts.upsert(&Part::new(&format!("p{i}"), "seeded"))?;
                }
                db.checkpoint()?;
                parts.delete("p0")?;
                parts.upsert(&Part::new("p6", "after checkpoint"))?;
            }
            Ok(CrashRecoveryResult::check(DESC, 6, Self::count_parts(&path)?))
        })();
        self.record(DESC, result)
    }

    /// Tests that a replace import survives a restart as one unit.
    pub fn test_import_survives(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Imported snapshot survives restart";
        let path = self.store_path("import");
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            Self::seed(&path, 3)?;
            {
                let db = Database::open(&path)?;
                let json = r#"{"version":1,"exportedAt":0,"collections":{"parts":[
                    {"id":"x1","name":"imported","energy":10,"trust":10},
                    {"id":"x2","name":"imported","energy":10,"trust":10}]}}"#;
                db.import_json(json, ImportMode::Replace)?;
            }
            Ok(CrashRecoveryResult::check(DESC, 2, Self::count_parts(&path)?))
        })();
        self.record(DESC, result)
    }

    /// Runs every scenario.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        vec![
            self.test_committed_data_survives(),
            self.test_crash_mid_append(),
            self.test_torn_tail_every_offset(),
            self.test_checkpoint_then_journal(),
            self.test_import_survives(),
        ]
    }

    /// Returns a printable summary of the results so far.
    pub fn summary(&self) -> String {
        let mut out = String::from("Crash Recovery Results\n");
        for r in &self.results {
            let mark = if r.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!(
                "  [{mark}] {} (expected {}, got {})",
                r.description, r.expected_entities, r.actual_entities
            ));
            if let Some(error) = &r.error {
                out.push_str(&format!(": {error}"));
            }
            out.push('\n');
        }
        out
    }

    /// Returns true if every recorded result passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crashable_backend_normal_operation() {
        let control = CrashControl::new();
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()), control);
        backend.append(b"hello").unwrap();
        backend.flush().unwrap();
        assert_eq!(backend.read_all().unwrap(), b"hello");
    }

    #[test]
    fn crashable_backend_keeps_partial_write() {
        let inner = InMemoryBackend::new();
        let control = CrashControl::new();
        let mut backend = CrashableBackend::new(Box::new(inner.share()), Arc::clone(&control));

        control.crash_after(3);
        assert!(backend.append(b"hello").is_err());
        assert!(control.has_crashed());
        assert!(backend.truncate(0).is_err());
        assert_eq!(inner.data(), b"hel");
    }

    #[test]
    fn all_crash_recovery_scenarios() {
        let mut harness = CrashRecoveryHarness::new().unwrap();
        harness.run_all_tests();
        assert!(harness.all_passed(), "{}", harness.summary());
    }
}
