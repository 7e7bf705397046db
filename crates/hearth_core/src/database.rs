//! Database facade and lifecycle.

use crate::cascade::{CascadeRule, CascadeRules};
use crate::collection::Collection;
use crate::config::Config;
use crate::dir::StoreDir;
use crate::entity::{Document, Entity};
use crate::error::{CoreError, CoreResult};
use crate::export::{self, ImportMode, ImportReport, Snapshot};
use crate::log::{Event, Log};
use crate::notifier::{Notification, Subscription, Topic};
use crate::persistence::PersistenceAdapter;
use crate::transaction::{Transaction, TransactionManager, Validator};
use crate::types::SequenceNumber;
use hearth_storage::StorageBackend;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// The main store handle.
///
/// `Database` is the explicit handle every consumer is given. It provides:
/// - Typed collection and log handles
/// - Transactions
/// - Cascade rule registration
/// - Observation
/// - Snapshot export and import
/// - Checkpoint, reset and close
///
/// # Opening a Store
///
/// `open` returns once durable state has been loaded into memory, so the
/// store is ready for bootstrapping as soon as it returns:
///
/// ```rust,ignore
/// use hearth_core::Database;
///
/// let db = Database::open("data/hearth")?;
/// let parts = db.collection::<Part>("parts");
///
/// if parts.count()? == 0 {
///     parts.upsert(&Part::default_roster())?;
/// }
///
/// db.close()?;
/// ```
///
/// # In-Memory Stores
///
/// ```rust,ignore
/// let db = Database::open_in_memory()?;
/// ```
pub struct Database {
    /// Configuration.
    config: Config,
    /// Store directory (holds the lock). None for other backends.
    dir: Option<StoreDir>,
    /// Transaction manager, shared with every handle.
    manager: Arc<TransactionManager>,
}

/// Counts reported by [`Database::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Documents per collection.
    pub collections: BTreeMap<String, usize>,
    /// Events per log.
    pub logs: BTreeMap<String, usize>,
    /// Total documents.
    pub documents: usize,
    /// Total events.
    pub events: usize,
    /// Last committed sequence number.
    pub sequence: SequenceNumber,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Snapshot size in bytes.
    pub snapshot_size: u64,
}

impl Database {
    /// Opens or creates a store in a directory.
    ///
    /// # Errors
    ///
    /// - another process has the store open (`DatabaseLocked`)
    /// - the journal or snapshot is damaged (`JournalCorruption`,
    ///   `ChecksumMismatch`, `InvalidFormat`)
    /// - I/O errors
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a store in a directory with custom configuration.
    ///
    /// ```rust,ignore
    /// use hearth_core::{Config, Database, Durability};
    ///
    /// let config = Config::default()
    ///     .durability(Durability::Deferred)
    ///     .max_journal_size(1024 * 1024);
    ///
    /// let db = Database::open_with_config("data/hearth", config)?;
    /// ```
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        use hearth_storage::FileBackend;

        let path = path.as_ref();
        let dir = StoreDir::open(path, config.create_if_missing)?;
        if config.error_if_exists && !dir.is_empty() {
            return Err(CoreError::invalid_format(format!(
                "store {} already exists and error_if_exists is set",
                dir.name()
            )));
        }

        let journal = FileBackend::open_with_create_dirs(&dir.journal_path())?;
        let image = FileBackend::open(&dir.snapshot_path())?;
        let manager = Self::start(&config, Box::new(journal), Box::new(image))?;

        tracing::info!(
            store = %dir.name(),
            path = %path.display(),
            sequence = %manager.committed_seq(),
            "store opened"
        );
        Ok(Self {
            config,
            dir: Some(dir),
            manager,
        })
    }

    /// Opens a store over caller-supplied backends.
    ///
    /// A lower-level constructor; most callers want [`open`](Self::open).
    pub fn open_with_backends(
        config: Config,
        journal: Box<dyn StorageBackend>,
        snapshot: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let manager = Self::start(&config, journal, snapshot)?;
        Ok(Self {
            config,
            dir: None,
            manager,
        })
    }

    /// Opens a fresh store that lives only in memory.
    pub fn open_in_memory() -> CoreResult<Self> {
        use hearth_storage::InMemoryBackend;
        Self::open_with_backends(
            Config::default(),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    fn start(
        config: &Config,
        journal: Box<dyn StorageBackend>,
        snapshot: Box<dyn StorageBackend>,
    ) -> CoreResult<Arc<TransactionManager>> {
        let persistence = PersistenceAdapter::new(journal, snapshot, config.durability)?;
        let recovered = persistence.load(config.default_log_max_size)?;
        Ok(Arc::new(TransactionManager::new(
            persistence,
            recovered,
            CascadeRules::new(),
            config,
        )))
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Returns a typed handle to a collection.
    ///
    /// Registers `T` as the collection's boundary type: imports reject
    /// documents that do not decode as `T`.
    pub fn collection<T: Entity>(&self, name: &str) -> Collection<T> {
        let collection = name.to_string();
        let validator: Validator = Arc::new(move |value: &Value| {
            serde_json::from_value::<T>(value.clone())
                .map(|_| ())
                .map_err(|e| CoreError::validation(format!("not a valid {collection} entry: {e}")))
        });
        self.manager
            .register_validator(Topic::Collection(name.to_string()), validator);
        Collection::new(name, Arc::clone(&self.manager))
    }

    /// Returns an untyped handle to a collection.
    ///
    /// Does not change the collection's boundary type.
    pub fn documents(&self, name: &str) -> Collection<Document> {
        Collection::new(name, Arc::clone(&self.manager))
    }

    /// Returns a typed handle to a log that keeps its newest `max_size`
    /// events.
    ///
    /// The current bound is read and, if it differs, changed (and the log
    /// trimmed) within one transaction. A matching bound commits nothing.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `max_size` is zero, and
    /// `InvalidOperation` when called from inside a transaction body.
    pub fn log<T: Event>(&self, name: &str, max_size: usize) -> CoreResult<Log<T>> {
        if max_size == 0 {
            return Err(CoreError::validation(format!(
                "log {name} must keep at least one event"
            )));
        }

        let log = name.to_string();
        let validator: Validator = Arc::new(move |value: &Value| {
            serde_json::from_value::<T>(value.clone())
                .map(|_| ())
                .map_err(|e| CoreError::validation(format!("not a valid {log} event: {e}")))
        });
        self.manager
            .register_validator(Topic::Log(name.to_string()), validator);

        self.manager.transaction(|txn| {
            if txn.log_bound(name)? == Some(max_size) {
                return Ok(());
            }
            txn.set_log_bound(name, max_size)
        })?;
        Ok(Log::new(name, Arc::clone(&self.manager)))
    }

    // ========================================================================
    // Cascade Rules
    // ========================================================================

    /// Registers a cascade rule.
    pub fn add_cascade_rule(&self, rule: CascadeRule) {
        self.manager.add_cascade_rule(rule);
    }

    /// Registers every rule of a table, in order.
    pub fn add_cascade_rules(&self, rules: CascadeRules) {
        for rule in rules.iter() {
            self.manager.add_cascade_rule(rule.clone());
        }
    }

    /// Returns the registered rules, in registration order.
    #[must_use]
    pub fn cascade_rules(&self) -> Vec<CascadeRule> {
        self.manager.cascade_rules().iter().cloned().collect()
    }

    // ========================================================================
    // Transactions and Observation
    // ========================================================================

    /// Runs `f` in a transaction and commits it if `f` returns `Ok`.
    ///
    /// If `f` fails nothing is written. Reads through `txn` see the
    /// transaction's own writes.
    ///
    /// ```rust,ignore
    /// db.transaction(|txn| {
    ///     let mut part = parts.require_in_txn(txn, "p1")?;
    ///     part.energy -= 10;
    ///     parts.upsert_in_txn(txn, &part)?;
    ///     ledger.push_in_txn(txn, &Spend { part: part.id.clone(), amount: 10 })
    /// })?;
    /// ```
    pub fn transaction<R, F>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<R>,
    {
        self.manager.transaction(f)
    }

    /// Observes a topic with the raw notification.
    ///
    /// Typed handles offer [`Collection::observe`] and [`Log::observe`].
    pub fn observe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.manager.notifier().subscribe(topic, callback)
    }

    // ========================================================================
    // Export and Import
    // ========================================================================

    /// Copies every collection and log into a snapshot.
    pub fn export(&self) -> CoreResult<Snapshot> {
        export::export(&self.manager)
    }

    /// Exports as pretty-printed JSON.
    pub fn export_json(&self) -> CoreResult<String> {
        self.export()?.to_json()
    }

    /// Loads a snapshot in one transaction.
    ///
    /// # Errors
    ///
    /// In `Replace` mode any invalid item fails the whole import with a
    /// validation error and nothing is written. In `Merge` mode invalid
    /// items are reported in the [`ImportReport`] instead.
    pub fn import(&self, snapshot: &Snapshot, mode: ImportMode) -> CoreResult<ImportReport> {
        export::import(&self.manager, snapshot, mode)
    }

    /// Parses and imports a JSON snapshot.
    pub fn import_json(&self, json: &str, mode: ImportMode) -> CoreResult<ImportReport> {
        self.import(&Snapshot::from_json(json)?, mode)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Writes a snapshot and clears the journal.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.manager.checkpoint()
    }

    /// Wipes durable storage and memory.
    ///
    /// Rules, typed handles and subscriptions keep working; observers of
    /// every topic that held data receive an empty snapshot. The store is
    /// ready to be re-seeded when this returns.
    pub fn reset(&self) -> CoreResult<()> {
        self.manager.reset()
    }

    /// Waits until every commit has reached the journal.
    pub fn flush(&self) -> CoreResult<()> {
        self.manager.flush()
    }

    /// Closes the store. Further calls fail with `DatabaseClosed`.
    pub fn close(&self) -> CoreResult<()> {
        self.manager.close()
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.manager.is_open()
    }

    /// Returns the last committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.manager.committed_seq()
    }

    /// Returns store counts.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        self.manager.ensure_open()?;
        let persistence = self.manager.persistence();
        let state = self.manager.read_state();
        Ok(StoreStats {
            collections: state
                .collections
                .iter()
                .map(|(name, map)| (name.clone(), map.len()))
                .collect(),
            logs: state
                .logs
                .iter()
                .map(|(name, log)| (name.clone(), log.len()))
                .collect(),
            documents: state.document_count(),
            events: state.event_count(),
            sequence: self.manager.committed_seq(),
            journal_size: persistence.journal_size(),
            snapshot_size: persistence.image_size(),
        })
    }

    /// Returns the names of every collection, sorted.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.manager.read_state().collections.keys().cloned().collect()
    }

    /// Returns the names of every log, sorted.
    #[must_use]
    pub fn log_names(&self) -> Vec<String> {
        self.manager.read_state().logs.keys().cloned().collect()
    }

    /// Returns the store directory, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "close on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::TopicSnapshot;
    use crate::ErrorKind;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Part {
        id: String,
        name: String,
    }

    impl Entity for Part {
        fn id(&self) -> crate::EntityId {
            self.id.as_str().into()
        }
    }

    fn part(id: &str) -> Part {
        Part {
            id: id.to_string(),
            name: format!("part {id}"),
        }
    }

    fn create_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = create_db();
        assert!(db.is_open());
        assert!(db.path().is_none());
        assert_eq!(db.committed_seq(), SequenceNumber::new(0));
    }

    #[test]
    fn collections_share_one_transaction() {
        let db = create_db();
        let parts = db.collection::<Part>("parts");
        let tags = db.documents("tags");

        db.transaction(|txn| {
            parts.upsert_in_txn(txn, &part("p1"))?;
            tags.upsert_in_txn(txn, &Document::from_value(json!({"id": "t1", "partId": "p1"}))?)
        })
        .unwrap();

        assert_eq!(db.committed_seq(), SequenceNumber::new(1));
        assert_eq!(db.collection_names(), vec!["parts", "tags"]);
    }

    #[test]
    fn log_names_list_pushed_logs() {
        let db = create_db();
        let ledger = db.log::<Value>("ledger", 3).unwrap();
        ledger.push(&json!({"amount": 1})).unwrap();

        assert_eq!(db.log_names(), vec!["ledger"]);
        assert!(db.collection_names().is_empty());
    }

    #[test]
    fn zero_log_bound_is_rejected() {
        let db = create_db();
        let err = db.log::<Value>("ledger", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn shrinking_log_bound_trims() {
        let db = create_db();
        let ledger = db.log::<i64>("ledger", 10).unwrap();
        for n in 0..6 {
            ledger.push(&n).unwrap();
        }

        let ledger = db.log::<i64>("ledger", 3).unwrap();
        assert_eq!(ledger.to_vec().unwrap(), vec![3, 4, 5]);
        assert_eq!(ledger.max_size().unwrap(), 3);
    }

    #[test]
    fn same_log_bound_commits_nothing() {
        let db = create_db();
        db.log::<i64>("ledger", 3).unwrap();
        let seq = db.committed_seq();

        db.log::<i64>("ledger", 3).unwrap();
        assert_eq!(db.committed_seq(), seq);

        db.log::<i64>("ledger", 4).unwrap();
        assert_eq!(db.committed_seq(), seq.next());
    }

    #[test]
    fn auto_wrapping_write_inside_a_body_is_rejected() {
        let db = create_db();
        let parts = db.collection::<Part>("parts");
        let ledger = db.log::<i64>("ledger", 3).unwrap();

        let err = db
            .transaction(|_| parts.upsert(&part("p1")))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));

        let err = db.transaction(|_| ledger.push(&1)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));

        db.transaction(|txn| parts.upsert_in_txn(txn, &part("p1")))
            .unwrap();
        assert!(parts.contains("p1").unwrap());
    }

    #[test]
    fn observer_commits_are_delivered_in_commit_order() {
        let db = create_db();
        let parts = db.collection::<Part>("parts");

        // The first observer tops the collection up once it sees one part.
        let writer = parts.clone();
        let _auto = db.observe(Topic::Collection("parts".into()), move |n| {
            if let TopicSnapshot::Collection(docs) = &n.snapshot {
                if docs.len() == 1 {
                    writer.upsert(&part("auto")).unwrap();
                }
            }
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _recorder = db.observe(Topic::Collection("parts".into()), move |n| {
            if let TopicSnapshot::Collection(docs) = &n.snapshot {
                s.lock().push((n.sequence.as_u64(), docs.len()));
            }
        });

        parts.upsert(&part("p1")).unwrap();

        assert_eq!(*seen.lock(), vec![(1, 1), (2, 2)]);
        assert_eq!(parts.count().unwrap(), 2);
    }

    #[test]
    fn concurrent_commits_reach_observers_in_sequence_order() {
        let db = create_db();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = db.observe(Topic::Collection("parts".into()), move |n| {
            s.lock().push(n.sequence.as_u64());
        });

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let parts = db.collection::<Part>("parts");
                std::thread::spawn(move || {
                    for n in 0..25 {
                        parts.upsert(&part(&format!("p{t}-{n}"))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock();
        assert_eq!(*seen, (1..=100).collect::<Vec<u64>>());
    }

    #[test]
    fn cascade_rules_are_enumerable() {
        let db = create_db();
        db.add_cascade_rule(CascadeRule::delete_dependent("parts", "tags", "partId"));
        db.add_cascade_rules(
            CascadeRules::new().with(CascadeRule::filter_array("parts", "circles", "memberIds")),
        );

        let rules = db.cascade_rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].dependent, "circles");
    }

    #[test]
    fn raw_observe_gets_full_snapshot() {
        let db = create_db();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = db.observe(Topic::Collection("parts".into()), move |n| {
            if let TopicSnapshot::Collection(docs) = &n.snapshot {
                s.lock().push((n.sequence, docs.len()));
            }
        });

        let parts = db.collection::<Part>("parts");
        parts.upsert(&part("p1")).unwrap();
        parts.upsert(&part("p2")).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![(SequenceNumber::new(1), 1), (SequenceNumber::new(2), 2)]
        );
    }

    #[test]
    fn typed_validator_guards_import() {
        let db = create_db();
        let _parts = db.collection::<Part>("parts");
        let json = r#"{
            "version": 1,
            "exportedAt": 0,
            "collections": { "parts": [ { "id": "p1", "name": "Ada" }, { "id": "p2" } ] }
        }"#;

        let err = db.import_json(json, ImportMode::Replace).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let report = db.import_json(json, ImportMode::Merge).unwrap();
        assert_eq!(report.imported(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn export_import_round_trip() {
        let db = create_db();
        let parts = db.collection::<Part>("parts");
        let ledger = db.log::<i64>("ledger", 5).unwrap();
        parts.upsert(&part("p1")).unwrap();
        parts.upsert(&part("p2")).unwrap();
        ledger.push(&7).unwrap();

        let json = db.export_json().unwrap();
        let before = parts.get_all().unwrap();
        db.reset().unwrap();
        assert!(parts.get_all().unwrap().is_empty());

        db.import_json(&json, ImportMode::Replace).unwrap();
        assert_eq!(parts.get_all().unwrap(), before);
        assert_eq!(ledger.to_vec().unwrap(), vec![7]);
    }

    #[test]
    fn reset_notifies_and_allows_reseed() {
        let db = create_db();
        let parts = db.collection::<Part>("parts");
        parts.upsert(&part("p1")).unwrap();

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&sizes);
        let _sub = parts.observe(move |all| s.lock().push(all.len()));

        db.reset().unwrap();
        assert_eq!(db.committed_seq(), SequenceNumber::new(0));
        parts.upsert(&part("p9")).unwrap();

        assert_eq!(*sizes.lock(), vec![0, 1]);
    }

    #[test]
    fn closed_database_rejects_work() {
        let db = create_db();
        let parts = db.collection::<Part>("parts");
        db.close().unwrap();

        assert!(!db.is_open());
        assert!(matches!(parts.get("p1"), Err(CoreError::DatabaseClosed)));
        assert!(matches!(db.export(), Err(CoreError::DatabaseClosed)));
        assert_eq!(
            db.transaction(|_| Ok(())).unwrap_err().kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn stats_count_everything() {
        let db = create_db();
        let parts = db.collection::<Part>("parts");
        let ledger = db.log::<i64>("ledger", 10).unwrap();
        parts.upsert(&part("p1")).unwrap();
        ledger.push(&1).unwrap();
        ledger.push(&2).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.collections["parts"], 1);
        assert_eq!(stats.logs["ledger"], 2);
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.events, 2);
        assert!(stats.journal_size > 0);
    }
}
