//! Transaction manager.

use crate::cascade::{CascadeRule, CascadeRules};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::notifier::{ChangeNotifier, Notification, Topic};
use crate::persistence::{PersistenceAdapter, Recovered};
use crate::state::StoreState;
use crate::transaction::state::Transaction;
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Boundary check for a collection or log, registered by typed handles.
pub(crate) type Validator = Arc<dyn Fn(&Value) -> CoreResult<()> + Send + Sync>;

/// Owns the committed state and serialises writers.
///
/// ## Single-Writer Guarantee
///
/// One transaction runs at a time. `write_lock` is held from the start of
/// the body until the commit has been applied; readers outside a
/// transaction take the state lock briefly and always see the latest
/// committed state.
pub struct TransactionManager {
    /// Committed state.
    state: RwLock<StoreState>,
    /// Durable storage.
    persistence: PersistenceAdapter,
    /// Observer registry.
    notifier: Arc<ChangeNotifier>,
    /// Cascade rules run by deletes.
    rules: RwLock<CascadeRules>,
    /// Boundary validators used by import.
    validators: RwLock<HashMap<Topic, Validator>>,
    /// Next transaction ID.
    next_txid: AtomicU64,
    /// Current committed sequence.
    committed_seq: AtomicU64,
    /// Write lock - only one writer at a time.
    write_lock: Mutex<()>,
    /// Thread currently running a transaction body.
    writer: Mutex<Option<ThreadId>>,
    /// Cleared by `close`.
    open: AtomicBool,
    max_journal_size: u64,
    default_log_size: usize,
}

/// Marks the current thread as the writer for as long as it lives.
struct WriterGuard<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> WriterGuard<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *slot.lock() = Some(thread::current().id());
        Self { slot }
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

impl TransactionManager {
    /// Creates a manager over recovered state.
    pub(crate) fn new(
        persistence: PersistenceAdapter,
        recovered: Recovered,
        rules: CascadeRules,
        config: &Config,
    ) -> Self {
        Self {
            state: RwLock::new(recovered.state),
            persistence,
            notifier: Arc::new(ChangeNotifier::new()),
            rules: RwLock::new(rules),
            validators: RwLock::new(HashMap::new()),
            next_txid: AtomicU64::new(recovered.last_txid.as_u64() + 1),
            committed_seq: AtomicU64::new(recovered.sequence.as_u64()),
            write_lock: Mutex::new(()),
            writer: Mutex::new(None),
            open: AtomicBool::new(true),
            max_journal_size: config.max_journal_size,
            default_log_size: config.default_log_max_size.max(1),
        }
    }

    /// Creates a manager over fresh in-memory backends.
    #[cfg(test)]
    pub(crate) fn in_memory(rules: CascadeRules) -> Self {
        let config = Config::default();
        let persistence = PersistenceAdapter::in_memory();
        let recovered = persistence
            .load(config.default_log_max_size)
            .expect("empty backends load");
        Self::new(persistence, recovered, rules, &config)
    }

    /// Runs `f` in a new transaction and commits it if `f` returns `Ok`.
    ///
    /// If `f` returns an error (or panics) the buffered writes are dropped:
    /// nothing is journaled, applied or notified. The commit's notification
    /// round is queued under the write lock and delivered after it is
    /// released, behind any rounds from earlier commits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` when called from inside a transaction body
    /// on the same thread; use [`Transaction::transact`] to join instead.
    pub fn transaction<R, F>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<R>,
    {
        self.ensure_open()?;
        self.ensure_not_writer()?;

        let value;
        {
            let _write_guard = self.write_lock.lock();
            let _writer = WriterGuard::enter(&self.writer);
            self.ensure_open()?;

            let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
            let mut txn = Transaction::new(self, txid);

            value = match f(&mut txn) {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(%txid, error = %err, "transaction rolled back");
                    return Err(err);
                }
            };
            if let Some(reason) = txn.abort_reason() {
                tracing::debug!(%txid, reason, "aborted transaction rolled back");
                return Err(CoreError::transaction_aborted(reason));
            }

            self.commit_inner(txn)?;
        }

        self.notifier.drain();
        Ok(value)
    }

    /// Internal commit implementation that assumes the write lock is held.
    ///
    /// Queues the notification round; the caller drains it once the lock
    /// is released.
    fn commit_inner(&self, txn: Transaction<'_>) -> CoreResult<()> {
        let txid = txn.id();
        let batch = txn.into_batch(&self.state.read());
        if batch.is_empty() {
            tracing::trace!(%txid, "empty transaction");
            return Ok(());
        }

        let sequence = self.committed_seq().next();

        // Journal first; a failed write leaves memory untouched.
        self.persistence.record(txid, sequence, &batch)?;

        let topics: BTreeSet<Topic> = batch.iter().map(|m| m.topic()).collect();
        let round: Vec<Notification> = {
            let mut state = self.state.write();
            for mutation in &batch {
                state.apply(mutation, self.default_log_size);
            }
            self.committed_seq
                .store(sequence.as_u64(), Ordering::SeqCst);

            topics
                .into_iter()
                .filter(|topic| self.notifier.has_subscribers(topic))
                .map(|topic| Notification {
                    snapshot: state.snapshot(&topic),
                    topic,
                    sequence,
                })
                .collect()
        };

        self.notifier.enqueue(round);

        tracing::debug!(%txid, %sequence, mutations = batch.len(), "transaction committed");
        self.maybe_checkpoint();
        Ok(())
    }

    /// Checkpoints when the journal has outgrown its configured size.
    ///
    /// The commit that triggered it is already durable, so a failure here
    /// is logged and retried after the next commit.
    fn maybe_checkpoint(&self) {
        if self.max_journal_size == 0 {
            return;
        }
        if self.persistence.journal_size() < self.max_journal_size {
            return;
        }
        if let Err(err) = self.checkpoint_locked() {
            tracing::warn!(error = %err, "automatic checkpoint failed");
        }
    }

    /// Writes a snapshot of committed state and clears the journal.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.ensure_not_writer()?;
        let _write_guard = self.write_lock.lock();
        self.checkpoint_locked()
    }

    fn checkpoint_locked(&self) -> CoreResult<()> {
        let state = self.state.read();
        let sequence = self.committed_seq();
        let last_txid = TransactionId::new(self.next_txid.load(Ordering::SeqCst).saturating_sub(1));
        self.persistence.checkpoint(&state, sequence, last_txid)?;
        tracing::info!(%sequence, "checkpoint written");
        Ok(())
    }

    /// Wipes durable storage and committed state.
    ///
    /// Rules, validators and subscriptions are kept. Every topic that held
    /// data is notified with its (now empty) snapshot.
    pub fn reset(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.ensure_not_writer()?;

        {
            let _write_guard = self.write_lock.lock();
            let last_txid = TransactionId::new(self.next_txid.load(Ordering::SeqCst).saturating_sub(1));
            self.persistence.reset(self.committed_seq(), last_txid)?;

            let mut state = self.state.write();
            let topics = state.non_empty_topics();
            *state = StoreState::default();
            self.committed_seq.store(0, Ordering::SeqCst);

            let round = topics
                .into_iter()
                .filter(|topic| self.notifier.has_subscribers(topic))
                .map(|topic| Notification {
                    snapshot: state.snapshot(&topic),
                    topic,
                    sequence: SequenceNumber::new(0),
                })
                .collect();
            self.notifier.enqueue(round);
        }

        tracing::info!("store reset");
        self.notifier.drain();
        Ok(())
    }

    /// Waits until every committed batch has reached the journal.
    pub fn flush(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.persistence.flush()
    }

    /// Stops accepting work and drains pending durability writes.
    ///
    /// Subscriptions are dropped. Calling `close` twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        if self.ensure_not_writer().is_err() {
            return Err(CoreError::invalid_operation(
                "cannot close the database from inside a transaction",
            ));
        }
        let _write_guard = self.write_lock.lock();
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.notifier.clear();
        self.persistence.shutdown()
    }

    /// Returns true until `close` has been called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    fn ensure_not_writer(&self) -> CoreResult<()> {
        if *self.writer.lock() == Some(thread::current().id()) {
            return Err(CoreError::invalid_operation(
                "a transaction is already open on this thread; use Transaction::transact to join it",
            ));
        }
        Ok(())
    }

    /// Returns the current committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read()
    }

    pub(crate) fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub(crate) fn persistence(&self) -> &PersistenceAdapter {
        &self.persistence
    }

    pub(crate) fn default_log_size(&self) -> usize {
        self.default_log_size
    }

    pub(crate) fn cascade_rules(&self) -> CascadeRules {
        self.rules.read().clone()
    }

    pub(crate) fn add_cascade_rule(&self, rule: CascadeRule) {
        tracing::debug!(owner = %rule.owner, dependent = %rule.dependent, "cascade rule added");
        self.rules.write().add(rule);
    }

    pub(crate) fn register_validator(&self, topic: Topic, validator: Validator) {
        self.validators.write().insert(topic, validator);
    }

    pub(crate) fn validator(&self, topic: &Topic) -> Option<Validator> {
        self.validators.read().get(topic).cloned()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("committed_seq", &self.committed_seq())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
