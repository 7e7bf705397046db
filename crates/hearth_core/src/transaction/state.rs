//! Transaction state.

use crate::cascade;
use crate::entity::{Document, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::log::bounded_view;
use crate::state::{Mutation, StoreState};
use crate::transaction::TransactionManager;
use crate::types::TransactionId;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// A joined scope failed; the transaction can no longer commit.
    Aborted,
}

/// Represents a pending write in a transaction.
#[derive(Debug, Clone)]
pub(crate) enum PendingWrite {
    /// Insert or replace a document.
    Put(Document),
    /// Delete a document that exists in committed state.
    Delete,
}

#[derive(Debug, Default)]
struct PendingCollection {
    cleared: bool,
    writes: BTreeMap<EntityId, PendingWrite>,
}

#[derive(Debug, Default)]
struct PendingLog {
    cleared: bool,
    bound: Option<usize>,
    appended: Vec<Value>,
}

/// An open transaction.
///
/// Writes are buffered here and reach the committed state only when the
/// enclosing [`Database::transaction`](crate::Database::transaction) body
/// returns `Ok`. Reads through the transaction see its own pending writes
/// layered over committed state.
pub struct Transaction<'a> {
    manager: &'a TransactionManager,
    id: TransactionId,
    state: TransactionState,
    abort_reason: Option<String>,
    collections: BTreeMap<String, PendingCollection>,
    logs: BTreeMap<String, PendingLog>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(manager: &'a TransactionManager, id: TransactionId) -> Self {
        Self {
            manager,
            id,
            state: TransactionState::Active,
            abort_reason: None,
            collections: BTreeMap::new(),
            logs: BTreeMap::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub(crate) fn manager(&self) -> &'a TransactionManager {
        self.manager
    }

    pub(crate) fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Runs `f` inside this transaction.
    ///
    /// There is no separate commit point: the writes `f` makes commit or
    /// roll back with the enclosing transaction. If `f` fails, the whole
    /// transaction is marked aborted and will refuse to commit even if the
    /// caller handles the error.
    pub fn transact<R, F>(&mut self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut Self) -> CoreResult<R>,
    {
        self.ensure_active()?;
        let result = f(self);
        if let Err(err) = &result {
            if self.abort_reason.is_none() {
                self.abort_reason = Some(err.to_string());
            }
            self.state = TransactionState::Aborted;
        }
        result
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    /// Gets a document, seeing this transaction's own writes.
    pub fn get(&self, collection: &str, id: &str) -> CoreResult<Option<Document>> {
        self.ensure_active()?;
        Ok(self.lookup(collection, id))
    }

    /// Returns every document in a collection, in id order.
    pub fn get_all(&self, collection: &str) -> CoreResult<Vec<Document>> {
        self.ensure_active()?;
        Ok(self.scan(collection))
    }

    /// Returns the number of documents in a collection.
    pub fn count(&self, collection: &str) -> CoreResult<usize> {
        self.ensure_active()?;
        Ok(self.scan(collection).len())
    }

    /// Inserts or replaces a document.
    pub fn upsert(&mut self, collection: &str, doc: Document) -> CoreResult<()> {
        self.ensure_active()?;
        self.pending_collection(collection)
            .writes
            .insert(doc.id().clone(), PendingWrite::Put(doc));
        Ok(())
    }

    /// Merges `partial` into an existing document.
    ///
    /// Returns `Ok(false)` without writing anything if `id` is absent.
    pub fn update(
        &mut self,
        collection: &str,
        id: &str,
        partial: &Map<String, Value>,
    ) -> CoreResult<bool> {
        self.ensure_active()?;
        let Some(mut doc) = self.lookup(collection, id) else {
            tracing::debug!(txid = %self.id, collection, id, "update of absent entity ignored");
            return Ok(false);
        };
        doc.merge(partial)?;
        self.upsert(collection, doc)?;
        Ok(true)
    }

    /// Deletes a document and runs the cascade rules registered for its
    /// collection.
    ///
    /// Deleting an absent id is a no-op and returns `Ok(false)`. If a
    /// guard rejects the deletion nothing is written and
    /// [`CoreError::IntegrityViolation`] is returned.
    pub fn delete(&mut self, collection: &str, id: &str) -> CoreResult<bool> {
        self.ensure_active()?;
        cascade::delete(self, collection, id)
    }

    /// Removes every document from a collection without running cascades.
    pub fn clear_collection(&mut self, collection: &str) -> CoreResult<()> {
        self.ensure_active()?;
        let pending = self.pending_collection(collection);
        pending.cleared = true;
        pending.writes.clear();
        Ok(())
    }

    /// Removes a document without running cascades.
    pub(crate) fn remove(&mut self, collection: &str, id: &str) {
        let committed = self
            .manager
            .read_state()
            .collections
            .get(collection)
            .is_some_and(|map| map.contains(id));
        let pending = self.pending_collection(collection);
        if committed && !pending.cleared {
            pending.writes.insert(EntityId::from(id), PendingWrite::Delete);
        } else {
            pending.writes.remove(id);
        }
    }

    fn lookup(&self, collection: &str, id: &str) -> Option<Document> {
        let pending = self.collections.get(collection);
        if let Some(write) = pending.and_then(|p| p.writes.get(id)) {
            return match write {
                PendingWrite::Put(doc) => Some(doc.clone()),
                PendingWrite::Delete => None,
            };
        }
        if pending.is_some_and(|p| p.cleared) {
            return None;
        }
        self.manager
            .read_state()
            .collections
            .get(collection)
            .and_then(|map| map.get(id))
            .cloned()
    }

    fn scan(&self, collection: &str) -> Vec<Document> {
        let pending = self.collections.get(collection);
        let mut view: BTreeMap<EntityId, Document> = BTreeMap::new();

        if !pending.is_some_and(|p| p.cleared) {
            if let Some(map) = self.manager.read_state().collections.get(collection) {
                view.extend(map.iter().map(|doc| (doc.id().clone(), doc.clone())));
            }
        }
        if let Some(pending) = pending {
            for (id, write) in &pending.writes {
                match write {
                    PendingWrite::Put(doc) => {
                        view.insert(id.clone(), doc.clone());
                    }
                    PendingWrite::Delete => {
                        view.remove(id);
                    }
                }
            }
        }
        view.into_values().collect()
    }

    fn pending_collection(&mut self, collection: &str) -> &mut PendingCollection {
        self.collections.entry(collection.to_string()).or_default()
    }

    // ------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------

    /// Appends an event to a log.
    pub fn push_event(&mut self, log: &str, event: Value) -> CoreResult<()> {
        self.ensure_active()?;
        self.pending_log(log).appended.push(event);
        Ok(())
    }

    /// Returns the events of a log, oldest first, already trimmed to its
    /// bound.
    pub fn log_events(&self, log: &str) -> CoreResult<Vec<Value>> {
        self.ensure_active()?;
        let state = self.manager.read_state();
        let committed = state.logs.get(log);
        let Some(pending) = self.logs.get(log) else {
            return Ok(committed.map(|l| l.to_vec()).unwrap_or_default());
        };

        let bound = self.effective_bound(log, &state);
        let events = match committed {
            Some(l) if !pending.cleared => bounded_view(l.iter(), &pending.appended, bound),
            _ => bounded_view(std::iter::empty(), &pending.appended, bound),
        };
        Ok(events)
    }

    /// Sets the retention bound of a log, creating it if needed.
    pub fn set_log_bound(&mut self, log: &str, max_size: usize) -> CoreResult<()> {
        self.ensure_active()?;
        if max_size == 0 {
            return Err(CoreError::validation(format!(
                "log {log} must keep at least one event"
            )));
        }
        self.pending_log(log).bound = Some(max_size);
        Ok(())
    }

    /// Returns the retention bound this transaction sees for a log, or
    /// `None` if the log does not exist yet.
    pub fn log_bound(&self, log: &str) -> CoreResult<Option<usize>> {
        self.ensure_active()?;
        let state = self.manager.read_state();
        if self.logs.contains_key(log) || state.logs.contains_key(log) {
            Ok(Some(self.effective_bound(log, &state)))
        } else {
            Ok(None)
        }
    }

    /// Removes every event from a log.
    pub fn clear_log(&mut self, log: &str) -> CoreResult<()> {
        self.ensure_active()?;
        let pending = self.pending_log(log);
        pending.cleared = true;
        pending.appended.clear();
        Ok(())
    }

    fn pending_log(&mut self, log: &str) -> &mut PendingLog {
        self.logs.entry(log.to_string()).or_default()
    }

    fn effective_bound(&self, log: &str, state: &StoreState) -> usize {
        self.logs
            .get(log)
            .and_then(|p| p.bound)
            .or_else(|| state.logs.get(log).map(|l| l.max_size()))
            .unwrap_or_else(|| self.manager.default_log_size())
    }

    // ------------------------------------------------------------------
    // Commit support
    // ------------------------------------------------------------------

    /// Returns the number of buffered document writes and log appends.
    #[must_use]
    pub fn write_count(&self) -> usize {
        let docs: usize = self.collections.values().map(|p| p.writes.len()).sum();
        let events: usize = self.logs.values().map(|p| p.appended.len()).sum();
        docs + events
    }

    /// Turns the buffered writes into the ordered batch that commit
    /// journals and applies.
    pub(crate) fn into_batch(self, state: &StoreState) -> Vec<Mutation> {
        let mut batch = Vec::new();

        for (name, pending) in &self.collections {
            let committed = state.collections.get(name);
            if pending.cleared && committed.is_some_and(|map| !map.is_empty()) {
                batch.push(Mutation::ClearCollection {
                    collection: name.clone(),
                });
            }
            for (id, write) in &pending.writes {
                batch.push(match write {
                    PendingWrite::Put(doc) => Mutation::Put {
                        collection: name.clone(),
                        document: doc.clone(),
                    },
                    PendingWrite::Delete => Mutation::Delete {
                        collection: name.clone(),
                        id: id.clone(),
                    },
                });
            }
        }

        for (name, pending) in &self.logs {
            let committed = state.logs.get(name);
            if pending.cleared && committed.is_some_and(|l| !l.is_empty()) {
                batch.push(Mutation::ClearLog { log: name.clone() });
            }

            let bound = self.effective_bound(name, state);
            let creates = committed.is_none() && (pending.bound.is_some() || !pending.appended.is_empty());
            if creates || committed.is_some_and(|l| l.max_size() != bound) {
                batch.push(Mutation::Bound {
                    log: name.clone(),
                    max_size: bound as u64,
                });
            }

            // events that would be evicted by later appends in this batch
            let skip = pending.appended.len().saturating_sub(bound);
            for event in &pending.appended[skip..] {
                batch.push(Mutation::Append {
                    log: name.clone(),
                    event: event.clone(),
                });
            }
        }

        batch
    }

    fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Aborted => Err(CoreError::transaction_aborted(
                self.abort_reason
                    .clone()
                    .unwrap_or_else(|| "transaction aborted".to_string()),
            )),
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("write_count", &self.write_count())
            .finish_non_exhaustive()
    }
}
