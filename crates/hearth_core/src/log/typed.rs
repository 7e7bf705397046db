//! Typed log handle.

use crate::error::{CoreError, CoreResult};
use crate::notifier::{Subscription, Topic, TopicSnapshot};
use crate::transaction::{Transaction, TransactionManager};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Trait for values that can be appended to a log.
///
/// Implemented for every serde type that is `Clone + Send + Sync`.
pub trait Event: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Event for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A typed view of a bounded log.
///
/// The log keeps its newest `max_size` events. An append that overflows
/// the bound evicts the oldest events in the same commit, and reads inside
/// a transaction already see the trimmed view.
///
/// As with [`Collection`](crate::Collection), the writes without a
/// transaction argument fail with `InvalidOperation` inside a transaction
/// body; use the `*_in_txn` variants there.
pub struct Log<T: Event> {
    name: String,
    manager: Arc<TransactionManager>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Event> Log<T> {
    pub(crate) fn new(name: impl Into<String>, manager: Arc<TransactionManager>) -> Self {
        Self {
            name: name.into(),
            manager,
            _marker: PhantomData,
        }
    }

    /// Returns the log name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the retention bound.
    pub fn max_size(&self) -> CoreResult<usize> {
        self.manager.ensure_open()?;
        Ok(self
            .manager
            .read_state()
            .logs
            .get(&self.name)
            .map_or(self.manager.default_log_size(), |log| log.max_size()))
    }

    /// Appends an event in its own transaction.
    pub fn push(&self, event: &T) -> CoreResult<()> {
        self.manager.transaction(|txn| self.push_in_txn(txn, event))
    }

    /// Appends an event inside a transaction.
    pub fn push_in_txn(&self, txn: &mut Transaction<'_>, event: &T) -> CoreResult<()> {
        self.check_txn(txn)?;
        txn.push_event(&self.name, serde_json::to_value(event)?)
    }

    /// Returns the committed events, oldest first.
    pub fn to_vec(&self) -> CoreResult<Vec<T>> {
        self.manager.ensure_open()?;
        let state = self.manager.read_state();
        match state.logs.get(&self.name) {
            Some(log) => log.iter().map(|v| decode(&self.name, v)).collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Returns the events as seen by the transaction, oldest first.
    pub fn to_vec_in_txn(&self, txn: &Transaction<'_>) -> CoreResult<Vec<T>> {
        self.check_txn(txn)?;
        txn.log_events(&self.name)?
            .iter()
            .map(|v| decode(&self.name, v))
            .collect()
    }

    /// Returns the number of committed events.
    pub fn len(&self) -> CoreResult<usize> {
        self.manager.ensure_open()?;
        Ok(self
            .manager
            .read_state()
            .logs
            .get(&self.name)
            .map_or(0, |log| log.len()))
    }

    /// Returns true if the log holds no committed events.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every event.
    pub fn clear(&self) -> CoreResult<()> {
        self.manager.transaction(|txn| txn.clear_log(&self.name))
    }

    /// Calls `callback` with every event after each commit that touched
    /// this log.
    ///
    /// Events that no longer decode as `T` are logged and skipped.
    pub fn observe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        let name = self.name.clone();
        self.manager
            .notifier()
            .subscribe(Topic::Log(self.name.clone()), move |n| {
                let TopicSnapshot::Log(events) = &n.snapshot else {
                    return;
                };
                let decoded = events
                    .iter()
                    .filter_map(|v| match decode::<T>(&name, v) {
                        Ok(event) => Some(event),
                        Err(err) => {
                            tracing::warn!(log = %name, error = %err, "skipping undecodable event");
                            None
                        }
                    })
                    .collect();
                callback(decoded);
            })
    }

    fn check_txn(&self, txn: &Transaction<'_>) -> CoreResult<()> {
        if std::ptr::eq(txn.manager(), Arc::as_ptr(&self.manager)) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "log {} used with a transaction of another database",
                self.name
            )))
        }
    }
}

fn decode<T: Event>(log: &str, value: &Value) -> CoreResult<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| CoreError::validation(format!("event in log {log} does not decode: {e}")))
}

impl<T: Event> Clone for Log<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            manager: Arc::clone(&self.manager),
            _marker: PhantomData,
        }
    }
}

impl<T: Event> fmt::Debug for Log<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::CascadeRules;
    use crate::config::Config;
    use crate::persistence::PersistenceAdapter;
    use parking_lot::Mutex;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        amount: i64,
    }

    fn ledger(max_size: usize) -> Log<Entry> {
        let config = Config::default();
        let persistence = PersistenceAdapter::in_memory();
        let recovered = persistence.load(config.default_log_max_size).unwrap();
        let manager = Arc::new(TransactionManager::new(
            persistence,
            recovered,
            CascadeRules::new(),
            &config,
        ));
        manager
            .transaction(|txn| txn.set_log_bound("ledger", max_size))
            .unwrap();
        Log::new("ledger", manager)
    }

    fn entry(amount: i64) -> Entry {
        Entry { amount }
    }

    #[test]
    fn push_keeps_newest() {
        let log = ledger(3);
        for amount in 1..=5 {
            log.push(&entry(amount)).unwrap();
        }

        assert_eq!(log.to_vec().unwrap(), vec![entry(3), entry(4), entry(5)]);
        assert_eq!(log.len().unwrap(), 3);
        assert_eq!(log.max_size().unwrap(), 3);
    }

    #[test]
    fn bound_holds_inside_a_transaction() {
        let log = ledger(2);
        log.manager
            .transaction(|txn| {
                for amount in 1..=4 {
                    log.push_in_txn(txn, &entry(amount))?;
                    assert!(log.to_vec_in_txn(txn)?.len() <= 2);
                }
                assert_eq!(log.to_vec_in_txn(txn)?, vec![entry(3), entry(4)]);
                Ok(())
            })
            .unwrap();

        assert_eq!(log.to_vec().unwrap(), vec![entry(3), entry(4)]);
    }

    #[test]
    fn observe_and_clear() {
        let log = ledger(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = log.observe(move |events: Vec<Entry>| s.lock().push(events.len()));

        log.push(&entry(1)).unwrap();
        log.clear().unwrap();

        assert!(log.is_empty().unwrap());
        assert_eq!(*seen.lock(), vec![1, 0]);
    }
}
