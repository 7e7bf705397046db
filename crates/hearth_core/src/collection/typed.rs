//! Typed collection handle.

use crate::entity::{from_document, to_document, Entity};
use crate::error::{CoreError, CoreResult};
use crate::notifier::{Subscription, Topic, TopicSnapshot};
use crate::transaction::{Transaction, TransactionManager};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed view of a named collection.
///
/// Every method without a transaction argument runs in its own
/// single-operation transaction (writes) or reads committed state
/// (reads). The `*_in_txn` variants join an open transaction and see its
/// pending writes.
///
/// The auto-wrapping writes (`upsert`, `update`, `modify`, `delete`,
/// `clear`) open a transaction of their own, so calling one from inside a
/// transaction body on the same thread fails with
/// [`CoreError::InvalidOperation`](crate::CoreError::InvalidOperation)
/// instead of joining. Use the `*_in_txn` variant with the body's
/// transaction.
///
/// Logic that reads an entity to compute its next state must do the read
/// inside the same transaction as the write. [`modify`](Self::modify) does
/// exactly that.
///
/// # Example
///
/// ```rust,ignore
/// let parts = db.collection::<Part>("parts");
///
/// parts.upsert(&Part { id: "p1".into(), name: "Ada".into(), energy: 40 })?;
/// parts.modify("p1", |p| p.energy += 10)?;
///
/// let all: Vec<Part> = parts.get_all()?;
/// ```
pub struct Collection<T: Entity> {
    name: String,
    manager: Arc<TransactionManager>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Collection<T> {
    pub(crate) fn new(name: impl Into<String>, manager: Arc<TransactionManager>) -> Self {
        Self {
            name: name.into(),
            manager,
            _marker: PhantomData,
        }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Gets an entity from committed state.
    pub fn get(&self, id: impl AsRef<str>) -> CoreResult<Option<T>> {
        self.manager.ensure_open()?;
        let state = self.manager.read_state();
        state
            .collections
            .get(&self.name)
            .and_then(|map| map.get(id.as_ref()))
            .map(from_document::<T>)
            .transpose()
    }

    /// Gets an entity, seeing the transaction's own writes.
    pub fn get_in_txn(&self, txn: &Transaction<'_>, id: impl AsRef<str>) -> CoreResult<Option<T>> {
        self.check_txn(txn)?;
        txn.get(&self.name, id.as_ref())?
            .as_ref()
            .map(from_document::<T>)
            .transpose()
    }

    /// Gets an entity or fails with [`CoreError::NotFound`].
    pub fn require(&self, id: impl AsRef<str>) -> CoreResult<T> {
        let id = id.as_ref();
        self.get(id)?
            .ok_or_else(|| CoreError::not_found(self.name.clone(), id))
    }

    /// Transactional [`require`](Self::require).
    pub fn require_in_txn(&self, txn: &Transaction<'_>, id: impl AsRef<str>) -> CoreResult<T> {
        let id = id.as_ref();
        self.get_in_txn(txn, id)?
            .ok_or_else(|| CoreError::not_found(self.name.clone(), id))
    }

    /// Returns every entity, in id order.
    pub fn get_all(&self) -> CoreResult<Vec<T>> {
        self.manager.ensure_open()?;
        let state = self.manager.read_state();
        match state.collections.get(&self.name) {
            Some(map) => map.iter().map(from_document::<T>).collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Returns every entity, seeing the transaction's own writes.
    pub fn get_all_in_txn(&self, txn: &Transaction<'_>) -> CoreResult<Vec<T>> {
        self.check_txn(txn)?;
        txn.get_all(&self.name)?.iter().map(from_document::<T>).collect()
    }

    /// Returns the number of committed entities.
    pub fn count(&self) -> CoreResult<usize> {
        self.manager.ensure_open()?;
        Ok(self
            .manager
            .read_state()
            .collections
            .get(&self.name)
            .map_or(0, |map| map.len()))
    }

    /// Returns true if a committed entity has this id.
    pub fn contains(&self, id: impl AsRef<str>) -> CoreResult<bool> {
        self.manager.ensure_open()?;
        Ok(self
            .manager
            .read_state()
            .collections
            .get(&self.name)
            .is_some_and(|map| map.contains(id.as_ref())))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Inserts or replaces an entity.
    pub fn upsert(&self, entity: &T) -> CoreResult<()> {
        self.manager.transaction(|txn| self.upsert_in_txn(txn, entity))
    }

    /// Inserts or replaces an entity inside a transaction.
    ///
    /// The stored value is normalized first; the caller's copy is not
    /// touched.
    pub fn upsert_in_txn(&self, txn: &mut Transaction<'_>, entity: &T) -> CoreResult<()> {
        self.check_txn(txn)?;
        let mut entity = entity.clone();
        entity.normalize();
        txn.upsert(&self.name, to_document(&entity)?)
    }

    /// Merges a partial JSON object into an existing entity.
    ///
    /// Returns `Ok(false)` if the entity does not exist. The merged value
    /// must still decode as `T`.
    pub fn update(&self, id: impl AsRef<str>, partial: &Value) -> CoreResult<bool> {
        self.manager
            .transaction(|txn| self.update_in_txn(txn, id.as_ref(), partial))
    }

    /// Transactional [`update`](Self::update).
    pub fn update_in_txn(
        &self,
        txn: &mut Transaction<'_>,
        id: impl AsRef<str>,
        partial: &Value,
    ) -> CoreResult<bool> {
        self.check_txn(txn)?;
        let id = id.as_ref();
        let Value::Object(fields) = partial else {
            return Err(CoreError::validation(format!(
                "partial update of {}/{id} must be a JSON object",
                self.name
            )));
        };
        let Some(mut doc) = txn.get(&self.name, id)? else {
            tracing::debug!(txid = %txn.id(), collection = %self.name, id, "update of absent entity ignored");
            return Ok(false);
        };
        doc.merge(fields)?;
        let mut entity: T = from_document(&doc)?;
        entity.normalize();
        txn.upsert(&self.name, to_document(&entity)?)?;
        Ok(true)
    }

    /// Reads an entity, changes it with `f` and writes it back, all in one
    /// transaction.
    ///
    /// Returns `Ok(false)` if the entity does not exist.
    pub fn modify<F>(&self, id: impl AsRef<str>, f: F) -> CoreResult<bool>
    where
        F: FnOnce(&mut T),
    {
        self.manager
            .transaction(|txn| self.modify_in_txn(txn, id.as_ref(), f))
    }

    /// Transactional [`modify`](Self::modify).
    pub fn modify_in_txn<F>(&self, txn: &mut Transaction<'_>, id: impl AsRef<str>, f: F) -> CoreResult<bool>
    where
        F: FnOnce(&mut T),
    {
        let id = id.as_ref();
        let Some(mut entity) = self.get_in_txn(txn, id)? else {
            tracing::debug!(txid = %txn.id(), collection = %self.name, id, "modify of absent entity ignored");
            return Ok(false);
        };
        f(&mut entity);
        if entity.id().as_str() != id {
            return Err(CoreError::validation(format!(
                "modify of {}/{id} cannot change its id",
                self.name
            )));
        }
        self.upsert_in_txn(txn, &entity)?;
        Ok(true)
    }

    /// Deletes an entity and runs the cascade rules.
    ///
    /// Deleting an absent id is a no-op and returns `Ok(false)`.
    pub fn delete(&self, id: impl AsRef<str>) -> CoreResult<bool> {
        self.manager
            .transaction(|txn| self.delete_in_txn(txn, id.as_ref()))
    }

    /// Transactional [`delete`](Self::delete).
    pub fn delete_in_txn(&self, txn: &mut Transaction<'_>, id: impl AsRef<str>) -> CoreResult<bool> {
        self.check_txn(txn)?;
        txn.delete(&self.name, id.as_ref())
    }

    /// Removes every entity without running cascade rules.
    pub fn clear(&self) -> CoreResult<()> {
        self.manager
            .transaction(|txn| txn.clear_collection(&self.name))
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Calls `callback` with every entity after each commit that touched
    /// this collection.
    ///
    /// Documents that no longer decode as `T` are logged and skipped.
    pub fn observe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        let name = self.name.clone();
        self.manager
            .notifier()
            .subscribe(Topic::Collection(self.name.clone()), move |n| {
                let TopicSnapshot::Collection(docs) = &n.snapshot else {
                    return;
                };
                let entities = docs
                    .iter()
                    .filter_map(|doc| match from_document::<T>(doc) {
                        Ok(entity) => Some(entity),
                        Err(err) => {
                            tracing::warn!(collection = %name, id = %doc.id(), error = %err, "skipping undecodable document");
                            None
                        }
                    })
                    .collect();
                callback(entities);
            })
    }

    fn check_txn(&self, txn: &Transaction<'_>) -> CoreResult<()> {
        if std::ptr::eq(txn.manager(), Arc::as_ptr(&self.manager)) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "collection {} used with a transaction of another database",
                self.name
            )))
        }
    }
}

impl<T: Entity> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            manager: Arc::clone(&self.manager),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
