//! Committed contents of one collection.

use crate::entity::{Document, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A keyed map of documents: `id -> Document`.
///
/// Values are stored whole. Two writers racing on the same key resolve
/// last-writer-wins at document granularity, never per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionMap {
    entries: BTreeMap<EntityId, Document>,
}

impl CollectionMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the document stored under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.entries.get(id)
    }

    /// Returns true if `id` is present.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Inserts or replaces a document. Returns the previous value.
    pub fn put(&mut self, doc: Document) -> Option<Document> {
        self.entries.insert(doc.id().clone(), doc)
    }

    /// Removes a document. Returns the removed value.
    pub fn remove(&mut self, id: &str) -> Option<Document> {
        self.entries.remove(id)
    }

    /// Removes every document.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates over documents in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.entries.values()
    }

    /// Returns the ids in id order.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entries.keys()
    }

    /// Returns a copy of every document in id order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Document> {
        self.entries.values().cloned().collect()
    }

    /// Returns the number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
