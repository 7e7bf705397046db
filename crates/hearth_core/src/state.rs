//! Committed in-memory state and the mutations that change it.

use crate::collection::CollectionMap;
use crate::entity::{Document, EntityId};
use crate::log::AppendLog;
use crate::notifier::{Topic, TopicSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single change to the committed state.
///
/// A commit is an ordered batch of mutations. The same batch is journaled
/// and applied to memory, so replaying it reproduces the commit exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Insert or replace a document.
    Put {
        /// Target collection.
        collection: String,
        /// The full new value.
        document: Document,
    },
    /// Remove a document.
    Delete {
        /// Target collection.
        collection: String,
        /// The removed id.
        id: EntityId,
    },
    /// Remove every document from a collection.
    ClearCollection {
        /// Target collection.
        collection: String,
    },
    /// Append an event to a log, evicting the oldest past its bound.
    Append {
        /// Target log.
        log: String,
        /// The event.
        event: Value,
    },
    /// Set the retention bound of a log, creating it if needed.
    Bound {
        /// Target log.
        log: String,
        /// The new bound.
        max_size: u64,
    },
    /// Remove every event from a log.
    ClearLog {
        /// Target log.
        log: String,
    },
}

impl Mutation {
    /// Returns the topic this mutation affects.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::Put { collection, .. }
            | Self::Delete { collection, .. }
            | Self::ClearCollection { collection } => Topic::Collection(collection.clone()),
            Self::Append { log, .. } | Self::Bound { log, .. } | Self::ClearLog { log } => {
                Topic::Log(log.clone())
            }
        }
    }
}

/// Everything the store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub(crate) collections: BTreeMap<String, CollectionMap>,
    pub(crate) logs: BTreeMap<String, AppendLog>,
}

impl StoreState {
    /// Applies one mutation.
    ///
    /// `default_log_size` bounds a log that receives an event before any
    /// `Bound` mutation created it.
    pub(crate) fn apply(&mut self, mutation: &Mutation, default_log_size: usize) {
        match mutation {
            Mutation::Put {
                collection,
                document,
            } => {
                self.collections
                    .entry(collection.clone())
                    .or_default()
                    .put(document.clone());
            }
            Mutation::Delete { collection, id } => {
                if let Some(map) = self.collections.get_mut(collection) {
                    map.remove(id.as_str());
                }
            }
            Mutation::ClearCollection { collection } => {
                if let Some(map) = self.collections.get_mut(collection) {
                    map.clear();
                }
            }
            Mutation::Append { log, event } => {
                self.logs
                    .entry(log.clone())
                    .or_insert_with(|| AppendLog::new(default_log_size))
                    .push(event.clone());
            }
            Mutation::Bound { log, max_size } => {
                let max_size = usize::try_from(*max_size).unwrap_or(usize::MAX);
                self.logs
                    .entry(log.clone())
                    .and_modify(|l| {
                        l.set_max_size(max_size);
                    })
                    .or_insert_with(|| AppendLog::new(max_size));
            }
            Mutation::ClearLog { log } => {
                if let Some(l) = self.logs.get_mut(log) {
                    l.clear();
                }
            }
        }
    }

    /// Returns the current snapshot of a topic.
    pub(crate) fn snapshot(&self, topic: &Topic) -> TopicSnapshot {
        match topic {
            Topic::Collection(name) => TopicSnapshot::Collection(
                self.collections
                    .get(name)
                    .map(CollectionMap::to_vec)
                    .unwrap_or_default(),
            ),
            Topic::Log(name) => TopicSnapshot::Log(
                self.logs
                    .get(name)
                    .map(AppendLog::to_vec)
                    .unwrap_or_default(),
            ),
        }
    }

    /// Returns every topic that currently holds data.
    pub(crate) fn non_empty_topics(&self) -> Vec<Topic> {
        let collections = self
            .collections
            .iter()
            .filter(|(_, map)| !map.is_empty())
            .map(|(name, _)| Topic::Collection(name.clone()));
        let logs = self
            .logs
            .iter()
            .filter(|(_, log)| !log.is_empty())
            .map(|(name, _)| Topic::Log(name.clone()));
        collections.chain(logs).collect()
    }

    /// Total number of documents across collections.
    pub(crate) fn document_count(&self) -> usize {
        self.collections.values().map(CollectionMap::len).sum()
    }

    /// Total number of events across logs.
    pub(crate) fn event_count(&self) -> usize {
        self.logs.values().map(AppendLog::len).sum()
    }
}
