//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random documents, fixture records
//! and operation sequences.

use crate::fixtures::{Circle, Commitment, Conversation, JournalEntry, LedgerEvent, Part};
use hearth_core::Document;
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for generating short natural-key ids.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,7}").expect("Invalid regex")
}

/// Strategy for generating valid collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating JSON leaf values.
pub fn json_leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        prop::string::string_regex("[ -~]{0,12}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for generating a document with up to four extra fields.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    (
        entity_id_strategy(),
        prop::collection::btree_map(
            prop::string::string_regex("[a-z]{1,6}").expect("Invalid regex"),
            json_leaf_strategy(),
            0..4,
        ),
    )
        .prop_map(|(id, fields)| {
            let mut map: Map<String, Value> = fields.into_iter().collect();
            map.insert("id".to_string(), Value::String(id));
            Document::from_map(map).expect("Generated documents carry a string id")
        })
}

/// Strategy for generating parts, including out-of-range energy and trust.
pub fn part_strategy() -> impl Strategy<Value = Part> {
    (entity_id_strategy(), -50i64..150, -50i64..150).prop_map(|(id, energy, trust)| {
        let mut part = Part::new(&id, "generated");
        part.energy = energy;
        part.trust = trust;
        part
    })
}

/// Strategy for generating ledger events.
pub fn ledger_event_strategy() -> impl Strategy<Value = LedgerEvent> {
    (entity_id_strategy(), -1000i64..1000).prop_map(|(account, amount)| {
        LedgerEvent::new(&account, amount, "generated")
    })
}

/// One operation against a single collection and log.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Upsert `{id, n}`.
    Upsert(String, i64),
    /// Merge `{n}` into `id`.
    Update(String, i64),
    /// Delete `id`.
    Delete(String),
    /// Append `n` to the log.
    Push(i64),
}

/// Strategy for generating operations over a small id space, so that
/// updates and deletes regularly hit existing entities.
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    let id = prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_string);
    prop_oneof![
        (id.clone(), any::<i64>()).prop_map(|(id, n)| StoreOp::Upsert(id, n)),
        (id.clone(), any::<i64>()).prop_map(|(id, n)| StoreOp::Update(id, n)),
        id.prop_map(StoreOp::Delete),
        any::<i64>().prop_map(StoreOp::Push),
    ]
}

/// A random set of parts with dependents that reference them.
#[derive(Debug, Clone)]
pub struct HouseholdGraph {
    /// Part ids.
    pub parts: Vec<String>,
    /// Commitments, each owned by one of `parts`.
    pub commitments: Vec<Commitment>,
    /// Journal entries, some mentioning one of `parts`.
    pub journal: Vec<JournalEntry>,
    /// Circles over subsets of `parts`.
    pub circles: Vec<Circle>,
    /// Conversations with lines by `parts`.
    pub conversations: Vec<Conversation>,
}

/// Strategy for generating a household graph over 1 to 5 parts.
pub fn household_graph_strategy() -> impl Strategy<Value = HouseholdGraph> {
    (1usize..=5).prop_flat_map(|n| {
        let parts: Vec<String> = (0..n).map(|i| format!("p{i}")).collect();
        let owner = prop::sample::select(parts.clone());
        let maybe_owner = prop::option::of(owner.clone());
        let members = prop::sample::subsequence(parts.clone(), 0..=n);
        let authors = prop::collection::vec(owner.clone(), 1..4);

        (
            Just(parts),
            prop::collection::vec(owner, 0..6),
            prop::collection::vec(maybe_owner, 0..4),
            prop::collection::vec(members, 0..3),
            prop::collection::vec(authors, 0..3),
        )
            .prop_map(|(parts, owners, mentions, memberships, speakers)| HouseholdGraph {
                parts,
                commitments: owners
                    .iter()
                    .enumerate()
                    .map(|(i, owner)| Commitment::new(&format!("c{i}"), owner, "generated"))
                    .collect(),
                journal: mentions
                    .iter()
                    .enumerate()
                    .map(|(i, part)| JournalEntry::new(&format!("j{i}"), "generated", part.as_deref()))
                    .collect(),
                circles: memberships
                    .iter()
                    .enumerate()
                    .map(|(i, members)| {
                        let members: Vec<&str> = members.iter().map(String::as_str).collect();
                        Circle::new(&format!("circle{i}"), "generated", &members)
                    })
                    .collect(),
                conversations: speakers
                    .iter()
                    .enumerate()
                    .map(|(i, authors)| {
                        let lines: Vec<(&str, &str)> =
                            authors.iter().map(|a| (a.as_str(), "line")).collect();
                        Conversation::new(&format!("conv{i}"), "generated", &lines)
                    })
                    .collect(),
            })
    })
}

/// Configuration for property-based tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to generate.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn document_has_string_id(doc in document_strategy()) {
            prop_assert!(!doc.id().as_str().is_empty());
            prop_assert!(doc.get_str("id").is_some());
        }

        #[test]
        fn collection_name_starts_with_letter(name in collection_name_strategy()) {
            let first = name.chars().next();
            prop_assert!(first.is_some_and(|c| c.is_ascii_lowercase()));
        }

        #[test]
        fn stored_parts_are_clamped(part in part_strategy()) {
            let db = crate::fixtures::TestDatabase::memory();
            let parts = db.collection::<Part>(crate::fixtures::PARTS);
            parts.upsert(&part).unwrap();

            let stored = parts.require(&part.id).unwrap();
            prop_assert!((0..=100).contains(&stored.energy));
            prop_assert!((0..=100).contains(&stored.trust));
            prop_assert_eq!(stored.energy, part.energy.clamp(0, 100));
        }

        #[test]
        fn graph_references_known_parts(graph in household_graph_strategy()) {
            for c in &graph.commitments {
                prop_assert!(graph.parts.contains(&c.part_id));
            }
            for conv in &graph.conversations {
                prop_assert!(!conv.lines.is_empty());
            }
        }
    }
}
