//! Declarative cascade rules run by deletes.
//!
//! A [`CascadeRule`] ties an *owner* collection to a *dependent* collection
//! and says what happens to dependents when an owner document is deleted.
//! Rules run inside the deleting transaction, so observers never see a
//! dangling reference.
//!
//! ## Execution Order
//!
//! 1. Plan the closure of documents that will be deleted, following
//!    `DeleteDependent` edges and `FilterEmbedded` edges that drop emptied
//!    parents. Each `(collection, id)` is visited once. Every
//!    `FilterEmbedded` rule of an owner is applied before deciding whether
//!    a parent is dropped; a parent goes only when a list that a dropping
//!    rule filtered ends up empty.
//! 2. Evaluate every `RejectDeletion` guard for every document in the
//!    closure. The first failing guard aborts with
//!    [`CoreError::IntegrityViolation`] before anything is written.
//! 3. Delete the closure.
//! 4. Strip reference fields.
//! 5. Filter array fields.
//! 6. Rewrite parents with embedded lists.

use crate::entity::{Document, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::transaction::Transaction;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Guard predicate evaluated against a dependent document.
pub type Predicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// What happens to dependents when an owner is deleted.
#[derive(Clone)]
pub enum CascadeAction {
    /// Refuse the delete while a dependent whose `field` references the
    /// owner satisfies `predicate`.
    RejectDeletion {
        /// Reference field on the dependent.
        field: String,
        /// Dependents for which the delete is refused.
        predicate: Predicate,
        /// Reported in the integrity violation.
        reason: String,
    },
    /// Delete dependents whose `field` equals the owner id.
    DeleteDependent {
        /// Reference field on the dependent.
        field: String,
    },
    /// Remove `field` from dependents that reference the owner.
    StripReference {
        /// Reference field on the dependent.
        field: String,
    },
    /// Remove the owner id from the array in `field`.
    FilterArray {
        /// Array field on the dependent.
        field: String,
    },
    /// Remove elements of the list in `list_field` whose `element_field`
    /// equals the owner id.
    FilterEmbedded {
        /// List field on the dependent.
        list_field: String,
        /// Reference field on each list element.
        element_field: String,
        /// Delete the dependent when its list becomes empty. The dropped
        /// parent runs its own rules and guards like any other delete.
        drop_empty_parent: bool,
    },
}

impl CascadeAction {
    /// Short name of the action, for listings.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RejectDeletion { .. } => "reject",
            Self::DeleteDependent { .. } => "delete",
            Self::StripReference { .. } => "strip",
            Self::FilterArray { .. } => "filter-array",
            Self::FilterEmbedded { .. } => "filter-embedded",
        }
    }
}

impl fmt::Debug for CascadeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RejectDeletion { field, reason, .. } => f
                .debug_struct("RejectDeletion")
                .field("field", field)
                .field("reason", reason)
                .finish_non_exhaustive(),
            Self::DeleteDependent { field } => {
                f.debug_struct("DeleteDependent").field("field", field).finish()
            }
            Self::StripReference { field } => {
                f.debug_struct("StripReference").field("field", field).finish()
            }
            Self::FilterArray { field } => {
                f.debug_struct("FilterArray").field("field", field).finish()
            }
            Self::FilterEmbedded {
                list_field,
                element_field,
                drop_empty_parent,
            } => f
                .debug_struct("FilterEmbedded")
                .field("list_field", list_field)
                .field("element_field", element_field)
                .field("drop_empty_parent", drop_empty_parent)
                .finish(),
        }
    }
}

/// A rule from an owner collection to a dependent collection.
#[derive(Debug, Clone)]
pub struct CascadeRule {
    /// Collection whose deletes trigger the rule.
    pub owner: String,
    /// Collection the rule acts on.
    pub dependent: String,
    /// The action.
    pub action: CascadeAction,
}

impl CascadeRule {
    /// Creates a rule.
    pub fn new(owner: impl Into<String>, dependent: impl Into<String>, action: CascadeAction) -> Self {
        Self {
            owner: owner.into(),
            dependent: dependent.into(),
            action,
        }
    }

    /// Deleting an owner deletes dependents whose `field` points at it.
    pub fn delete_dependent(
        owner: impl Into<String>,
        dependent: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::new(owner, dependent, CascadeAction::DeleteDependent { field: field.into() })
    }

    /// Deleting an owner removes `field` from dependents that point at it.
    pub fn strip_reference(
        owner: impl Into<String>,
        dependent: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::new(owner, dependent, CascadeAction::StripReference { field: field.into() })
    }

    /// Deleting an owner removes its id from the array in `field`.
    pub fn filter_array(
        owner: impl Into<String>,
        dependent: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::new(owner, dependent, CascadeAction::FilterArray { field: field.into() })
    }

    /// Deleting an owner removes the embedded elements that point at it.
    pub fn filter_embedded(
        owner: impl Into<String>,
        dependent: impl Into<String>,
        list_field: impl Into<String>,
        element_field: impl Into<String>,
        drop_empty_parent: bool,
    ) -> Self {
        Self::new(
            owner,
            dependent,
            CascadeAction::FilterEmbedded {
                list_field: list_field.into(),
                element_field: element_field.into(),
                drop_empty_parent,
            },
        )
    }

    /// Deleting an owner is refused while a dependent pointing at it
    /// through `field` satisfies `predicate`.
    pub fn reject_deletion<F>(
        owner: impl Into<String>,
        dependent: impl Into<String>,
        field: impl Into<String>,
        predicate: F,
        reason: impl Into<String>,
    ) -> Self
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        Self::new(
            owner,
            dependent,
            CascadeAction::RejectDeletion {
                field: field.into(),
                predicate: Arc::new(predicate),
                reason: reason.into(),
            },
        )
    }
}

impl fmt::Display for CascadeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.owner, self.dependent, self.action.name())
    }
}

/// An ordered table of cascade rules.
#[derive(Debug, Clone, Default)]
pub struct CascadeRules {
    rules: Vec<CascadeRule>,
}

impl CascadeRules {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule, builder style.
    #[must_use]
    pub fn with(mut self, rule: CascadeRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Adds a rule.
    pub fn add(&mut self, rule: CascadeRule) {
        self.rules.push(rule);
    }

    /// Rules triggered by deletes in `owner`, in registration order.
    pub fn for_owner<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = &'a CascadeRule> + 'a {
        self.rules.iter().filter(move |rule| rule.owner == owner)
    }

    /// All rules, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CascadeRule> {
        self.rules.iter()
    }

    /// Returns the number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<CascadeRule> for CascadeRules {
    fn from_iter<I: IntoIterator<Item = CascadeRule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

type Key = (String, EntityId);

/// Deletes `id` from `collection` and runs the cascade rules.
///
/// Returns `Ok(false)` if the document does not exist.
pub(crate) fn delete(txn: &mut Transaction<'_>, collection: &str, id: &str) -> CoreResult<bool> {
    if txn.get(collection, id)?.is_none() {
        tracing::debug!(txid = %txn.id(), collection, id, "delete of absent entity ignored");
        return Ok(false);
    }

    let rules = txn.manager().cascade_rules();
    let doomed = plan(txn, &rules, collection, id)?;
    check_guards(txn, &rules, &doomed)?;

    for (coll, doc_id) in &doomed {
        txn.remove(coll, doc_id.as_str());
    }
    strip_references(txn, &rules, &doomed)?;
    filter_arrays(txn, &rules, &doomed)?;
    filter_embedded(txn, &rules, &doomed)?;

    tracing::debug!(
        txid = %txn.id(),
        collection,
        id,
        removed = doomed.len(),
        "cascade delete"
    );
    Ok(true)
}

/// Collects every document the delete will remove, root first.
fn plan(
    txn: &Transaction<'_>,
    rules: &CascadeRules,
    collection: &str,
    id: &str,
) -> CoreResult<Vec<Key>> {
    let root: Key = (collection.to_string(), EntityId::from(id));
    let mut visited: BTreeSet<Key> = BTreeSet::from([root.clone()]);
    let mut queue: VecDeque<Key> = VecDeque::from([root]);
    let mut doomed = Vec::new();
    // parents with elements filtered out so far
    let mut shrunk: BTreeMap<Key, Shrunk> = BTreeMap::new();

    while let Some(key) = queue.pop_front() {
        let (owner, owner_id) = (&key.0, key.1.as_str());
        for rule in rules.for_owner(owner) {
            if let CascadeAction::DeleteDependent { field } = &rule.action {
                for dep in txn.get_all(&rule.dependent)? {
                    if dep.references(field, owner_id) {
                        enqueue(&mut visited, &mut queue, &rule.dependent, dep.id());
                    }
                }
            }
        }
        for dep_key in shrink_parents(txn, rules, owner, owner_id, &visited, &mut shrunk)? {
            shrunk.remove(&dep_key);
            enqueue(&mut visited, &mut queue, &dep_key.0, &dep_key.1);
        }
        doomed.push(key);
    }
    Ok(doomed)
}

/// A parent as it will look after the embedded filters planned so far.
struct Shrunk {
    doc: Document,
    /// List fields touched by a rule that drops emptied parents.
    droppable: BTreeSet<String>,
    /// List fields that have become empty.
    emptied: BTreeSet<String>,
}

impl Shrunk {
    fn should_drop(&self) -> bool {
        !self.droppable.is_disjoint(&self.emptied)
    }
}

/// Applies every `FilterEmbedded` rule of `owner` to the planned parents
/// and returns the ones to drop.
fn shrink_parents(
    txn: &Transaction<'_>,
    rules: &CascadeRules,
    owner: &str,
    owner_id: &str,
    visited: &BTreeSet<Key>,
    shrunk: &mut BTreeMap<Key, Shrunk>,
) -> CoreResult<Vec<Key>> {
    let embedded: Vec<(&str, &str, &str, bool)> = rules
        .for_owner(owner)
        .filter_map(|rule| match &rule.action {
            CascadeAction::FilterEmbedded {
                list_field,
                element_field,
                drop_empty_parent,
            } => Some((
                rule.dependent.as_str(),
                list_field.as_str(),
                element_field.as_str(),
                *drop_empty_parent,
            )),
            _ => None,
        })
        .collect();

    // Mark droppable lists before filtering so rule order does not matter.
    let mut touched: BTreeSet<Key> = BTreeSet::new();
    for &(dependent, list_field, element_field, drop_empty_parent) in &embedded {
        for dep in txn.get_all(dependent)? {
            let dep_key: Key = (dependent.to_string(), dep.id().clone());
            if visited.contains(&dep_key) {
                continue;
            }
            let embeds = shrunk
                .get(&dep_key)
                .map_or(&dep, |entry| &entry.doc)
                .embeds(list_field, element_field, owner_id);
            if !embeds {
                continue;
            }
            let entry = shrunk.entry(dep_key.clone()).or_insert_with(|| Shrunk {
                doc: dep,
                droppable: BTreeSet::new(),
                emptied: BTreeSet::new(),
            });
            if drop_empty_parent {
                entry.droppable.insert(list_field.to_string());
            }
            touched.insert(dep_key);
        }
    }

    for &(dependent, list_field, element_field, _) in &embedded {
        for dep_key in touched.iter().filter(|k| k.0 == dependent) {
            if let Some(entry) = shrunk.get_mut(dep_key) {
                if entry.doc.filter_embedded(list_field, element_field, owner_id) == Some(0) {
                    entry.emptied.insert(list_field.to_string());
                }
            }
        }
    }

    Ok(touched
        .into_iter()
        .filter(|k| shrunk.get(k).is_some_and(Shrunk::should_drop))
        .collect())
}

fn enqueue(visited: &mut BTreeSet<Key>, queue: &mut VecDeque<Key>, collection: &str, id: &EntityId) {
    let key: Key = (collection.to_string(), id.clone());
    if visited.insert(key.clone()) {
        queue.push_back(key);
    }
}

fn check_guards(txn: &Transaction<'_>, rules: &CascadeRules, doomed: &[Key]) -> CoreResult<()> {
    for (owner, owner_id) in doomed {
        for rule in rules.for_owner(owner) {
            let CascadeAction::RejectDeletion {
                field,
                predicate,
                reason,
            } = &rule.action
            else {
                continue;
            };
            let blocked = txn
                .get_all(&rule.dependent)?
                .iter()
                .any(|dep| dep.references(field, owner_id.as_str()) && predicate(dep));
            if blocked {
                tracing::debug!(
                    txid = %txn.id(),
                    collection = %owner,
                    id = %owner_id,
                    dependent = %rule.dependent,
                    "delete rejected by guard"
                );
                return Err(CoreError::integrity_violation(
                    owner.clone(),
                    owner_id.clone(),
                    reason.clone(),
                ));
            }
        }
    }
    Ok(())
}

fn strip_references(txn: &mut Transaction<'_>, rules: &CascadeRules, doomed: &[Key]) -> CoreResult<()> {
    for (owner, owner_id) in doomed {
        for rule in rules.for_owner(owner) {
            let CascadeAction::StripReference { field } = &rule.action else {
                continue;
            };
            for mut dep in txn.get_all(&rule.dependent)? {
                if dep.references(field, owner_id.as_str()) && dep.remove_field(field) {
                    txn.upsert(&rule.dependent, dep)?;
                }
            }
        }
    }
    Ok(())
}

fn filter_arrays(txn: &mut Transaction<'_>, rules: &CascadeRules, doomed: &[Key]) -> CoreResult<()> {
    for (owner, owner_id) in doomed {
        for rule in rules.for_owner(owner) {
            let CascadeAction::FilterArray { field } = &rule.action else {
                continue;
            };
            for mut dep in txn.get_all(&rule.dependent)? {
                if dep.filter_array(field, owner_id.as_str()) {
                    txn.upsert(&rule.dependent, dep)?;
                }
            }
        }
    }
    Ok(())
}

fn filter_embedded(txn: &mut Transaction<'_>, rules: &CascadeRules, doomed: &[Key]) -> CoreResult<()> {
    for (owner, owner_id) in doomed {
        for rule in rules.for_owner(owner) {
            let CascadeAction::FilterEmbedded {
                list_field,
                element_field,
                ..
            } = &rule.action
            else {
                continue;
            };
            // Parents to drop were planned and are already gone.
            for mut dep in txn.get_all(&rule.dependent)? {
                if dep
                    .filter_embedded(list_field, element_field, owner_id.as_str())
                    .is_some()
                {
                    txn.upsert(&rule.dependent, dep)?;
                }
            }
        }
    }
    Ok(())
}
