//! Entity types.

mod document;
mod id;

pub use document::{Document, ID_FIELD};
pub use id::EntityId;

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for types that can be stored in a collection.
///
/// Entities serialize to a JSON object whose `"id"` field matches
/// [`Entity::id`]. Any serde-derived struct with an `id: String` (or
/// [`EntityId`]) field qualifies.
///
/// # Example
///
/// ```rust
/// use hearth_core::{Entity, EntityId};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Part {
///     id: String,
///     name: String,
///     energy: i64,
/// }
///
/// impl Entity for Part {
///     fn id(&self) -> EntityId {
///         EntityId::from(self.id.as_str())
///     }
///
///     fn normalize(&mut self) {
///         self.energy = hearth_core::validate::clamp("energy", self.energy, 0, 100);
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Returns the entity's stable identifier.
    fn id(&self) -> EntityId;

    /// Brings field values into their documented ranges.
    ///
    /// Called before every typed write. The default does nothing.
    fn normalize(&mut self) {}
}

impl Entity for Document {
    fn id(&self) -> EntityId {
        Document::id(self).clone()
    }
}

/// Converts a typed entity into its stored form.
pub(crate) fn to_document<T: Entity>(entity: &T) -> CoreResult<Document> {
    let doc = Document::from_value(serde_json::to_value(entity)?)?;
    let expected = entity.id();
    if *doc.id() != expected {
        return Err(CoreError::validation(format!(
            "entity id {expected} does not match serialized id {}",
            doc.id()
        )));
    }
    Ok(doc)
}

/// Decodes a stored document as `T`.
pub(crate) fn from_document<T: Entity>(doc: &Document) -> CoreResult<T> {
    serde_json::from_value(doc.clone().into_value()).map_err(|e| {
        CoreError::validation(format!("document {} does not decode: {e}", doc.id()))
    })
}
