//! Type-erased entity representation.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the key field every document carries.
pub const ID_FIELD: &str = "id";

/// A stored entity: a JSON object with a non-empty string `"id"` field.
///
/// This is the form the store keeps, journals and exports. Typed
/// collections convert to and from it at the boundary.
///
/// The id never changes once a document is constructed; [`merge`] rejects
/// partials that try to rewrite it.
///
/// [`merge`]: Document::merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Document {
    id: EntityId,
    fields: Map<String, Value>,
}

impl Document {
    /// Validates `value` and wraps it as a document.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `value` is not an object or lacks a
    /// non-empty string id.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Object(fields) => Self::from_map(fields),
            other => Err(CoreError::validation(format!(
                "document must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Validates a JSON object and wraps it as a document.
    pub fn from_map(fields: Map<String, Value>) -> CoreResult<Self> {
        let id = match fields.get(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => EntityId::from(id),
            Some(Value::String(_)) => {
                return Err(CoreError::validation("document id must not be empty"))
            }
            Some(other) => {
                return Err(CoreError::validation(format!(
                    "document id must be a string, got {}",
                    type_name(other)
                )))
            }
            None => return Err(CoreError::validation("document has no id field")),
        };
        Ok(Self { id, fields })
    }

    /// Returns the document id.
    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns a string field.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Returns the underlying object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Converts the document back into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Shallow-merges `partial` into this document, field by field.
    ///
    /// Fields present in `partial` replace the stored value; absent fields
    /// are left alone.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `partial` carries a different id.
    pub fn merge(&mut self, partial: &Map<String, Value>) -> CoreResult<()> {
        if let Some(id) = partial.get(ID_FIELD) {
            if id.as_str() != Some(self.id.as_str()) {
                return Err(CoreError::validation(format!(
                    "update of {} cannot change its id to {id}",
                    self.id
                )));
            }
        }
        for (key, value) in partial {
            self.fields.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Returns true if `field` is a string equal to `id`.
    #[must_use]
    pub fn references(&self, field: &str, id: &str) -> bool {
        self.get_str(field) == Some(id)
    }

    /// Returns true if `field` is an array containing the string `id`.
    #[must_use]
    pub fn array_contains(&self, field: &str, id: &str) -> bool {
        self.fields
            .get(field)
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|v| v.as_str() == Some(id)))
    }

    /// Returns true if any element of the list in `list_field` has
    /// `element_field` equal to `id`.
    #[must_use]
    pub fn embeds(&self, list_field: &str, element_field: &str, id: &str) -> bool {
        self.fields
            .get(list_field)
            .and_then(Value::as_array)
            .is_some_and(|items| {
                items
                    .iter()
                    .any(|item| item.get(element_field).and_then(Value::as_str) == Some(id))
            })
    }

    /// Removes a field. The id field cannot be removed.
    ///
    /// Returns true if the field was present.
    pub fn remove_field(&mut self, field: &str) -> bool {
        if field == ID_FIELD {
            return false;
        }
        self.fields.remove(field).is_some()
    }

    /// Removes every occurrence of the string `id` from the array in `field`.
    ///
    /// Returns true if anything was removed.
    pub fn filter_array(&mut self, field: &str, id: &str) -> bool {
        match self.fields.get_mut(field) {
            Some(Value::Array(items)) => {
                let before = items.len();
                items.retain(|v| v.as_str() != Some(id));
                items.len() != before
            }
            _ => false,
        }
    }

    /// Removes list elements whose `element_field` equals `id`.
    ///
    /// Returns the number of elements left in the list when something was
    /// removed, `None` when the document did not change.
    pub fn filter_embedded(
        &mut self,
        list_field: &str,
        element_field: &str,
        id: &str,
    ) -> Option<usize> {
        match self.fields.get_mut(list_field) {
            Some(Value::Array(items)) => {
                let before = items.len();
                items.retain(|item| item.get(element_field).and_then(Value::as_str) != Some(id));
                (items.len() != before).then_some(items.len())
            }
            _ => None,
        }
    }
}

impl TryFrom<Value> for Document {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
