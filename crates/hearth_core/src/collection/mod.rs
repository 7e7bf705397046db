//! Collections of documents.
//!
//! [`CollectionMap`] is the committed form the store keeps per name.
//! [`Collection<T>`] is the typed handle callers read and write through.

mod map;
mod typed;

pub use map::CollectionMap;
pub use typed::Collection;
