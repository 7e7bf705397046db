//! Bounded append-only logs.
//!
//! Logs hold audit trails (ledger entries, score history) whose old entries
//! are not load-bearing. Each log keeps its newest `max_size` events.

mod append;
mod typed;

pub(crate) use append::bounded_view;
pub use append::AppendLog;
pub use typed::{Event, Log};
