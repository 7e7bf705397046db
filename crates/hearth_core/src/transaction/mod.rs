//! Transactions.
//!
//! A transaction batches document and log mutations into one atomically
//! visible commit:
//! - **Atomicity**: the body's writes are applied together or not at all
//! - **Read-your-writes**: reads through the transaction see its own writes
//! - **Single writer**: transactions run one at a time
//! - **Rollback**: a body that fails leaves no trace
//!
//! Logic that reads an entity to compute its next state must do the read
//! inside the same transaction as the write. Reading first and writing in a
//! later transaction loses updates when two callers interleave.

mod manager;
mod state;

pub use manager::TransactionManager;
pub(crate) use manager::Validator;
pub use state::{Transaction, TransactionState};
