//! # HearthDB Core
//!
//! Local-first transactional document store.
//!
//! This crate provides:
//! - Typed collections of JSON documents keyed by string ids
//! - Bounded append-only logs
//! - Transactions that batch mutations into one atomically visible commit
//! - Change notification, one round per commit per affected collection
//! - Declarative cascade rules executed inside the deleting transaction
//! - A journal + checkpoint persistence adapter over `hearth_storage`
//! - Versioned JSON snapshot export and import
//!
//! ```rust,ignore
//! use hearth_core::{Database, Entity, EntityId};
//!
//! let db = Database::open_in_memory()?;
//! let parts = db.collection::<Part>("parts");
//!
//! db.transaction(|txn| {
//!     let mut part = parts.require_in_txn(txn, "p1")?;
//!     part.energy += 1;
//!     parts.upsert_in_txn(txn, &part)
//! })?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cascade;
pub mod collection;
mod config;
mod database;
mod dir;
pub mod entity;
mod error;
pub mod export;
pub mod log;
pub mod notifier;
mod persistence;
mod state;
pub mod transaction;
mod types;
pub mod validate;

pub use cascade::{CascadeAction, CascadeRule, CascadeRules};
pub use collection::Collection;
pub use config::{Config, Durability};
pub use database::{Database, StoreStats};
pub use entity::{Document, Entity, EntityId};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use export::{ImportMode, ImportReport, Snapshot, SNAPSHOT_VERSION};
pub use log::{Event, Log};
pub use notifier::{Notification, Subscription, Topic, TopicSnapshot};
pub use state::Mutation;
pub use transaction::{Transaction, TransactionState};
pub use types::{SequenceNumber, TransactionId};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
