//! # HearthDB Testkit
//!
//! Test utilities for HearthDB.
//!
//! This crate provides:
//! - Domain fixtures and test database helpers
//! - A standard cascade rule table over the fixtures
//! - Property-based test generators using proptest
//! - Crash recovery harnesses
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hearth_testkit::prelude::*;
//!
//! #[test]
//! fn deleting_a_part_cleans_up() {
//!     let db = TestDatabase::household();
//!     let home = Household::attach(&db).unwrap();
//!     home.parts.upsert(&Part::new("p1", "Critic")).unwrap();
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod rules;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::rules::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use rules::*;
