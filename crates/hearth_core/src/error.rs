//! Error types for HearthDB core.

use crate::entity::EntityId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
///
/// User-facing layers report on the kind; the variant carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller required an entity that does not exist.
    NotFound,
    /// A cascade guard rejected a deletion.
    IntegrityViolation,
    /// Malformed input at the store boundary (import payloads, documents).
    Validation,
    /// Durable storage failed or holds unusable bytes.
    Persistence,
    /// The store was used incorrectly (closed handle, nested transaction, ...).
    Usage,
}

/// Errors that can occur in HearthDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] hearth_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CBOR encoding or decoding of durable records failed.
    #[error("encoding error: {message}")]
    Encoding {
        /// Description of the failure.
        message: String,
    },

    /// The journal holds bytes that are not a valid record.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A durability write failed outside the caller's stack (deferred mode).
    #[error("persistence failed: {message}")]
    Persistence {
        /// Description of the failure.
        message: String,
    },

    /// Entity not found.
    #[error("entity {id} not found in collection {collection}")]
    NotFound {
        /// The collection searched.
        collection: String,
        /// The missing entity.
        id: EntityId,
    },

    /// A cascade rule rejected the deletion of an entity.
    #[error("cannot delete {id} from {collection}: {reason}")]
    IntegrityViolation {
        /// Collection of the entity whose deletion was rejected.
        collection: String,
        /// The entity whose deletion was rejected.
        id: EntityId,
        /// Why the guard fired.
        reason: String,
    },

    /// Input failed validation at the store boundary.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of what is wrong.
        message: String,
    },

    /// The transaction was aborted and cannot commit.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Another process has the store directory locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The store has been closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// The store directory or files are not usable.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },
}

impl CoreError {
    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            Self::Validation { .. } | Self::Json(_) => ErrorKind::Validation,
            Self::Storage(_)
            | Self::Io(_)
            | Self::Encoding { .. }
            | Self::JournalCorruption { .. }
            | Self::ChecksumMismatch { .. }
            | Self::Persistence { .. }
            | Self::DatabaseLocked
            | Self::InvalidFormat { .. } => ErrorKind::Persistence,
            Self::TransactionAborted { .. }
            | Self::InvalidOperation { .. }
            | Self::DatabaseClosed => ErrorKind::Usage,
        }
    }

    /// Creates a not found error.
    pub fn not_found(collection: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates an integrity violation error.
    pub fn integrity_violation(
        collection: impl Into<String>,
        id: impl Into<EntityId>,
        reason: impl Into<String>,
    ) -> Self {
        Self::IntegrityViolation {
            collection: collection.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }
}
