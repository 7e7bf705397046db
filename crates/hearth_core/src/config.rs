//! Database configuration.

/// When committed batches reach durable storage.
///
/// In both modes in-memory readers see a commit as soon as it returns;
/// durability only affects when the journal bytes hit the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// The journal is written and flushed before the commit returns.
    #[default]
    Immediate,
    /// The journal is written by a background thread. `flush()` and
    /// `close()` wait for it and report any failure it hit.
    Deferred,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the store already holds data.
    pub error_if_exists: bool,

    /// Journal size that triggers an automatic checkpoint (0 = never).
    pub max_journal_size: u64,

    /// Durability mode for commits.
    pub durability: Durability,

    /// Retention bound for logs first written without an explicit bound
    /// (for example, logs created by a snapshot import).
    pub default_log_max_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            max_journal_size: 8 * 1024 * 1024, // 8 MB
            durability: Durability::Immediate,
            default_log_max_size: 1000,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the store exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the journal size that triggers a checkpoint.
    #[must_use]
    pub const fn max_journal_size(mut self, size: u64) -> Self {
        self.max_journal_size = size;
        self
    }

    /// Sets the durability mode.
    #[must_use]
    pub const fn durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Sets the default bound for logs created without one.
    #[must_use]
    pub const fn default_log_max_size(mut self, size: usize) -> Self {
        self.default_log_max_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(!config.error_if_exists);
        assert_eq!(config.durability, Durability::Immediate);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .durability(Durability::Deferred)
            .max_journal_size(1024)
            .default_log_max_size(50);

        assert!(!config.create_if_missing);
        assert_eq!(config.durability, Durability::Deferred);
        assert_eq!(config.max_journal_size, 1024);
        assert_eq!(config.default_log_max_size, 50);
    }
}
