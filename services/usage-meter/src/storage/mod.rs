pub mod database;
pub mod error;
pub mod memory;
pub mod schema;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use database::SqliteCounterStore;
pub use error::StorageError;
pub use memory::MemoryCounterStore;

pub const USAGE_DB_FILENAME: &str = "usage.db";
pub const USAGE_COUNTERS_TABLE: &str = "usage_counters";

/// Composite key of a single usage counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    pub user_id: String,
    pub period_key: String,
    pub feature: String,
}

impl CounterKey {
    pub fn new(
        user_id: impl Into<String>,
        period_key: impl Into<String>,
        feature: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            period_key: period_key.into(),
            feature: feature.into(),
        }
    }

    /// True when this key belongs to `user_id` and its period equals
    /// `period_prefix` or is nested in it (`2025-10-18` under `2025-10`).
    pub fn matches_prefix(&self, user_id: &str, period_prefix: &str) -> bool {
        if self.user_id != user_id {
            return false;
        }
        match self.period_key.strip_prefix(period_prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('-'),
            None => false,
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}#{}", self.user_id, self.period_key, self.feature)
    }
}

/// One persisted counter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub period_key: String,
    pub feature: String,
    pub count: u64,
}

/// Result of an atomic conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The counter was below the ceiling and now holds the returned value.
    Applied(u64),
    /// The counter was already at or above the ceiling; nothing was written.
    Rejected { current: u64 },
}

/// Backend holding one counter per `(user_id, period_key, feature)`.
///
/// Implementations must make `conditional_increment` a single indivisible
/// operation. An `Err` from any method means nothing was committed.
pub trait CounterStore: Send + Sync + 'static {
    fn get(&self, key: &CounterKey) -> Result<Option<u64>, StorageError>;

    fn increment(&self, key: &CounterKey) -> Result<u64, StorageError>;

    fn conditional_increment(
        &self,
        key: &CounterKey,
        limit: u64,
    ) -> Result<IncrementOutcome, StorageError>;

    /// All records of `user_id` whose period is `period_prefix` or nested in it.
    fn list_user_usage(
        &self,
        user_id: &str,
        period_prefix: &str,
    ) -> Result<Vec<UsageRecord>, StorageError>;
}
