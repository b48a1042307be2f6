use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::error::StorageError;
use super::{CounterKey, CounterStore, IncrementOutcome, UsageRecord};

/// In-process counter store. Each conditional increment runs while holding
/// the shard lock of its key.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    counters: Arc<DashMap<CounterKey, u64>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a counter. Intended for seeding fixtures.
    pub fn seed(&self, key: CounterKey, count: u64) {
        self.counters.insert(key, count);
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl CounterStore for MemoryCounterStore {
    fn get(&self, key: &CounterKey) -> Result<Option<u64>, StorageError> {
        Ok(self.counters.get(key).map(|count| *count))
    }

    fn increment(&self, key: &CounterKey) -> Result<u64, StorageError> {
        let mut count = self.counters.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }

    fn conditional_increment(
        &self,
        key: &CounterKey,
        limit: u64,
    ) -> Result<IncrementOutcome, StorageError> {
        match self.counters.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                if current >= limit {
                    return Ok(IncrementOutcome::Rejected { current });
                }
                let next = current + 1;
                entry.insert(next);
                Ok(IncrementOutcome::Applied(next))
            }
            Entry::Vacant(entry) => {
                if limit == 0 {
                    return Ok(IncrementOutcome::Rejected { current: 0 });
                }
                entry.insert(1);
                Ok(IncrementOutcome::Applied(1))
            }
        }
    }

    fn list_user_usage(
        &self,
        user_id: &str,
        period_prefix: &str,
    ) -> Result<Vec<UsageRecord>, StorageError> {
        let mut records: Vec<UsageRecord> = self
            .counters
            .iter()
            .filter(|entry| entry.key().matches_prefix(user_id, period_prefix))
            .map(|entry| UsageRecord {
                user_id: entry.key().user_id.clone(),
                period_key: entry.key().period_key.clone(),
                feature: entry.key().feature.clone(),
                count: *entry.value(),
            })
            .collect();
        records.sort_by(|a, b| {
            a.period_key
                .cmp(&b.period_key)
                .then_with(|| a.feature.cmp(&b.feature))
        });
        Ok(records)
    }
}
