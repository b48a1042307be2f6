use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::policy::{FeatureQuota, Limit, PolicyTable};
use crate::storage::{CounterKey, CounterStore, IncrementOutcome, StorageError};

use super::error::{MeterError, MutationState};
use super::period::{
    period_key, period_reset, trailing_months, Clock, SystemClock, UsagePeriod,
};
use super::snapshot::{
    usage_percentage, Decision, FeatureTotal, LimitCheck, MonthlyUsage, PeriodUsage, PlanUsage,
    UsageSnapshot,
};
use super::{DEFAULT_STORE_TIMEOUT, MAX_HISTORY_MONTHS};

#[derive(Debug, Clone, Copy)]
enum Access {
    Read,
    Write,
}

/// Plan-based usage metering over an injected counter store.
///
/// Cloning is cheap; clones share the store, the policy table and the clock.
#[derive(Clone)]
pub struct UsageMeter {
    store: Arc<dyn CounterStore>,
    policy: Arc<PolicyTable>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl UsageMeter {
    pub fn new(store: Arc<dyn CounterStore>, policy: Arc<PolicyTable>) -> Self {
        Self {
            store,
            policy,
            clock: Arc::new(SystemClock),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Default bound applied to every store call.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Counts one use of `feature` if the plan's quota allows it.
    ///
    /// Denials perform no mutation. Unlimited quotas are always counted.
    /// A successful `Allowed` must not be retried: the unit is already
    /// counted.
    pub async fn check_and_increment(
        &self,
        user_id: &str,
        feature: &str,
        plan: &str,
    ) -> Result<Decision, MeterError> {
        self.check_and_increment_within(user_id, feature, plan, self.store_timeout)
            .await
    }

    /// Same as [`UsageMeter::check_and_increment`] with a caller-supplied
    /// store timeout. A timeout yields `StoreUnavailable` with an unknown
    /// mutation state.
    pub async fn check_and_increment_within(
        &self,
        user_id: &str,
        feature: &str,
        plan: &str,
        timeout: Duration,
    ) -> Result<Decision, MeterError> {
        let user_id = validate_user_id(user_id)?;
        let quota = self.policy.quota(plan, feature)?;
        let now = self.clock.now();
        let key = CounterKey::new(user_id, period_key(quota.window, now), feature);

        let decision = match quota.limit {
            Limit::Unlimited => {
                let count = self
                    .run_store(Access::Write, timeout, {
                        let key = key.clone();
                        move |store: &dyn CounterStore| store.increment(&key)
                    })
                    .await?;
                Decision::Allowed(build_snapshot(key, plan, quota, count, now))
            }
            Limit::Limited(limit) => {
                let outcome = self
                    .run_store(Access::Write, timeout, {
                        let key = key.clone();
                        move |store: &dyn CounterStore| store.conditional_increment(&key, limit)
                    })
                    .await?;

                match outcome {
                    IncrementOutcome::Applied(count) => {
                        Decision::Allowed(build_snapshot(key, plan, quota, count, now))
                    }
                    IncrementOutcome::Rejected { current } => {
                        info!(
                            user_id = %key.user_id,
                            feature = %key.feature,
                            plan,
                            period_key = %key.period_key,
                            limit,
                            current,
                            "usage quota exhausted"
                        );
                        Decision::Denied(build_snapshot(key, plan, quota, current, now))
                    }
                }
            }
        };

        let usage = decision.snapshot();
        debug!(
            user_id = %usage.user_id,
            feature = %usage.feature,
            plan,
            count = usage.count,
            allowed = decision.is_allowed(),
            "metered usage"
        );

        Ok(decision)
    }

    /// Current usage of `feature` without mutating anything.
    pub async fn get_usage(
        &self,
        user_id: &str,
        feature: &str,
        plan: &str,
    ) -> Result<UsageSnapshot, MeterError> {
        let user_id = validate_user_id(user_id)?;
        let quota = self.policy.quota(plan, feature)?;
        let now = self.clock.now();
        let key = CounterKey::new(user_id, period_key(quota.window, now), feature);

        let count = self
            .run_store(Access::Read, self.store_timeout, {
                let key = key.clone();
                move |store: &dyn CounterStore| store.get(&key)
            })
            .await?
            .unwrap_or(0);

        Ok(build_snapshot(key, plan, quota, count, now))
    }

    /// Whether `required` more units would fit in the quota. Read-only.
    pub async fn can_use(
        &self,
        user_id: &str,
        feature: &str,
        plan: &str,
        required: u64,
    ) -> Result<LimitCheck, MeterError> {
        if required == 0 {
            return Err(MeterError::InvalidRequiredCount);
        }

        let usage = self.get_usage(user_id, feature, plan).await?;
        let allowed = match usage.limit {
            Limit::Unlimited => true,
            Limit::Limited(limit) => usage
                .count
                .checked_add(required)
                .map_or(false, |total| total <= limit),
        };

        Ok(LimitCheck {
            feature: usage.feature,
            current_count: usage.count,
            limit: usage.limit,
            required_count: required,
            allowed,
            remaining: usage.remaining,
        })
    }

    /// Snapshots of every feature the user's plan meters.
    pub async fn usage_summary(&self, user_id: &str, plan: &str) -> Result<PlanUsage, MeterError> {
        let user_id = validate_user_id(user_id)?;
        let policy = self.policy.plan(plan)?;
        let now = self.clock.now();

        let entries: Vec<(CounterKey, FeatureQuota)> = policy
            .limits
            .iter()
            .map(|(feature, quota)| {
                let key = CounterKey::new(user_id, period_key(quota.window, now), feature);
                (key, *quota)
            })
            .collect();

        let keys: Vec<CounterKey> = entries.iter().map(|(key, _)| key.clone()).collect();
        let counts = self
            .run_store(Access::Read, self.store_timeout, move |store: &dyn CounterStore| {
                keys.iter()
                    .map(|key| store.get(key).map(|count| count.unwrap_or(0)))
                    .collect::<Result<Vec<u64>, StorageError>>()
            })
            .await?;

        let features = entries
            .into_iter()
            .zip(counts)
            .map(|((key, quota), count)| build_snapshot(key, plan, quota, count, now))
            .collect();

        Ok(PlanUsage {
            user_id: user_id.to_string(),
            plan: plan.to_string(),
            features,
        })
    }

    /// Totals of every feature the plan meters over `period`. Daily counters
    /// are summed into the period that contains them.
    pub async fn usage_for_period(
        &self,
        user_id: &str,
        plan: &str,
        period: UsagePeriod,
    ) -> Result<PeriodUsage, MeterError> {
        let user_id = validate_user_id(user_id)?;
        let policy = self.policy.plan(plan)?;
        let date = period.prefix(self.clock.now());

        let owner = user_id.to_string();
        let prefix = date.clone();
        let records = self
            .run_store(Access::Read, self.store_timeout, move |store: &dyn CounterStore| {
                store.list_user_usage(&owner, &prefix)
            })
            .await?;

        let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
        for record in &records {
            *totals.entry(record.feature.as_str()).or_insert(0) += record.count;
        }

        let features = policy
            .limits
            .iter()
            .map(|(feature, quota)| {
                let count = totals.get(feature.as_str()).copied().unwrap_or(0);
                FeatureTotal {
                    feature: feature.clone(),
                    count,
                    limit: quota.limit,
                    window: quota.window,
                    percentage: usage_percentage(count, quota.limit),
                }
            })
            .collect();

        debug!(user_id, plan, %period, date = %date, "summed period usage");

        Ok(PeriodUsage {
            user_id: user_id.to_string(),
            plan: plan.to_string(),
            period: period.to_string(),
            date,
            features,
        })
    }

    /// Per-month totals for the last `months` calendar months, oldest first.
    /// Daily counters are folded into their month.
    pub async fn usage_history(
        &self,
        user_id: &str,
        months: u32,
        feature: Option<&str>,
    ) -> Result<Vec<MonthlyUsage>, MeterError> {
        let user_id = validate_user_id(user_id)?;
        if months == 0 || months > MAX_HISTORY_MONTHS {
            return Err(MeterError::InvalidHistoryRange {
                requested: months,
                max: MAX_HISTORY_MONTHS,
            });
        }
        if let Some(feature) = feature {
            if !self.policy.is_known_feature(feature) {
                return Err(MeterError::UnknownFeature(feature.to_string()));
            }
        }

        let month_keys = trailing_months(self.clock.now(), months);
        let owner = user_id.to_string();
        let records = self
            .run_store(Access::Read, self.store_timeout, move |store: &dyn CounterStore| {
                month_keys
                    .into_iter()
                    .map(|month| {
                        store
                            .list_user_usage(&owner, &month)
                            .map(|records| (month, records))
                    })
                    .collect::<Result<Vec<_>, StorageError>>()
            })
            .await?;

        let history = records
            .into_iter()
            .map(|(month, records)| {
                let mut usage = BTreeMap::new();
                if let Some(feature) = feature {
                    usage.insert(feature.to_string(), 0);
                }
                for record in records {
                    if feature.map_or(true, |wanted| wanted == record.feature) {
                        *usage.entry(record.feature).or_insert(0) += record.count;
                    }
                }
                MonthlyUsage { month, usage }
            })
            .collect();

        Ok(history)
    }

    async fn run_store<T, F>(&self, access: Access, timeout: Duration, op: F) -> Result<T, MeterError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CounterStore) -> Result<T, StorageError> + Send + 'static,
    {
        let in_doubt = match access {
            Access::Read => MutationState::NotApplied,
            Access::Write => MutationState::Unknown,
        };

        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || op(store.as_ref()));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(source))) => {
                warn!(error = %source, "counter store call failed");
                Err(MeterError::StoreUnavailable {
                    mutation: MutationState::NotApplied,
                    source,
                })
            }
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "counter store task aborted");
                Err(MeterError::StoreUnavailable {
                    mutation: in_doubt,
                    source: StorageError::Unavailable(join_err.to_string()),
                })
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, ?access, "counter store timed out");
                Err(MeterError::StoreUnavailable {
                    mutation: in_doubt,
                    source: StorageError::Timeout(timeout),
                })
            }
        }
    }
}

fn validate_user_id(user_id: &str) -> Result<&str, MeterError> {
    if user_id.trim().is_empty() {
        return Err(MeterError::InvalidUserId);
    }
    Ok(user_id)
}

fn build_snapshot(
    key: CounterKey,
    plan: &str,
    quota: FeatureQuota,
    count: u64,
    now: DateTime<Utc>,
) -> UsageSnapshot {
    UsageSnapshot {
        user_id: key.user_id,
        feature: key.feature,
        plan: plan.to_string(),
        period_key: key.period_key,
        window: quota.window,
        count,
        limit: quota.limit,
        remaining: quota.limit.quota().map(|limit| limit.saturating_sub(count)),
        percentage: usage_percentage(count, quota.limit),
        resets_at: period_reset(quota.window, now),
    }
}
