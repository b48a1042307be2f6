use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{Limit, Window};

/// Usage of one feature by one user in the active period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub user_id: String,
    pub feature: String,
    pub plan: String,
    pub period_key: String,
    pub window: Window,
    pub count: u64,
    pub limit: Limit,
    /// `None` when the limit is unlimited.
    pub remaining: Option<u64>,
    /// Share of the quota consumed, see [`usage_percentage`].
    pub percentage: f64,
    pub resets_at: DateTime<Utc>,
}

/// Share of `limit` consumed by `count`, capped at 100. Unlimited quotas
/// report 0 and a zero quota reports 100.
pub fn usage_percentage(count: u64, limit: Limit) -> f64 {
    match limit {
        Limit::Unlimited => 0.0,
        Limit::Limited(0) => 100.0,
        Limit::Limited(quota) => (count as f64 * 100.0 / quota as f64).min(100.0),
    }
}

/// Outcome of a successful `check_and_increment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "usage", rename_all = "snake_case")]
pub enum Decision {
    Allowed(UsageSnapshot),
    Denied(UsageSnapshot),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed(_))
    }

    pub fn snapshot(&self) -> &UsageSnapshot {
        match self {
            Decision::Allowed(snapshot) | Decision::Denied(snapshot) => snapshot,
        }
    }

    pub fn remaining(&self) -> Option<u64> {
        self.snapshot().remaining
    }

    /// Text shown to the user. Denials state the limit and the reset date.
    pub fn message(&self) -> String {
        let usage = self.snapshot();
        match self {
            Decision::Allowed(_) => match usage.remaining {
                Some(remaining) => format!(
                    "{remaining} of {} {} left for the {} plan this period",
                    usage.limit, usage.feature, usage.plan
                ),
                None => format!("{} is unlimited on the {} plan", usage.feature, usage.plan),
            },
            Decision::Denied(_) => format!(
                "limit of {} {} for the {} plan reached, resets on {}",
                usage.limit,
                usage.feature,
                usage.plan,
                usage.resets_at.format("%Y-%m-%d")
            ),
        }
    }
}

/// Read-only answer to "could this user consume `required` more units".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitCheck {
    pub feature: String,
    pub current_count: u64,
    pub limit: Limit,
    pub required_count: u64,
    pub allowed: bool,
    pub remaining: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanUsage {
    pub user_id: String,
    pub plan: String,
    pub features: Vec<UsageSnapshot>,
}

/// Total of one feature over a reporting period, measured against the
/// plan's per-window limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTotal {
    pub feature: String,
    pub count: u64,
    pub limit: Limit,
    pub window: Window,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodUsage {
    pub user_id: String,
    pub plan: String,
    pub period: String,
    /// Period-key prefix the totals were summed over.
    pub date: String,
    pub features: Vec<FeatureTotal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyUsage {
    pub month: String,
    pub usage: BTreeMap<String, u64>,
}
