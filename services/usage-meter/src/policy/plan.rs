use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::PolicyError;

/// Sentinel used by configuration files and API payloads for "no quota".
pub const UNLIMITED_SENTINEL: i64 = -1;

/// Per-feature quota. Serialized as an integer, `-1` meaning unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Limit {
    Limited(u64),
    Unlimited,
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    pub fn quota(&self) -> Option<u64> {
        match self {
            Limit::Limited(quota) => Some(*quota),
            Limit::Unlimited => None,
        }
    }
}

impl TryFrom<i64> for Limit {
    type Error = PolicyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            UNLIMITED_SENTINEL => Ok(Limit::Unlimited),
            quota if quota >= 0 => Ok(Limit::Limited(quota as u64)),
            invalid => Err(PolicyError::InvalidLimit(invalid)),
        }
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Limited(quota) => i64::try_from(quota).unwrap_or(i64::MAX),
            Limit::Unlimited => UNLIMITED_SENTINEL,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Limited(quota) => write!(f, "{quota}"),
            Limit::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Counting window of a feature quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    #[default]
    Month,
    Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "QuotaSpec")]
pub struct FeatureQuota {
    pub limit: Limit,
    pub window: Window,
}

impl FeatureQuota {
    pub const fn monthly(limit: Limit) -> Self {
        Self {
            limit,
            window: Window::Month,
        }
    }

    pub const fn daily(limit: Limit) -> Self {
        Self {
            limit,
            window: Window::Day,
        }
    }
}

// Policy files accept either `"analyses": 5` or
// `"api_calls": { "limit": 100, "window": "day" }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum QuotaSpec {
    Bare(Limit),
    Detailed {
        limit: Limit,
        #[serde(default)]
        window: Window,
    },
}

impl From<QuotaSpec> for FeatureQuota {
    fn from(raw: QuotaSpec) -> Self {
        match raw {
            QuotaSpec::Bare(limit) => FeatureQuota::monthly(limit),
            QuotaSpec::Detailed { limit, window } => FeatureQuota { limit, window },
        }
    }
}

/// A subscription tier and its per-feature quotas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanPolicy {
    pub plan_name: String,
    pub limits: BTreeMap<String, FeatureQuota>,
}

impl PlanPolicy {
    pub fn new(plan_name: impl Into<String>) -> Self {
        Self {
            plan_name: plan_name.into(),
            limits: BTreeMap::new(),
        }
    }

    pub fn with_limit(mut self, feature: impl Into<String>, quota: FeatureQuota) -> Self {
        self.limits.insert(feature.into(), quota);
        self
    }

    pub fn quota_for(&self, feature: &str) -> Option<FeatureQuota> {
        self.limits.get(feature).copied()
    }
}
