pub mod error;
pub mod plan;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;

pub use error::PolicyError;
pub use plan::{FeatureQuota, Limit, PlanPolicy, Window, UNLIMITED_SENTINEL};

pub const FREE_PLAN: &str = "free";
pub const GROWTH_PLAN: &str = "growth";
pub const PRO_PLAN: &str = "pro";

pub const ANALYSES_FEATURE: &str = "analyses";
pub const BACKTESTS_FEATURE: &str = "backtests";
pub const PORTFOLIO_OPTIMIZATIONS_FEATURE: &str = "portfolio_optimizations";
pub const API_CALLS_FEATURE: &str = "api_calls";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    plans: BTreeMap<String, BTreeMap<String, FeatureQuota>>,
}

/// Immutable plan -> feature -> quota mapping, loaded once at startup.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    plans: HashMap<String, PlanPolicy>,
    features: BTreeSet<String>,
}

impl PolicyTable {
    pub fn new(plans: impl IntoIterator<Item = PlanPolicy>) -> Result<Self, PolicyError> {
        let mut table = HashMap::new();
        let mut features = BTreeSet::new();

        for plan in plans {
            validate_name(&plan.plan_name)?;
            for feature in plan.limits.keys() {
                validate_name(feature)?;
                features.insert(feature.clone());
            }
            table.insert(plan.plan_name.clone(), plan);
        }

        if table.is_empty() {
            return Err(PolicyError::NoPlans);
        }

        Ok(Self {
            plans: table,
            features,
        })
    }

    /// The InvestForge tiers: free, growth and pro.
    pub fn builtin() -> Self {
        let plans = vec![
            PlanPolicy::new(FREE_PLAN)
                .with_limit(ANALYSES_FEATURE, FeatureQuota::monthly(Limit::Limited(5)))
                .with_limit(BACKTESTS_FEATURE, FeatureQuota::monthly(Limit::Limited(2)))
                .with_limit(
                    PORTFOLIO_OPTIMIZATIONS_FEATURE,
                    FeatureQuota::monthly(Limit::Limited(1)),
                )
                .with_limit(API_CALLS_FEATURE, FeatureQuota::daily(Limit::Limited(0))),
            PlanPolicy::new(GROWTH_PLAN)
                .with_limit(ANALYSES_FEATURE, FeatureQuota::monthly(Limit::Unlimited))
                .with_limit(BACKTESTS_FEATURE, FeatureQuota::monthly(Limit::Unlimited))
                .with_limit(
                    PORTFOLIO_OPTIMIZATIONS_FEATURE,
                    FeatureQuota::monthly(Limit::Unlimited),
                )
                .with_limit(API_CALLS_FEATURE, FeatureQuota::daily(Limit::Limited(100))),
            PlanPolicy::new(PRO_PLAN)
                .with_limit(ANALYSES_FEATURE, FeatureQuota::monthly(Limit::Unlimited))
                .with_limit(BACKTESTS_FEATURE, FeatureQuota::monthly(Limit::Unlimited))
                .with_limit(
                    PORTFOLIO_OPTIMIZATIONS_FEATURE,
                    FeatureQuota::monthly(Limit::Unlimited),
                )
                .with_limit(API_CALLS_FEATURE, FeatureQuota::daily(Limit::Limited(1000))),
        ];

        let features = plans
            .iter()
            .flat_map(|plan| plan.limits.keys().cloned())
            .collect();
        Self {
            plans: plans
                .into_iter()
                .map(|plan| (plan.plan_name.clone(), plan))
                .collect(),
            features,
        }
    }

    pub fn from_json_str(source: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = serde_json::from_str(source)?;
        Self::new(file.plans.into_iter().map(|(plan_name, limits)| PlanPolicy {
            plan_name,
            limits,
        }))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, PolicyError> {
        let source = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&source)
    }

    pub fn plan(&self, plan: &str) -> Result<&PlanPolicy, PolicyError> {
        self.plans
            .get(plan)
            .ok_or_else(|| PolicyError::UnknownPlan(plan.to_string()))
    }

    /// Resolves the quota of `feature` under `plan`. A feature that some plan
    /// meters but this plan omits resolves to a monthly quota of zero.
    pub fn quota(&self, plan: &str, feature: &str) -> Result<FeatureQuota, PolicyError> {
        if !self.features.contains(feature) {
            return Err(PolicyError::UnknownFeature(feature.to_string()));
        }
        let policy = self.plan(plan)?;
        Ok(policy
            .quota_for(feature)
            .unwrap_or(FeatureQuota::monthly(Limit::Limited(0))))
    }

    pub fn is_known_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn plan_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plans.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn validate_name(name: &str) -> Result<(), PolicyError> {
    if name.trim().is_empty() || name.trim() != name {
        return Err(PolicyError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_matches_product_tiers() {
        let table = PolicyTable::builtin();
        assert_eq!(table.plan_names(), vec!["free", "growth", "pro"]);

        let free = table.quota(FREE_PLAN, ANALYSES_FEATURE).unwrap();
        assert_eq!(free, FeatureQuota::monthly(Limit::Limited(5)));

        let growth = table.quota(GROWTH_PLAN, ANALYSES_FEATURE).unwrap();
        assert!(growth.limit.is_unlimited());

        let api = table.quota(PRO_PLAN, API_CALLS_FEATURE).unwrap();
        assert_eq!(api, FeatureQuota::daily(Limit::Limited(1000)));
    }

    #[test]
    fn builtin_table_passes_validation() {
        let builtin = PolicyTable::builtin();
        let rebuilt = PolicyTable::new(builtin.plans.values().cloned()).unwrap();
        assert_eq!(rebuilt.features, builtin.features);
        assert_eq!(rebuilt.plan_names(), builtin.plan_names());
        assert!(builtin.is_known_feature(PORTFOLIO_OPTIMIZATIONS_FEATURE));
    }

    #[test]
    fn unknown_lookups_are_distinguished() {
        let table = PolicyTable::builtin();
        assert!(matches!(
            table.quota("enterprise", ANALYSES_FEATURE),
            Err(PolicyError::UnknownPlan(plan)) if plan == "enterprise"
        ));
        assert!(matches!(
            table.quota(FREE_PLAN, "screeners"),
            Err(PolicyError::UnknownFeature(feature)) if feature == "screeners"
        ));
    }

    #[test]
    fn feature_missing_from_plan_has_zero_quota() {
        let table = PolicyTable::from_json_str(
            r#"{
                "plans": {
                    "free": { "analyses": 5 },
                    "pro": { "analyses": -1, "reports": 10 }
                }
            }"#,
        )
        .unwrap();

        let quota = table.quota("free", "reports").unwrap();
        assert_eq!(quota.limit, Limit::Limited(0));
    }

    #[test]
    fn policy_file_rejects_empty_and_invalid_tables() {
        assert!(matches!(
            PolicyTable::from_json_str(r#"{"plans": {}}"#),
            Err(PolicyError::NoPlans)
        ));
        assert!(matches!(
            PolicyTable::from_json_str(r#"{"plans": {"free": {"analyses": -3}}}"#),
            Err(PolicyError::Parse(_))
        ));
        assert!(matches!(
            PolicyTable::from_json_str(r#"{"plans": {" free": {"analyses": 1}}}"#),
            Err(PolicyError::InvalidName(_))
        ));
    }
}
