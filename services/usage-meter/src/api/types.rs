use serde::{Deserialize, Serialize};

use crate::meter::{Decision, UsageSnapshot};

/// Body of `POST /api/usage/consume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumeRequest {
    pub user_id: String,
    pub feature: String,
    pub plan: String,
}

/// A `ConsumeRequest` whose fields have been checked and trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeteredAction {
    pub user_id: String,
    pub feature: String,
    pub plan: String,
}

impl ConsumeRequest {
    pub fn validate(self) -> Result<MeteredAction, FieldError> {
        Ok(MeteredAction {
            user_id: required_field("user_id", self.user_id)?,
            feature: required_field("feature", self.feature)?,
            plan: required_field("plan", self.plan)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
}

pub(crate) fn required_field(field: &'static str, value: String) -> Result<String, FieldError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldError { field });
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeResponse {
    pub allowed: bool,
    pub decision: Option<Decision>,
    pub message: String,
    /// Set when the store was unreachable and the fail-open policy let the
    /// action through uncounted.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanQuery {
    pub plan: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeriodQuery {
    pub plan: String,
    /// `current_month` (default), `last_month`, `current_year`, `YYYY-MM` or `YYYY`.
    pub period: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckQuery {
    pub plan: String,
    pub feature: String,
    pub count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryQuery {
    pub months: Option<u32>,
    pub feature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureUsageResponse {
    pub usage: UsageSnapshot,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub months: u32,
    pub feature_filter: Option<String>,
    pub history: Vec<crate::meter::MonthlyUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
}
