use std::fmt;

use thiserror::Error;

use crate::policy::PolicyError;
use crate::storage::StorageError;

/// Whether a failed store call may have committed a counter mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    NotApplied,
    Unknown,
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationState::NotApplied => f.write_str("no mutation applied"),
            MutationState::Unknown => f.write_str("mutation state unknown"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MeterError {
    #[error("user id cannot be empty")]
    InvalidUserId,
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    #[error("unknown plan: {0}")]
    UnknownPlan(String),
    #[error("history range must be between 1 and {max} months, got {requested}")]
    InvalidHistoryRange { requested: u32, max: u32 },
    #[error("required count must be at least 1")]
    InvalidRequiredCount,
    #[error("invalid period {0:?}, expected current_month, last_month, current_year, YYYY-MM or YYYY")]
    InvalidPeriod(String),
    #[error("counter store unavailable ({mutation}): {source}")]
    StoreUnavailable {
        mutation: MutationState,
        #[source]
        source: StorageError,
    },
    #[error("plan policy error: {0}")]
    Policy(PolicyError),
}

impl MeterError {
    /// Caller errors that retrying will never fix.
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, MeterError::StoreUnavailable { .. } | MeterError::Policy(_))
    }

    /// True only when the failed call is known to have left the counter
    /// untouched, so repeating it cannot double count.
    pub fn is_retry_safe(&self) -> bool {
        matches!(
            self,
            MeterError::StoreUnavailable {
                mutation: MutationState::NotApplied,
                ..
            }
        )
    }
}

impl From<PolicyError> for MeterError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::UnknownPlan(plan) => MeterError::UnknownPlan(plan),
            PolicyError::UnknownFeature(feature) => MeterError::UnknownFeature(feature),
            other => MeterError::Policy(other),
        }
    }
}
