pub mod error;
pub mod manager;
pub mod period;
pub mod snapshot;

use std::time::Duration;

pub use error::{MeterError, MutationState};
pub use manager::UsageMeter;
pub use period::{Clock, ManualClock, SystemClock, UsagePeriod};
pub use snapshot::{
    usage_percentage, Decision, FeatureTotal, LimitCheck, MonthlyUsage, PeriodUsage, PlanUsage,
    UsageSnapshot,
};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_HISTORY_MONTHS: u32 = 24;
pub const DEFAULT_HISTORY_MONTHS: u32 = 6;
