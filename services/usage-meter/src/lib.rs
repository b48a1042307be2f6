pub mod api;
pub mod config;
pub mod meter;
pub mod policy;
pub mod storage;

pub use api::{create_router, ApiState, ConsumeRequest, ConsumeResponse, ErrorResponse};
pub use config::{FailurePolicy, StoreBackend, UsageMeterConfig};
pub use meter::{
    Clock, Decision, FeatureTotal, LimitCheck, ManualClock, MeterError, MonthlyUsage,
    MutationState, PeriodUsage, PlanUsage, SystemClock, UsageMeter, UsagePeriod, UsageSnapshot,
};
pub use policy::{FeatureQuota, Limit, PlanPolicy, PolicyError, PolicyTable, Window};
pub use storage::{
    CounterKey, CounterStore, IncrementOutcome, MemoryCounterStore, SqliteCounterStore,
    StorageError, UsageRecord,
};
