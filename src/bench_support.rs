use std::sync::Arc;

use investforge_usage_meter::{
    CounterStore, MemoryCounterStore, PolicyTable, SqliteCounterStore, UsageMeter,
};
use tempfile::TempDir;

// Re-export external crates needed by harness module
pub use serde_json;
pub use tracing_subscriber;
pub use uuid;

// Re-export the e2e harness module
#[path = "../tests/e2e/harness.rs"]
pub mod e2e_harness;

pub use e2e_harness::{random_user_id, MeterProcess, TestHarness};

pub struct MeterBenchFixture {
    pub meter: UsageMeter,
    pub user_id: String,
    temp_dir: Option<TempDir>,
}

impl MeterBenchFixture {
    pub fn memory() -> Self {
        Self::with_store(Arc::new(MemoryCounterStore::new()), None)
    }

    pub fn sqlite() -> Self {
        let temp_dir = TempDir::new().expect("tempdir");
        let store = SqliteCounterStore::new(temp_dir.path().to_path_buf())
            .expect("sqlite store opened for fixture");
        Self::with_store(Arc::new(store), Some(temp_dir))
    }

    fn with_store(store: Arc<dyn CounterStore>, temp_dir: Option<TempDir>) -> Self {
        let meter = UsageMeter::new(store, Arc::new(PolicyTable::builtin()));
        Self {
            meter,
            user_id: random_user_id("bench"),
            temp_dir,
        }
    }

    pub fn data_dir(&self) -> Option<&std::path::Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }
}
