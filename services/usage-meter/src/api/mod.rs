use std::sync::Arc;

pub mod handlers;
pub mod router;
pub mod types;

pub use router::create_router;
pub use types::*;

use crate::config::UsageMeterConfig;
use crate::meter::UsageMeter;

pub struct ApiState {
    pub meter: UsageMeter,
    pub config: Arc<UsageMeterConfig>,
}

impl ApiState {
    pub fn new(meter: UsageMeter, config: UsageMeterConfig) -> Self {
        Self {
            meter,
            config: Arc::new(config),
        }
    }
}
