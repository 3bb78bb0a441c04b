// src/web/state.rs
// Shared state for the admin HTTP surface

use crate::db::pool::DatabasePool;
use crate::pipeline::dispatcher::SharedMonitor;
use crate::worker::DispatchTrigger;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<DatabasePool>,
    pub monitor: SharedMonitor,
    pub trigger: DispatchTrigger,
}

impl AppState {
    pub fn new(pool: Arc<DatabasePool>, monitor: SharedMonitor, trigger: DispatchTrigger) -> Self {
        Self {
            pool,
            monitor,
            trigger,
        }
    }
}
