//! Server state

use std::sync::Arc;

use crate::proxy::ProxyCompiler;
use crate::services::env_logs::LogSink;
use crate::store::EntityStore;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<dyn EntityStore>,
    pub logs: Arc<dyn LogSink>,
    pub proxy: Arc<ProxyCompiler>,

    /// Id of the machine this agent runs on
    pub machine_id: String,
}

impl ServerState {
    pub fn new(
        store: Arc<dyn EntityStore>,
        logs: Arc<dyn LogSink>,
        proxy: Arc<ProxyCompiler>,
        machine_id: String,
    ) -> Self {
        Self {
            store,
            logs,
            proxy,
            machine_id,
        }
    }
}
