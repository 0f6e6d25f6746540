//! Environment log sink and queries

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::models::{EnvLog, LogWindow, PRIORITY_ERR};
use crate::store::{EntityStore, LOG_PAGE_SIZE};

/// Accepts log lines attributed to an environment.
///
/// Submitting never fails the caller; sinks report their own errors.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn submit(&self, entry: EnvLog);
}

/// Persists log lines in the shared `EnvironmentLog` table
pub struct StoreLogSink {
    store: Arc<dyn EntityStore>,
}

impl StoreLogSink {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LogSink for StoreLogSink {
    async fn submit(&self, entry: EnvLog) {
        if entry.level <= PRIORITY_ERR {
            warn!(
                environment_id = %entry.environment_id,
                deployment_id = %entry.deployment_id,
                "{}",
                entry.message
            );
        } else {
            debug!(
                environment_id = %entry.environment_id,
                deployment_id = %entry.deployment_id,
                "{}",
                entry.message
            );
        }

        if let Err(e) = self.store.insert_env_log(&entry).await {
            warn!("Failed to persist log line for {}: {}", entry.environment_id, e);
        }
    }
}

/// Last page of log lines for an environment around a timestamp, newest first
pub async fn query_logs(
    store: &dyn EntityStore,
    environment_id: &str,
    window: LogWindow,
) -> Result<Vec<EnvLog>, AgentError> {
    store
        .list_env_logs(environment_id, window, LOG_PAGE_SIZE)
        .await
}
