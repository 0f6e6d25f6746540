//! Container cleanup worker

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::state::AppState;
use crate::deploy::cleanup::remove_environment_containers;
use crate::errors::AgentError;
use crate::models::JobStatus;

/// Container job worker options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Run the container job worker
pub async fn run<S, F>(
    options: &Options,
    state: Arc<AppState>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Container job worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Container job worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        if let Err(e) = tick(&state).await {
            error!("Container job tick failed: {}", e);
        }
    }
}

/// Dispatch the planned container jobs addressed to this machine
pub async fn tick(state: &Arc<AppState>) -> Result<Vec<JoinHandle<()>>, AgentError> {
    let planned = state
        .store
        .list_container_jobs_by_status(JobStatus::Planned)
        .await?;

    let handles = planned
        .into_iter()
        .filter(|job| job.machine_id == state.machine.id)
        .map(|job| {
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = remove_environment_containers(&state, &job).await {
                    error!(
                        job_id = %job.id,
                        environment_id = %job.environment_id,
                        "Container cleanup failed: {}",
                        e
                    );
                }
            })
        })
        .collect();
    Ok(handles)
}
