//! Image cleanup worker
//!
//! ImageJobs are not scoped to a machine: whichever agent picks one up first
//! removes the images from its local storage and from the registry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::state::AppState;
use crate::deploy::cleanup::remove_environment_images;
use crate::errors::AgentError;
use crate::models::JobStatus;

/// Image job worker options
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

/// Run the image job worker
pub async fn run<S, F>(
    options: &Options,
    state: Arc<AppState>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Image job worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Image job worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        if let Err(e) = tick(&state).await {
            error!("Image job tick failed: {}", e);
        }
    }
}

/// Dispatch every planned image job
pub async fn tick(state: &Arc<AppState>) -> Result<Vec<JoinHandle<()>>, AgentError> {
    let planned = state
        .store
        .list_image_jobs_by_status(JobStatus::Planned)
        .await?;

    let handles = planned
        .into_iter()
        .map(|job| {
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = remove_environment_images(&state, &job).await {
                    error!(
                        job_id = %job.id,
                        environment_id = %job.environment_id,
                        "Image cleanup failed: {}",
                        e
                    );
                }
            })
        })
        .collect();
    Ok(handles)
}
