//! Deployment scheduler
//!
//! Each tick walks the scheduled and starting_containers deployments, starts
//! builds on builder machines, advances deployments whose image is ready and
//! rolls out the DeploymentJobs addressed to this machine. Pipelines run as
//! detached tasks; the tick itself never waits for them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::app::state::AppState;
use crate::deploy::{build, rollout};
use crate::errors::AgentError;
use crate::models::{Deployment, DeploymentJobStatus, DeploymentStatus, Image, ImageStatus};

/// Deployment worker options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

/// Run the deployment worker
pub async fn run<S, F>(
    options: &Options,
    state: Arc<AppState>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Deployment worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployment worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        match tick(&state).await {
            Ok(dispatched) if !dispatched.is_empty() => {
                debug!("Dispatched {} deployment tasks", dispatched.len());
            }
            Ok(_) => {}
            Err(e) => error!("Deployment tick failed: {}", e),
        }
    }
}

/// One scheduler pass. Returns the handles of the pipelines it dispatched.
pub async fn tick(state: &Arc<AppState>) -> Result<Vec<JoinHandle<()>>, AgentError> {
    let mut dispatched = Vec::new();

    let scheduled = state
        .store
        .list_deployments_by_status(DeploymentStatus::Scheduled)
        .await?;
    for deployment in scheduled {
        let Some(image) = state.store.get_image(&deployment.image_id).await? else {
            debug!(deployment_id = %deployment.id, "Image row not visible yet");
            continue;
        };
        match image.status {
            ImageStatus::ToBuild if state.machine.is_builder() => {
                dispatched.push(spawn_build(state, deployment, image));
            }
            ImageStatus::Ready => {
                // Public images skip the build phase
                state
                    .store
                    .update_deployment_status(
                        &deployment.id,
                        DeploymentStatus::StartingContainers,
                        state.claim_guard(deployment.status),
                    )
                    .await?;
                info!(deployment_id = %deployment.id, "Image ready, starting containers");
            }
            _ => {}
        }
    }

    let starting = state
        .store
        .list_deployments_by_status(DeploymentStatus::StartingContainers)
        .await?;
    for deployment in starting {
        let jobs = state
            .store
            .list_deployment_jobs_for_deployment(&deployment.id)
            .await?;

        if !jobs.is_empty() && jobs.iter().all(|j| j.status == DeploymentJobStatus::Deployed) {
            state
                .store
                .update_deployment_status(
                    &deployment.id,
                    DeploymentStatus::Finished,
                    state.claim_guard(deployment.status),
                )
                .await?;
            info!(deployment_id = %deployment.id, "Deployment finished");
            continue;
        }

        for job in jobs.into_iter().filter(|j| {
            j.status == DeploymentJobStatus::ToDeploy && j.machine_id == state.machine.id
        }) {
            let state = state.clone();
            dispatched.push(tokio::spawn(async move {
                if let Err(e) = rollout::roll_out(&state, &job).await {
                    error!(
                        job_id = %job.id,
                        deployment_id = %job.deployment_id,
                        machine_id = %job.machine_id,
                        "Rollout task failed: {}",
                        e
                    );
                }
            }));
        }
    }

    Ok(dispatched)
}

fn spawn_build(state: &Arc<AppState>, deployment: Deployment, image: Image) -> JoinHandle<()> {
    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = build::build_image(&state, &deployment, &image).await {
            error!(
                deployment_id = %deployment.id,
                image_id = %image.id,
                machine_id = %state.machine.id,
                "Build task failed: {}",
                e
            );
        }
    })
}
