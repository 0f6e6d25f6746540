//! Cleanup pipelines for deleted environments

use tracing::{info, warn};

use crate::app::state::AppState;
use crate::deploy::docker::{remove_container_script, remove_images_script};
use crate::deploy::fsm::check_transition;
use crate::deploy::process::CommandSpec;
use crate::deploy::run_logged;
use crate::errors::AgentError;
use crate::models::{partition_retained, ContainerJob, ImageJob, JobStatus, PRIORITY_INFO};

/// Stop and remove the environment's current container on this machine,
/// then finish the job.
pub async fn remove_environment_containers(
    state: &AppState,
    job: &ContainerJob,
) -> Result<(), AgentError> {
    if job.machine_id != state.machine.id {
        return Err(AgentError::DeployError(format!(
            "container job {} targets machine {}, not {}",
            job.id, job.machine_id, state.machine.id
        )));
    }
    check_transition(job.status, JobStatus::Finished)?;

    let history = state
        .store
        .list_deployments_for_environment(&job.environment_id)
        .await?;
    let log = state.log_template().environment(&job.environment_id);

    match history.first() {
        Some(latest) => {
            let container = latest.container_name();
            state
                .logs
                .submit(log.clone().deployment(&latest.id).with_message(
                    PRIORITY_INFO,
                    format!("Removing container {}", container),
                ))
                .await;
            let script = remove_container_script(&container);
            let outcome = run_logged(state, &CommandSpec::shell(script), &log).await?;
            if !outcome.success() {
                warn!(
                    job_id = %job.id,
                    "Removing container {} exited with {:?}",
                    container,
                    outcome.code
                );
            }
        }
        None => info!(
            job_id = %job.id,
            environment_id = %job.environment_id,
            "No deployments left, nothing to remove"
        ),
    }

    state
        .store
        .update_container_job_status(&job.id, JobStatus::Finished)
        .await?;
    info!(job_id = %job.id, environment_id = %job.environment_id, "Container job finished");
    Ok(())
}

/// Remove the environment's retained images locally and from the registry,
/// then finish the job.
pub async fn remove_environment_images(state: &AppState, job: &ImageJob) -> Result<(), AgentError> {
    check_transition(job.status, JobStatus::Finished)?;

    let images = state
        .store
        .list_images_for_environment(&job.environment_id)
        .await?;
    let (retained, _) = partition_retained(&images, None);
    let ids: Vec<String> = retained.iter().map(|i| i.id.clone()).collect();

    if !ids.is_empty() {
        let log = state.log_template().environment(&job.environment_id);
        state
            .logs
            .submit(log.with_message(
                PRIORITY_INFO,
                format!("Removing images {}", ids.join(", ")),
            ))
            .await;
        let script = remove_images_script(&ids, &state.deploy.registry);
        run_logged(state, &CommandSpec::shell(script), &log)
            .await?
            .into_result("image removal")?;
    }

    state
        .store
        .update_image_job_status(&job.id, JobStatus::Finished)
        .await?;
    info!(
        job_id = %job.id,
        environment_id = %job.environment_id,
        removed = ids.len(),
        "Image job finished"
    );
    Ok(())
}
