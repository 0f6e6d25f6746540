//! Deploy requests
//!
//! A deploy request writes the whole plan up front: one Image, one scheduled
//! Deployment and one DeploymentJob per target machine. Agents pick the rows
//! up on their next poll.

use tracing::info;

use crate::errors::AgentError;
use crate::models::{
    Deployment, DeploymentJob, EnvLog, EnvironmentDeployments, Image, ImageStatus, PRIORITY_INFO,
};
use crate::services::env_logs::LogSink;
use crate::store::EntityStore;

/// Schedule a new deployment of `environment_id`
pub async fn create_deployment(
    store: &dyn EntityStore,
    logs: &dyn LogSink,
    environment_id: &str,
    source_folder: Option<String>,
) -> Result<Deployment, AgentError> {
    let environment = store
        .get_environment(environment_id)
        .await?
        .ok_or_else(|| AgentError::NotFound(format!("environment {}", environment_id)))?;
    let service = store
        .get_service(&environment.service_id)
        .await?
        .ok_or_else(|| AgentError::NotFound(format!("service {}", environment.service_id)))?;
    if environment.machine_ids.is_empty() {
        return Err(AgentError::DeployError(format!(
            "environment {} has no target machines",
            environment.id
        )));
    }

    let image_status = if service.uses_public_image() {
        ImageStatus::Ready
    } else {
        ImageStatus::ToBuild
    };
    let mut image = Image::new("", &environment.id, image_status);
    let deployment = Deployment::new(&environment.id, &image.id, source_folder);
    image.deployment_id = deployment.id.clone();

    store.insert_image(&image).await?;
    store.insert_deployment(&deployment).await?;
    for machine_id in &environment.machine_ids {
        store
            .insert_deployment_job(&DeploymentJob::new(&deployment.id, machine_id))
            .await?;
    }

    info!(
        deployment_id = %deployment.id,
        environment_id = %environment.id,
        machines = environment.machine_ids.len(),
        "Deployment scheduled"
    );
    logs.submit(
        EnvLog::info("")
            .environment(&environment.id)
            .deployment(&deployment.id)
            .image(&image.id)
            .with_message(
                PRIORITY_INFO,
                format!(
                    "Deployment {} scheduled on {} machine(s)",
                    deployment.id,
                    environment.machine_ids.len()
                ),
            ),
    )
    .await;

    Ok(deployment)
}

/// Deployment history of an environment, newest first
pub async fn list_deployments(
    store: &dyn EntityStore,
    environment_id: &str,
) -> Result<EnvironmentDeployments, AgentError> {
    let deployments = store.list_deployments_for_environment(environment_id).await?;
    Ok(EnvironmentDeployments::new(environment_id, deployments))
}
