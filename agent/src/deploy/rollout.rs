//! Rollout pipeline
//!
//! Starts the container for one DeploymentJob on this machine, cuts the
//! environment's proxy rows over to it and retires the previous container.

use tracing::{error, info, warn};

use crate::app::state::AppState;
use crate::deploy::docker::{remove_container_script, RunScript};
use crate::deploy::fsm::check_transition;
use crate::deploy::ports::free_port;
use crate::deploy::process::CommandSpec;
use crate::deploy::run_logged;
use crate::errors::AgentError;
use crate::models::{
    Deployment, DeploymentJob, DeploymentJobStatus, EnvLog, Environment, ImageStatus, Proxy,
    PRIORITY_ERR, PRIORITY_INFO,
};

/// Roll out `job`, which must target this machine.
///
/// Returns `Ok(false)` when the job was already claimed.
pub async fn roll_out(state: &AppState, job: &DeploymentJob) -> Result<bool, AgentError> {
    if job.machine_id != state.machine.id {
        return Err(AgentError::DeployError(format!(
            "job {} targets machine {}, not {}",
            job.id, job.machine_id, state.machine.id
        )));
    }
    check_transition(job.status, DeploymentJobStatus::InProgress)?;

    let deployment = state
        .store
        .get_deployment(&job.deployment_id)
        .await?
        .ok_or_else(|| AgentError::NotFound(format!("deployment {}", job.deployment_id)))?;
    let environment = state
        .store
        .get_environment(&deployment.environment_id)
        .await?
        .ok_or_else(|| AgentError::NotFound(format!("environment {}", deployment.environment_id)))?;
    let image_ref = resolve_image(state, &deployment, &environment).await?;

    let claimed = state
        .store
        .update_deployment_job_status(
            &job.id,
            DeploymentJobStatus::InProgress,
            state.claim_guard(job.status),
        )
        .await?;
    if !claimed {
        info!(job_id = %job.id, "Deployment job already claimed");
        return Ok(false);
    }

    let log = state
        .log_template()
        .environment(&environment.id)
        .deployment(&deployment.id)
        .image(&deployment.image_id);

    match start_container(state, &deployment, &environment, &image_ref, &log).await {
        Ok(port) => {
            state
                .store
                .update_deployment_job_status(&job.id, DeploymentJobStatus::Deployed, None)
                .await?;
            cut_over(state, &deployment, &environment, port).await?;
            retire_previous(state, &deployment, &log).await;

            if let Err(e) = state.proxy.compile().await {
                error!(deployment_id = %deployment.id, "Proxy compile failed: {}", e);
            }

            info!(
                job_id = %job.id,
                deployment_id = %deployment.id,
                port,
                "Container started"
            );
            state
                .logs
                .submit(log.with_message(
                    PRIORITY_INFO,
                    format!(
                        "Container {} listening on {}:{}",
                        deployment.container_name(),
                        state.machine.vpn_ip,
                        port
                    ),
                ))
                .await;
            Ok(true)
        }
        Err(e) => {
            error!(
                job_id = %job.id,
                deployment_id = %deployment.id,
                "Rollout failed: {}",
                e
            );
            state
                .logs
                .submit(log.with_message(PRIORITY_ERR, format!("Rollout failed: {}", e)))
                .await;
            Err(e)
        }
    }
}

/// Image reference to run and whether it must be pulled from the registry first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub reference: String,
    pub pull: bool,
}

async fn resolve_image(
    state: &AppState,
    deployment: &Deployment,
    environment: &Environment,
) -> Result<ImageRef, AgentError> {
    let image = state
        .store
        .get_image(&deployment.image_id)
        .await?
        .ok_or_else(|| AgentError::NotFound(format!("image {}", deployment.image_id)))?;
    if image.status != ImageStatus::Ready {
        return Err(AgentError::DeployError(format!(
            "image {} is {}",
            image.id, image.status
        )));
    }
    let service = state
        .store
        .get_service(&environment.service_id)
        .await?
        .ok_or_else(|| AgentError::NotFound(format!("service {}", environment.service_id)))?;

    Ok(if service.uses_public_image() {
        ImageRef {
            reference: service.image_name.trim().to_string(),
            pull: false,
        }
    } else {
        ImageRef {
            reference: image.registry_ref(&state.deploy.registry),
            pull: true,
        }
    })
}

async fn start_container(
    state: &AppState,
    deployment: &Deployment,
    environment: &Environment,
    image: &ImageRef,
    log: &EnvLog,
) -> Result<u16, AgentError> {
    let port = free_port().await?;
    let container_name = deployment.container_name();
    let script = RunScript {
        image_ref: &image.reference,
        pull: image.pull,
        bind_ip: &state.machine.vpn_ip,
        host_port: port,
        container_port: environment.port.trim(),
        container_name: &container_name,
    }
    .render();

    run_logged(state, &CommandSpec::shell(script), log)
        .await?
        .into_result("container start")?;
    Ok(port)
}

/// Replace the environment's proxy rows with ones pointing at this container
async fn cut_over(
    state: &AppState,
    deployment: &Deployment,
    environment: &Environment,
    port: u16,
) -> Result<(), AgentError> {
    let removed = state
        .store
        .delete_superseded_proxies(&environment.id, &deployment.id)
        .await?;
    if removed > 0 {
        info!(
            environment_id = %environment.id,
            "Removed {} superseded proxy rows",
            removed
        );
    }

    for domain in &environment.domains {
        let proxy = Proxy::new(
            domain,
            &state.machine.vpn_ip,
            port,
            &environment.id,
            &deployment.id,
        );
        state.store.insert_proxy(&proxy).await?;
    }
    Ok(())
}

/// Stop the container of the deployment created right before `deployment`
async fn retire_previous(state: &AppState, deployment: &Deployment, log: &EnvLog) {
    let history = match state
        .store
        .list_deployments_for_environment(&deployment.environment_id)
        .await
    {
        Ok(history) => history,
        Err(e) => {
            warn!(deployment_id = %deployment.id, "Cannot load deployment history: {}", e);
            return;
        }
    };

    let Some(previous) = previous_deployment(&history, &deployment.id) else {
        return;
    };

    let script = remove_container_script(&previous.container_name());
    match run_logged(state, &CommandSpec::shell(script), log).await {
        Ok(outcome) if outcome.success() => {
            info!(
                deployment_id = %deployment.id,
                "Retired container {}",
                previous.container_name()
            );
        }
        Ok(outcome) => warn!(
            "Removing container {} exited with {:?}",
            previous.container_name(),
            outcome.code
        ),
        Err(e) => warn!(
            "Removing container {} failed: {}",
            previous.container_name(),
            e
        ),
    }
}

/// The deployment following `current_id` in a newest-first history
pub fn previous_deployment<'a>(
    history_newest_first: &'a [Deployment],
    current_id: &str,
) -> Option<&'a Deployment> {
    let position = history_newest_first
        .iter()
        .position(|d| d.id == current_id)?;
    history_newest_first.get(position + 1)
}
