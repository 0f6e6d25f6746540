//! Build pipeline
//!
//! Turns a `to_build` Image into a pushed registry image. Runs on builder
//! machines only. A failed build leaves the Image `building` and the
//! Deployment `building_image`; nothing demotes them automatically.

use std::path::PathBuf;

use tracing::{error, info};

use crate::app::state::AppState;
use crate::deploy::docker::BuildScript;
use crate::deploy::fsm::check_transition;
use crate::deploy::git::clone_command;
use crate::deploy::process::CommandSpec;
use crate::deploy::run_logged;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::models::{
    partition_retained, Deployment, DeploymentStatus, EnvLog, Environment, Image, ImageStatus,
    Service, PRIORITY_ERR, PRIORITY_INFO,
};
use crate::utils::generate_id;

/// Build `image` for `deployment`.
///
/// Returns `Ok(false)` when another agent claimed the image first.
pub async fn build_image(
    state: &AppState,
    deployment: &Deployment,
    image: &Image,
) -> Result<bool, AgentError> {
    if !state.machine.is_builder() {
        return Err(AgentError::DeployError(format!(
            "machine {} is not a builder",
            state.machine.id
        )));
    }
    check_transition(image.status, ImageStatus::Building)?;
    check_transition(deployment.status, DeploymentStatus::BuildingImage)?;

    let claimed = state
        .store
        .update_image_status(
            &image.id,
            ImageStatus::Building,
            state.claim_guard(image.status),
        )
        .await?;
    if !claimed {
        info!(image_id = %image.id, "Image already claimed by another builder");
        return Ok(false);
    }
    state
        .store
        .update_deployment_status(&deployment.id, DeploymentStatus::BuildingImage, None)
        .await?;

    let environment = state
        .store
        .get_environment(&deployment.environment_id)
        .await?
        .ok_or_else(|| AgentError::NotFound(format!("environment {}", deployment.environment_id)))?;
    let service = state
        .store
        .get_service(&environment.service_id)
        .await?
        .ok_or_else(|| AgentError::NotFound(format!("service {}", environment.service_id)))?;

    let log = state
        .log_template()
        .environment(&environment.id)
        .deployment(&deployment.id)
        .image(&image.id);
    state
        .logs
        .submit(log.with_message(PRIORITY_INFO, format!("Building image {}", image.id)))
        .await;

    match run_build(state, deployment, image, &environment, &service, &log).await {
        Ok(()) => {
            state
                .store
                .update_image_status(&image.id, ImageStatus::Ready, None)
                .await?;
            state
                .store
                .update_deployment_status(
                    &deployment.id,
                    DeploymentStatus::StartingContainers,
                    None,
                )
                .await?;
            info!(
                deployment_id = %deployment.id,
                image_id = %image.id,
                "Image built and pushed"
            );
            state
                .logs
                .submit(log.with_message(PRIORITY_INFO, format!("Image {} is ready", image.id)))
                .await;
            Ok(true)
        }
        Err(e) => {
            error!(
                deployment_id = %deployment.id,
                image_id = %image.id,
                "Image build failed: {}",
                e
            );
            state.store.set_image_error(&image.id, &e.to_string()).await?;
            state
                .logs
                .submit(log.with_message(PRIORITY_ERR, format!("Image build failed: {}", e)))
                .await;
            Err(e)
        }
    }
}

async fn run_build(
    state: &AppState,
    deployment: &Deployment,
    image: &Image,
    environment: &Environment,
    service: &Service,
    log: &EnvLog,
) -> Result<(), AgentError> {
    let (checkout, fresh) = match &deployment.source_folder {
        Some(folder) => (PathBuf::from(folder), false),
        None => {
            let parent = Dir::new(&state.deploy.checkouts_dir);
            parent.create().await?;
            (parent.subdir(&generate_id(10)).path().to_path_buf(), true)
        }
    };

    if fresh {
        let git_ref = if environment.git_tag.trim().is_empty() {
            &environment.branch
        } else {
            &environment.git_tag
        };
        run_logged(state, &clone_command(&service.git_url, git_ref, &checkout), log)
            .await?
            .into_result("git clone")?;
    }

    let images = state
        .store
        .list_images_for_environment(&environment.id)
        .await?;
    let (_, stale) = partition_retained(&images, Some(image.id.as_str()));
    let stale_ids: Vec<String> = stale.iter().map(|i| i.id.clone()).collect();

    let script = BuildScript {
        checkout: &checkout,
        image_id: &image.id,
        registry: &state.deploy.registry,
        remove_checkout: fresh,
        stale_image_ids: &stale_ids,
    }
    .render();

    run_logged(state, &CommandSpec::shell(script), log)
        .await?
        .into_result("image build")
}
