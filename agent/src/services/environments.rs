//! Environment deletion
//!
//! Deleting an environment schedules its cleanup (one ContainerJob per target
//! machine plus one ImageJob), drops its proxy rows and then the row itself.

use tracing::{info, warn};

use crate::errors::AgentError;
use crate::models::{ContainerJob, Environment, ImageJob};
use crate::proxy::ProxyCompiler;
use crate::store::EntityStore;

/// Cleanup work scheduled by a deletion
#[derive(Debug, Clone)]
pub struct ScheduledCleanup {
    pub container_jobs: Vec<ContainerJob>,
    pub image_job: ImageJob,
    pub removed_proxies: u64,
}

/// Delete `environment_id` and schedule removal of its containers and images
pub async fn delete_environment(
    store: &dyn EntityStore,
    proxy: &ProxyCompiler,
    environment_id: &str,
) -> Result<ScheduledCleanup, AgentError> {
    let environment = store
        .get_environment(environment_id)
        .await?
        .ok_or_else(|| AgentError::NotFound(format!("environment {}", environment_id)))?;

    let cleanup = schedule_cleanup(store, &environment).await?;
    store.delete_environment(&environment.id).await?;

    info!(
        environment_id = %environment.id,
        container_jobs = cleanup.container_jobs.len(),
        removed_proxies = cleanup.removed_proxies,
        "Environment deleted"
    );

    if let Err(e) = proxy.compile().await {
        warn!(environment_id = %environment.id, "Proxy compile failed: {}", e);
    }
    Ok(cleanup)
}

async fn schedule_cleanup(
    store: &dyn EntityStore,
    environment: &Environment,
) -> Result<ScheduledCleanup, AgentError> {
    let mut container_jobs = Vec::with_capacity(environment.machine_ids.len());
    for machine_id in &environment.machine_ids {
        let job = ContainerJob::delete(&environment.id, machine_id);
        store.insert_container_job(&job).await?;
        container_jobs.push(job);
    }

    let image_job = ImageJob::delete(&environment.id);
    store.insert_image_job(&image_job).await?;

    let removed_proxies = store.delete_proxies_for_environment(&environment.id).await?;

    Ok(ScheduledCleanup {
        container_jobs,
        image_job,
        removed_proxies,
    })
}
