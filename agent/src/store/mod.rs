//! Shared entity store
//!
//! Every agent reads and writes the same replicated tables. Status updates take
//! an optional `expected` status: `None` writes unconditionally, `Some(s)` only
//! writes when the row is still in `s`. Both return whether a row was changed.

pub mod memory;
pub mod rqlite;

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::models::{
    ContainerJob, Deployment, DeploymentJob, DeploymentJobStatus, DeploymentStatus, EnvLog,
    Environment, Image, ImageJob, ImageStatus, JobStatus, LogWindow, Machine, Proxy, Service,
};

pub use memory::MemoryStore;
pub use rqlite::RqliteStore;

/// Maximum number of log lines returned by one log query
pub const LOG_PAGE_SIZE: usize = 100;

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Prepare the backend (leader election, tables, indexes)
    async fn init(&self) -> Result<(), AgentError>;

    // machines
    async fn insert_machine(&self, machine: &Machine) -> Result<(), AgentError>;
    async fn find_machine_by_name(&self, name: &str) -> Result<Option<Machine>, AgentError>;
    async fn list_machines(&self) -> Result<Vec<Machine>, AgentError>;

    // services
    async fn insert_service(&self, service: &Service) -> Result<(), AgentError>;
    async fn get_service(&self, id: &str) -> Result<Option<Service>, AgentError>;

    // environments
    async fn insert_environment(&self, environment: &Environment) -> Result<(), AgentError>;
    async fn get_environment(&self, id: &str) -> Result<Option<Environment>, AgentError>;
    async fn delete_environment(&self, id: &str) -> Result<(), AgentError>;

    // deployments
    async fn insert_deployment(&self, deployment: &Deployment) -> Result<(), AgentError>;
    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, AgentError>;
    async fn list_deployments_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, AgentError>;
    /// Newest first
    async fn list_deployments_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<Deployment>, AgentError>;
    async fn update_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        expected: Option<DeploymentStatus>,
    ) -> Result<bool, AgentError>;

    // images
    async fn insert_image(&self, image: &Image) -> Result<(), AgentError>;
    async fn get_image(&self, id: &str) -> Result<Option<Image>, AgentError>;
    /// Newest first
    async fn list_images_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<Image>, AgentError>;
    async fn update_image_status(
        &self,
        id: &str,
        status: ImageStatus,
        expected: Option<ImageStatus>,
    ) -> Result<bool, AgentError>;
    async fn set_image_error(&self, id: &str, error_msg: &str) -> Result<(), AgentError>;

    // deployment jobs
    async fn insert_deployment_job(&self, job: &DeploymentJob) -> Result<(), AgentError>;
    async fn list_deployment_jobs_for_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<DeploymentJob>, AgentError>;
    async fn update_deployment_job_status(
        &self,
        id: &str,
        status: DeploymentJobStatus,
        expected: Option<DeploymentJobStatus>,
    ) -> Result<bool, AgentError>;

    // container jobs
    async fn insert_container_job(&self, job: &ContainerJob) -> Result<(), AgentError>;
    async fn list_container_jobs_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ContainerJob>, AgentError>;
    async fn list_container_jobs_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<ContainerJob>, AgentError>;
    async fn update_container_job_status(
        &self,
        id: &str,
        status: JobStatus,
    ) -> Result<bool, AgentError>;

    // image jobs
    async fn insert_image_job(&self, job: &ImageJob) -> Result<(), AgentError>;
    async fn list_image_jobs_by_status(&self, status: JobStatus)
        -> Result<Vec<ImageJob>, AgentError>;
    async fn list_image_jobs_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<ImageJob>, AgentError>;
    async fn update_image_job_status(&self, id: &str, status: JobStatus)
        -> Result<bool, AgentError>;

    // proxies
    async fn insert_proxy(&self, proxy: &Proxy) -> Result<(), AgentError>;
    /// Oldest first
    async fn list_proxies(&self) -> Result<Vec<Proxy>, AgentError>;
    /// Delete rows of `environment_id` that belong to any other deployment
    async fn delete_superseded_proxies(
        &self,
        environment_id: &str,
        deployment_id: &str,
    ) -> Result<u64, AgentError>;
    async fn delete_proxies_for_environment(&self, environment_id: &str)
        -> Result<u64, AgentError>;

    // environment logs
    async fn insert_env_log(&self, entry: &EnvLog) -> Result<(), AgentError>;
    /// At most `limit` entries inside `window`, newest first
    async fn list_env_logs(
        &self,
        environment_id: &str,
        window: LogWindow,
        limit: usize,
    ) -> Result<Vec<EnvLog>, AgentError>;
}
