//! Machine-scoped job models
//!
//! One DeploymentJob exists per (deployment, target machine) pair. ContainerJob
//! and ImageJob are one-shot deletion items scheduled when an environment is
//! removed.

use serde::{Deserialize, Serialize};

use crate::models::ID_LEN;
use crate::utils::{generate_id, now_micros};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentJobStatus {
    ToDeploy,
    InProgress,
    Deployed,
}

impl DeploymentJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentJobStatus::ToDeploy => "to_deploy",
            DeploymentJobStatus::InProgress => "in_progress",
            DeploymentJobStatus::Deployed => "deployed",
        }
    }
}

/// Status shared by the cleanup job families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Planned,
    Finished,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Planned => "planned",
            JobStatus::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Delete,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeploymentJob {
    pub id: String,
    pub status: DeploymentJobStatus,
    pub deployment_id: String,
    pub machine_id: String,
    #[serde(default)]
    pub created_at: i64,
}

impl DeploymentJob {
    pub fn new(deployment_id: &str, machine_id: &str) -> Self {
        Self {
            id: generate_id(ID_LEN),
            status: DeploymentJobStatus::ToDeploy,
            deployment_id: deployment_id.to_string(),
            machine_id: machine_id.to_string(),
            created_at: now_micros(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerJob {
    pub id: String,
    pub status: JobStatus,
    pub environment_id: String,
    pub machine_id: String,
    pub job_type: JobType,
    #[serde(default)]
    pub created_at: i64,
}

impl ContainerJob {
    pub fn delete(environment_id: &str, machine_id: &str) -> Self {
        Self {
            id: generate_id(ID_LEN),
            status: JobStatus::Planned,
            environment_id: environment_id.to_string(),
            machine_id: machine_id.to_string(),
            job_type: JobType::Delete,
            created_at: now_micros(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageJob {
    pub id: String,
    pub status: JobStatus,
    pub environment_id: String,
    pub job_type: JobType,
    #[serde(default)]
    pub created_at: i64,
}

impl ImageJob {
    pub fn delete(environment_id: &str) -> Self {
        Self {
            id: generate_id(ID_LEN),
            status: JobStatus::Planned,
            environment_id: environment_id.to_string(),
            job_type: JobType::Delete,
            created_at: now_micros(),
        }
    }
}
