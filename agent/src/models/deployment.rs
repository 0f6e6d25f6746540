//! Deployment models

use serde::{Deserialize, Serialize};

use crate::models::ID_LEN;
use crate::utils::{generate_id, now_micros};

/// Replica suffix of the single container started per deployment
pub const REPLICA_SUFFIX: &str = "1";

/// Lifecycle of a single rollout attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Scheduled,
    BuildingImage,
    StartingContainers,
    Finished,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Scheduled => "scheduled",
            DeploymentStatus::BuildingImage => "building_image",
            DeploymentStatus::StartingContainers => "starting_containers",
            DeploymentStatus::Finished => "finished",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rollout attempt for an environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Deployment {
    pub id: String,
    pub status: DeploymentStatus,
    pub environment_id: String,
    pub image_id: String,

    /// Existing checkout to build from instead of cloning
    #[serde(default)]
    pub source_folder: Option<String>,

    #[serde(default)]
    pub created_at: i64,
}

impl Deployment {
    /// Create a scheduled deployment
    pub fn new(environment_id: &str, image_id: &str, source_folder: Option<String>) -> Self {
        Self {
            id: generate_id(ID_LEN),
            status: DeploymentStatus::Scheduled,
            environment_id: environment_id.to_string(),
            image_id: image_id.to_string(),
            source_folder: source_folder.filter(|s| !s.trim().is_empty()),
            created_at: now_micros(),
        }
    }

    /// Name of the container started for this deployment
    pub fn container_name(&self) -> String {
        container_name(&self.id)
    }
}

/// Container name for a deployment id
pub fn container_name(deployment_id: &str) -> String {
    format!("{}.{}", deployment_id, REPLICA_SUFFIX)
}
