//! Environment and service models

use serde::{Deserialize, Serialize};

use crate::models::ID_LEN;
use crate::utils::{generate_id, now_micros};

/// A deployable source or image, owned by the fleet API
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(rename = "GitURL")]
    pub git_url: String,

    /// Public registry image; when set, nothing is built
    pub image_name: String,
    pub project_id: String,
}

impl Service {
    pub fn uses_public_image(&self) -> bool {
        !self.image_name.trim().is_empty()
    }
}

/// One deployable unit of a service on a given branch
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Environment {
    pub id: String,
    pub service_id: String,
    pub name: String,
    pub branch: String,
    pub git_tag: String,
    pub domains: Vec<String>,
    pub machine_ids: Vec<String>,

    /// Port the container listens on
    pub port: String,
    pub created_at: i64,
}

impl Environment {
    pub fn new(service_id: &str, name: &str, branch: &str, port: &str) -> Self {
        Self {
            id: generate_id(ID_LEN),
            service_id: service_id.to_string(),
            name: name.to_string(),
            branch: branch.to_string(),
            port: port.to_string(),
            created_at: now_micros(),
            ..Default::default()
        }
    }
}

/// Deployment history summary returned with an environment's deployments
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvironmentDeployments {
    pub environment_id: String,
    pub last_deployment_status: String,
    pub deployments: Vec<crate::models::Deployment>,
}

impl EnvironmentDeployments {
    /// Build from deployments ordered newest first
    pub fn new(environment_id: &str, deployments: Vec<crate::models::Deployment>) -> Self {
        let last_deployment_status = deployments
            .first()
            .map(|d| d.status.as_str().to_string())
            .unwrap_or_else(|| "no deployments".to_string());
        Self {
            environment_id: environment_id.to_string(),
            last_deployment_status,
            deployments,
        }
    }
}
