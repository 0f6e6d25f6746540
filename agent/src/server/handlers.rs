//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::models::{Deployment, EnvLog, EnvironmentDeployments, LogWindow, Proxy};
use crate::server::state::ServerState;
use crate::services::{deployments, env_logs, environments};
use crate::utils::version_info;

/// Liveness probe routed through the edge proxy
pub async fn hey_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub machine_id: String,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "rollagent".to_string(),
        version: version.version,
        machine_id: state.machine_id.clone(),
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Optional deploy request body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeployRequest {
    pub source_folder: Option<String>,
}

impl DeployRequest {
    /// An empty body is a request without options
    pub fn from_body(body: &[u8]) -> Result<Self, AgentError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| AgentError::BadRequest(e.to_string()))
    }
}

/// Schedule a deployment of an environment
pub async fn deploy_environment_handler(
    State(state): State<Arc<ServerState>>,
    Path(environment_id): Path<String>,
    body: Bytes,
) -> Result<Json<Deployment>, AgentError> {
    let request = DeployRequest::from_body(&body)?;
    let deployment = deployments::create_deployment(
        state.store.as_ref(),
        state.logs.as_ref(),
        &environment_id,
        request.source_folder,
    )
    .await?;
    Ok(Json(deployment))
}

/// Deployment history of an environment
pub async fn environment_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(environment_id): Path<String>,
) -> Result<Json<EnvironmentDeployments>, AgentError> {
    let listed = deployments::list_deployments(state.store.as_ref(), &environment_id).await?;
    Ok(Json(listed))
}

/// Delete an environment and schedule its cleanup
pub async fn delete_environment_handler(
    State(state): State<Arc<ServerState>>,
    Path(environment_id): Path<String>,
) -> Result<StatusCode, AgentError> {
    environments::delete_environment(state.store.as_ref(), &state.proxy, &environment_id).await?;
    Ok(StatusCode::OK)
}

/// Every live proxy row
pub async fn proxies_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<Proxy>>, AgentError> {
    Ok(Json(state.store.list_proxies().await?))
}

/// Environment log page before or after a timestamp
pub async fn environment_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path((environment_id, direction, timestamp)): Path<(String, String, i64)>,
) -> Result<Json<Vec<EnvLog>>, AgentError> {
    let window = LogWindow::parse(&direction, timestamp).ok_or_else(|| {
        AgentError::NotFound(format!("use 'before' or 'after' instead of '{}'", direction))
    })?;
    let page = env_logs::query_logs(state.store.as_ref(), &environment_id, window).await?;
    Ok(Json(page))
}
