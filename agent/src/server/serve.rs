//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::AgentError;
use crate::server::handlers::{
    delete_environment_handler, deploy_environment_handler, environment_deployments_handler,
    environment_logs_handler, health_handler, hey_handler, proxies_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes served by the agent
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/hey", get(hey_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route("/deploy/environment/{id}", post(deploy_environment_handler))
        .route(
            "/environment/{id}/deployments",
            get(environment_deployments_handler),
        )
        .route("/environment/{id}", delete(delete_environment_handler))
        // Routing and logs
        .route("/proxy", get(proxies_handler))
        .route(
            "/logs/environment/{id}/{direction}/{timestamp}",
            get(environment_logs_handler),
        )
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AgentError>>, AgentError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AgentError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AgentError::ServerError(e.to_string()))
    });

    Ok(handle)
}
