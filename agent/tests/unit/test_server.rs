//! Local HTTP API

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use rollagent::models::MachineType;
use rollagent::server::serve::router;
use rollagent::server::state::ServerState;

use crate::common::{Agent, Fleet};

fn app(fleet: &Fleet, agent: &Agent) -> Router {
    router(Arc::new(ServerState::new(
        fleet.dyn_store(),
        agent.state.logs.clone(),
        agent.state.proxy.clone(),
        agent.state.machine.id.clone(),
    )))
}

async fn send(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_probes() {
    let fleet = Fleet::new();
    let agent = fleet
        .agent("m1", "192.168.202.1", vec![MachineType::Workload])
        .await;
    let app = app(&fleet, &agent);

    let (status, _) = send(&app, Method::GET, "/hey", "").await;
    assert_eq!(status, StatusCode::OK);

    let (status, health) = send(&app, Method::GET, "/health", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["machine_id"], agent.state.machine.id.as_str());

    let (status, _) = send(&app, Method::GET, "/nope", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deploy_list_and_delete() {
    let fleet = Fleet::new();
    let agent = fleet
        .agent(
            "m1",
            "192.168.202.1",
            vec![MachineType::Builder, MachineType::Workload],
        )
        .await;
    let environment = fleet.environment(&[&agent], &["a.example.com"], "").await;
    let app = app(&fleet, &agent);
    let deploy_uri = format!("/deploy/environment/{}", environment.id);

    let (status, deployment) = send(&app, Method::POST, &deploy_uri, "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deployment["Status"], "scheduled");
    assert_eq!(deployment["EnvironmentId"], environment.id.as_str());

    let (status, deployment) = send(
        &app,
        Method::POST,
        &deploy_uri,
        r#"{"SourceFolder": "/srv/src/web"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deployment["SourceFolder"], "/srv/src/web");

    let (status, _) = send(&app, Method::POST, &deploy_uri, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::POST, "/deploy/environment/missing", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, listed) = send(
        &app,
        Method::GET,
        &format!("/environment/{}/deployments", environment.id),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["LastDeploymentStatus"], "scheduled");
    assert_eq!(listed["Deployments"].as_array().unwrap().len(), 2);

    let (status, logs) = send(
        &app,
        Method::GET,
        &format!("/logs/environment/{}/after/0", environment.id),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!logs.as_array().unwrap().is_empty());

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/logs/environment/{}/sideways/0", environment.id),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/environment/{}", environment.id),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, proxies) = send(&app, Method::GET, "/proxy", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(proxies, Value::Array(vec![]));

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/environment/{}", environment.id),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
