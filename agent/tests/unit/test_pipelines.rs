//! Failure handling, supersession, retention, cleanup and claims

use rollagent::deploy::build::build_image;
use rollagent::deploy::rollout::roll_out;
use rollagent::models::{
    Deployment, DeploymentJobStatus, DeploymentStatus, ImageStatus, JobStatus, Machine,
    MachineType,
};
use rollagent::services::deployments::create_deployment;
use rollagent::services::environments::delete_environment;
use rollagent::store::EntityStore;
use rollagent::workers::{container_jobs, deployments, image_jobs};

use crate::common::{converge, drain, Agent, Fleet};

async fn deploy(fleet: &Fleet, agent: &Agent, environment_id: &str) -> Deployment {
    create_deployment(
        fleet.store.as_ref(),
        agent.state.logs.as_ref(),
        environment_id,
        None,
    )
    .await
    .unwrap()
}

async fn builder_workload(fleet: &Fleet, name: &str, ip: &str) -> Agent {
    fleet
        .agent(name, ip, vec![MachineType::Builder, MachineType::Workload])
        .await
}

#[tokio::test]
async fn test_failed_build_is_left_building() {
    let fleet = Fleet::new();
    let m1 = builder_workload(&fleet, "m1", "192.168.202.1").await;
    let environment = fleet.environment(&[&m1], &["a.example.com"], "").await;
    let d1 = deploy(&fleet, &m1, &environment.id).await;

    m1.runner.fail_when("docker build");
    assert_eq!(drain(deployments::tick(&m1.state).await.unwrap()).await, 1);

    let image = fleet.store.get_image(&d1.image_id).await.unwrap().unwrap();
    assert_eq!(image.status, ImageStatus::Building);
    assert!(image.error_msg.contains("image build"), "{}", image.error_msg);
    let deployment = fleet.store.get_deployment(&d1.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::BuildingImage);

    // Nothing picks the build up again, even once the cause is gone
    m1.runner.clear_failures();
    for _ in 0..3 {
        assert_eq!(drain(deployments::tick(&m1.state).await.unwrap()).await, 0);
    }
    assert_eq!(m1.runner.count("docker build"), 1);
    assert!(fleet.store.list_proxies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_container_start_is_left_in_progress() {
    let fleet = Fleet::new();
    let worker = fleet
        .agent("worker", "192.168.202.2", vec![MachineType::Workload])
        .await;
    let environment = fleet
        .environment(&[&worker], &["nginx.example.com"], "nginx:1.27")
        .await;
    let d1 = deploy(&fleet, &worker, &environment.id).await;

    worker.runner.fail_when("docker container run");
    converge(&[&worker]).await;

    let jobs = fleet
        .store
        .list_deployment_jobs_for_deployment(&d1.id)
        .await
        .unwrap();
    assert_eq!(jobs[0].status, DeploymentJobStatus::InProgress);
    let deployment = fleet.store.get_deployment(&d1.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::StartingContainers);
    assert_eq!(worker.runner.count("docker container run"), 1);
    assert!(fleet.store.list_proxies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_new_deployment_supersedes_routes() {
    let fleet = Fleet::new();
    let m1 = builder_workload(&fleet, "m1", "192.168.202.1").await;
    let environment = fleet
        .environment(&[&m1], &["a.example.com", "www.a.example.com"], "")
        .await;

    let d1 = deploy(&fleet, &m1, &environment.id).await;
    converge(&[&m1]).await;
    let d2 = deploy(&fleet, &m1, &environment.id).await;
    converge(&[&m1]).await;

    let proxies = fleet.store.list_proxies().await.unwrap();
    assert_eq!(proxies.len(), 2);
    assert!(proxies.iter().all(|p| p.deployment_id == d2.id));
    let mut domains: Vec<_> = proxies.iter().map(|p| p.domain.as_str()).collect();
    domains.sort();
    assert_eq!(domains, vec!["a.example.com", "www.a.example.com"]);

    // The first container is stopped once the second one serves traffic
    assert_eq!(
        m1.runner
            .count(&format!("docker container stop {}", d1.container_name())),
        1
    );
    assert_eq!(
        m1.runner
            .count(&format!("docker container stop {}", d2.container_name())),
        0
    );

    let config = std::fs::read_to_string(&m1.config_path).unwrap();
    assert_eq!(config.matches("reverse_proxy * ").count(), 2);
    assert!(config.contains(&proxies[0].upstream()));
}

#[tokio::test]
async fn test_builds_drop_images_beyond_the_two_newest() {
    let fleet = Fleet::new();
    let m1 = builder_workload(&fleet, "m1", "192.168.202.1").await;
    let environment = fleet.environment(&[&m1], &["a.example.com"], "").await;

    let mut history = Vec::new();
    for _ in 0..3 {
        history.push(deploy(&fleet, &m1, &environment.id).await);
        converge(&[&m1]).await;
    }

    let first_image = &history[0].image_id;
    let stale_removals = m1
        .runner
        .commands()
        .into_iter()
        .filter(|c| c.contains(&format!("docker image rm -f {} ", first_image)))
        .count();
    assert_eq!(stale_removals, 1);

    // Retained images are never removed by a build
    for deployment in &history[1..] {
        assert_eq!(
            m1.runner
                .count(&format!("docker image rm -f {} ", deployment.image_id)),
            0
        );
    }
}

#[tokio::test]
async fn test_failed_build_does_not_evict_a_ready_image() {
    let fleet = Fleet::new();
    let m1 = builder_workload(&fleet, "m1", "192.168.202.1").await;
    let environment = fleet.environment(&[&m1], &["a.example.com"], "").await;

    let d1 = deploy(&fleet, &m1, &environment.id).await;
    converge(&[&m1]).await;
    let d2 = deploy(&fleet, &m1, &environment.id).await;
    converge(&[&m1]).await;

    m1.runner.fail_when("docker build");
    let d3 = deploy(&fleet, &m1, &environment.id).await;
    assert_eq!(drain(deployments::tick(&m1.state).await.unwrap()).await, 1);
    m1.runner.clear_failures();
    let failed = fleet.store.get_image(&d3.image_id).await.unwrap().unwrap();
    assert_ne!(failed.status, ImageStatus::Ready);

    let d4 = deploy(&fleet, &m1, &environment.id).await;
    converge(&[&m1]).await;
    let latest = fleet.store.get_deployment(&d4.id).await.unwrap().unwrap();
    assert_eq!(latest.status, DeploymentStatus::Finished);

    // The last ready image before the failure stays available for rollback
    assert_eq!(
        m1.runner
            .count(&format!("docker image rm -f {} ", d2.image_id)),
        0
    );
    let last_build = m1
        .runner
        .commands()
        .into_iter()
        .rfind(|c| c.contains("docker build"))
        .unwrap();
    assert!(last_build.contains(&d4.image_id));
    assert!(last_build.contains(&format!("docker image rm -f {} ", d1.image_id)));
}

#[tokio::test]
async fn test_deleting_an_environment_cleans_every_machine() {
    let fleet = Fleet::new();
    let m1 = builder_workload(&fleet, "m1", "192.168.202.1").await;
    let m2 = fleet
        .agent("m2", "192.168.202.2", vec![MachineType::Workload])
        .await;
    let environment = fleet
        .environment(&[&m1, &m2], &["app.example.com"], "")
        .await;

    let mut history = Vec::new();
    for _ in 0..3 {
        history.push(deploy(&fleet, &m1, &environment.id).await);
        converge(&[&m1, &m2]).await;
    }
    assert_eq!(fleet.store.list_proxies().await.unwrap().len(), 2);

    let cleanup = delete_environment(fleet.store.as_ref(), &m1.state.proxy, &environment.id)
        .await
        .unwrap();
    assert_eq!(cleanup.container_jobs.len(), 2);
    assert_eq!(cleanup.removed_proxies, 2);
    assert!(fleet.store.list_proxies().await.unwrap().is_empty());
    assert!(fleet
        .store
        .get_environment(&environment.id)
        .await
        .unwrap()
        .is_none());

    for agent in [&m1, &m2] {
        assert_eq!(drain(container_jobs::tick(&agent.state).await.unwrap()).await, 1);
    }
    assert_eq!(drain(image_jobs::tick(&m2.state).await.unwrap()).await, 1);
    // Already finished
    assert_eq!(drain(image_jobs::tick(&m1.state).await.unwrap()).await, 0);

    let latest = history[2].container_name();
    for agent in [&m1, &m2] {
        assert_eq!(agent.runner.count(&format!("docker container rm -f {}", latest)), 1);
    }

    let removal = m2
        .runner
        .commands()
        .into_iter()
        .rfind(|c| c.contains("docker image rm -f"))
        .unwrap();
    assert!(removal.contains(&history[2].image_id));
    assert!(removal.contains(&history[1].image_id));
    assert!(!removal.contains(&history[0].image_id));

    let container_jobs = fleet
        .store
        .list_container_jobs_for_environment(&environment.id)
        .await
        .unwrap();
    assert!(container_jobs.iter().all(|j| j.status == JobStatus::Finished));
    let image_jobs = fleet
        .store
        .list_image_jobs_for_environment(&environment.id)
        .await
        .unwrap();
    assert_eq!(image_jobs.len(), 1);
    assert_eq!(image_jobs[0].status, JobStatus::Finished);
}

#[tokio::test]
async fn test_exclusive_claims_reject_stale_reads() {
    let fleet = Fleet::new();
    let machine = Machine::new(
        "m1",
        "192.168.202.1",
        vec![MachineType::Builder, MachineType::Workload],
    );
    fleet.store.insert_machine(&machine).await.unwrap();
    let first = fleet.agent_for(machine.clone(), true);
    let second = fleet.agent_for(machine, true);

    let environment = fleet.environment(&[&first], &["a.example.com"], "").await;
    let d1 = deploy(&fleet, &first, &environment.id).await;
    let image = fleet.store.get_image(&d1.image_id).await.unwrap().unwrap();

    assert!(build_image(&first.state, &d1, &image).await.unwrap());
    // Same stale rows, but the image is no longer to_build
    assert!(!build_image(&second.state, &d1, &image).await.unwrap());
    assert_eq!(second.runner.commands().len(), 0);

    let jobs = fleet
        .store
        .list_deployment_jobs_for_deployment(&d1.id)
        .await
        .unwrap();
    assert!(roll_out(&first.state, &jobs[0]).await.unwrap());
    assert!(!roll_out(&second.state, &jobs[0]).await.unwrap());
    assert_eq!(second.runner.count("docker container run"), 0);
    assert_eq!(fleet.store.list_proxies().await.unwrap().len(), 1);
}
