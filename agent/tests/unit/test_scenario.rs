//! Multi-agent deployment scenarios over one shared store

use rollagent::deploy::rollout::roll_out;
use rollagent::errors::AgentError;
use rollagent::models::{
    Deployment, DeploymentJobStatus, DeploymentStatus, ImageStatus, MachineType,
};
use rollagent::services::deployments::create_deployment;
use rollagent::store::EntityStore;
use rollagent::workers::deployments::tick;

use crate::common::{converge, drain, Agent, Fleet, REGISTRY};

fn rank(status: DeploymentStatus) -> u8 {
    match status {
        DeploymentStatus::Scheduled => 0,
        DeploymentStatus::BuildingImage => 1,
        DeploymentStatus::StartingContainers => 2,
        DeploymentStatus::Finished => 3,
    }
}

async fn deployment(fleet: &Fleet, id: &str) -> Deployment {
    fleet.store.get_deployment(id).await.unwrap().unwrap()
}

/// finished(d) holds exactly when every job of d is deployed. A deployment
/// whose jobs are all deployed is finished by the next tick of any agent.
async fn assert_finished_iff_all_deployed(fleet: &Fleet, ticker: &Agent, id: &str) {
    let deployment = deployment(fleet, id).await;
    let jobs = fleet
        .store
        .list_deployment_jobs_for_deployment(id)
        .await
        .unwrap();
    let all_deployed =
        !jobs.is_empty() && jobs.iter().all(|j| j.status == DeploymentJobStatus::Deployed);

    if deployment.status == DeploymentStatus::Finished {
        assert!(all_deployed, "finished with jobs {:?}", jobs);
    } else if all_deployed {
        assert_eq!(deployment.status, DeploymentStatus::StartingContainers);
        tick_and_wait(ticker).await;
        assert_eq!(
            self::deployment(fleet, id).await.status,
            DeploymentStatus::Finished
        );
    }
}

async fn tick_and_wait(agent: &Agent) -> usize {
    drain(tick(&agent.state).await.unwrap()).await
}

#[tokio::test]
async fn test_build_then_rollout_on_two_machines() {
    let fleet = Fleet::new();
    let m1 = fleet
        .agent(
            "m1",
            "192.168.202.1",
            vec![MachineType::Builder, MachineType::Workload],
        )
        .await;
    let m2 = fleet
        .agent("m2", "192.168.202.2", vec![MachineType::Workload])
        .await;
    let environment = fleet
        .environment(&[&m1, &m2], &["app.example.com"], "")
        .await;

    let d1 = create_deployment(
        fleet.store.as_ref(),
        m1.state.logs.as_ref(),
        &environment.id,
        None,
    )
    .await
    .unwrap();
    let image = fleet.store.get_image(&d1.image_id).await.unwrap().unwrap();
    assert_eq!(image.status, ImageStatus::ToBuild);

    let mut seen = vec![d1.status];

    // m2 is not a builder and has nothing to roll out yet
    assert_eq!(tick_and_wait(&m2).await, 0);
    assert_eq!(deployment(&fleet, &d1.id).await.status, DeploymentStatus::Scheduled);

    // m1 builds
    assert_eq!(tick_and_wait(&m1).await, 1);
    let image = fleet.store.get_image(&d1.image_id).await.unwrap().unwrap();
    assert_eq!(image.status, ImageStatus::Ready);
    seen.push(deployment(&fleet, &d1.id).await.status);
    assert_eq!(*seen.last().unwrap(), DeploymentStatus::StartingContainers);
    assert_eq!(m1.runner.count("git clone"), 1);
    assert_eq!(m1.runner.count("docker build"), 1);
    assert_eq!(m1.runner.count(&format!("docker image push {}/{}", REGISTRY, image.id)), 1);
    assert_eq!(m2.runner.count("docker build"), 0);

    // m1 rolls out its own job only
    assert_eq!(tick_and_wait(&m1).await, 1);
    seen.push(deployment(&fleet, &d1.id).await.status);
    assert_finished_iff_all_deployed(&fleet, &m2, &d1.id).await;
    assert_eq!(*seen.last().unwrap(), DeploymentStatus::StartingContainers);

    // m2 rolls out
    assert_eq!(tick_and_wait(&m2).await, 1);
    assert_eq!(m2.runner.count(&format!("docker image pull {}/{}", REGISTRY, image.id)), 1);
    assert_eq!(m2.runner.count("--restart unless-stopped"), 1);

    // Either agent may notice completion
    assert_eq!(tick_and_wait(&m2).await, 0);
    seen.push(deployment(&fleet, &d1.id).await.status);
    assert_eq!(*seen.last().unwrap(), DeploymentStatus::Finished);
    assert_finished_iff_all_deployed(&fleet, &m2, &d1.id).await;

    assert!(seen.windows(2).all(|w| rank(w[0]) <= rank(w[1])), "{:?}", seen);

    let jobs = fleet
        .store
        .list_deployment_jobs_for_deployment(&d1.id)
        .await
        .unwrap();
    assert!(jobs.iter().all(|j| j.status == DeploymentJobStatus::Deployed));

    let proxies = fleet.store.list_proxies().await.unwrap();
    assert_eq!(proxies.len(), 2);
    assert!(proxies.iter().all(|p| p.domain == "app.example.com"));
    let mut ips: Vec<_> = proxies.iter().map(|p| p.server_private_ip.as_str()).collect();
    ips.sort();
    assert_eq!(ips, vec!["192.168.202.1", "192.168.202.2"]);

    // m2 compiled last and sees both upstreams
    let config = std::fs::read_to_string(&m2.config_path).unwrap();
    for proxy in &proxies {
        assert!(config.contains(&proxy.upstream()), "{}", config);
    }
}

#[tokio::test]
async fn test_jobs_only_move_on_their_own_machine() {
    let fleet = Fleet::new();
    let builder = fleet
        .agent("builder", "192.168.202.1", vec![MachineType::Builder])
        .await;
    let mut workers = Vec::new();
    for i in 0..3 {
        workers.push(
            fleet
                .agent(
                    &format!("w{}", i),
                    &format!("192.168.202.{}", 10 + i),
                    vec![MachineType::Workload],
                )
                .await,
        );
    }
    let targets: Vec<&Agent> = workers.iter().collect();
    let environment = fleet.environment(&targets, &["svc.example.com"], "").await;
    let d1 = create_deployment(
        fleet.store.as_ref(),
        builder.state.logs.as_ref(),
        &environment.id,
        None,
    )
    .await
    .unwrap();

    let mut everyone: Vec<&Agent> = vec![&builder];
    everyone.extend(targets.iter().copied());
    converge(&everyone).await;

    assert_eq!(deployment(&fleet, &d1.id).await.status, DeploymentStatus::Finished);
    assert_eq!(builder.runner.count("docker container run"), 0);
    for worker in &workers {
        assert_eq!(worker.runner.count("docker container run"), 1);
        assert_eq!(worker.runner.count("docker build"), 0);
    }

    // Each proxy row carries the address of the machine that owns the job
    let proxies = fleet.store.list_proxies().await.unwrap();
    assert_eq!(proxies.len(), 3);
    for worker in &workers {
        assert_eq!(
            proxies
                .iter()
                .filter(|p| p.server_private_ip == worker.state.machine.vpn_ip)
                .count(),
            1
        );
    }
}

#[tokio::test]
async fn test_foreign_job_is_rejected() {
    let fleet = Fleet::new();
    let m1 = fleet
        .agent("m1", "192.168.202.1", vec![MachineType::Builder])
        .await;
    let m2 = fleet
        .agent("m2", "192.168.202.2", vec![MachineType::Workload])
        .await;
    let environment = fleet.environment(&[&m2], &["a.example.com"], "nginx:1.27").await;
    let d1 = create_deployment(
        fleet.store.as_ref(),
        m1.state.logs.as_ref(),
        &environment.id,
        None,
    )
    .await
    .unwrap();

    let jobs = fleet
        .store
        .list_deployment_jobs_for_deployment(&d1.id)
        .await
        .unwrap();
    let err = roll_out(&m1.state, &jobs[0]).await.unwrap_err();
    assert!(matches!(err, AgentError::DeployError(_)));
    assert!(m1.runner.commands().is_empty());

    let jobs = fleet
        .store
        .list_deployment_jobs_for_deployment(&d1.id)
        .await
        .unwrap();
    assert_eq!(jobs[0].status, DeploymentJobStatus::ToDeploy);
}

#[tokio::test]
async fn test_repoll_after_finish_is_a_no_op() {
    let fleet = Fleet::new();
    let m1 = fleet
        .agent(
            "m1",
            "192.168.202.1",
            vec![MachineType::Builder, MachineType::Workload],
        )
        .await;
    let environment = fleet
        .environment(&[&m1], &["a.example.com", "b.example.com"], "")
        .await;
    let d1 = create_deployment(
        fleet.store.as_ref(),
        m1.state.logs.as_ref(),
        &environment.id,
        None,
    )
    .await
    .unwrap();
    converge(&[&m1]).await;
    assert_eq!(deployment(&fleet, &d1.id).await.status, DeploymentStatus::Finished);

    let commands = m1.runner.commands().len();
    let proxies = fleet.store.list_proxies().await.unwrap();

    for _ in 0..3 {
        assert_eq!(tick_and_wait(&m1).await, 0);
    }
    assert_eq!(m1.runner.commands().len(), commands);
    assert_eq!(fleet.store.list_proxies().await.unwrap(), proxies);

    // A deployed job cannot be rolled out again
    let jobs = fleet
        .store
        .list_deployment_jobs_for_deployment(&d1.id)
        .await
        .unwrap();
    let err = roll_out(&m1.state, &jobs[0]).await.unwrap_err();
    assert!(matches!(err, AgentError::TransitionError(_)));
    assert_eq!(m1.runner.commands().len(), commands);
}

#[tokio::test]
async fn test_public_image_skips_the_build() {
    let fleet = Fleet::new();
    let builder = fleet
        .agent("builder", "192.168.202.1", vec![MachineType::Builder])
        .await;
    let worker = fleet
        .agent("worker", "192.168.202.2", vec![MachineType::Workload])
        .await;
    let environment = fleet
        .environment(&[&worker], &["nginx.example.com"], "nginx:1.27")
        .await;
    let d1 = create_deployment(
        fleet.store.as_ref(),
        worker.state.logs.as_ref(),
        &environment.id,
        None,
    )
    .await
    .unwrap();

    // The worker advances the deployment and starts its container in one tick
    assert_eq!(tick_and_wait(&worker).await, 1);
    converge(&[&builder, &worker]).await;

    assert_eq!(deployment(&fleet, &d1.id).await.status, DeploymentStatus::Finished);
    assert_eq!(builder.runner.count("docker build"), 0);
    assert_eq!(worker.runner.count("docker image pull"), 0);
    assert_eq!(worker.runner.count("docker container run"), 1);
    assert!(worker
        .runner
        .commands()
        .iter()
        .any(|c| c.contains("docker container run") && c.ends_with("nginx:1.27")));
}

#[tokio::test]
async fn test_source_folder_is_built_in_place() {
    let fleet = Fleet::new();
    let m1 = fleet
        .agent(
            "m1",
            "192.168.202.1",
            vec![MachineType::Builder, MachineType::Workload],
        )
        .await;
    let environment = fleet.environment(&[&m1], &["a.example.com"], "").await;
    create_deployment(
        fleet.store.as_ref(),
        m1.state.logs.as_ref(),
        &environment.id,
        Some("/srv/src/web".to_string()),
    )
    .await
    .unwrap();
    converge(&[&m1]).await;

    assert_eq!(m1.runner.count("git clone"), 0);
    assert_eq!(m1.runner.count("docker build /srv/src/web"), 1);
    assert_eq!(m1.runner.count("rm -rf"), 0);
}

#[tokio::test]
async fn test_rollout_order_does_not_matter() {
    let fleet = Fleet::new();
    let m1 = fleet
        .agent(
            "m1",
            "192.168.202.1",
            vec![MachineType::Builder, MachineType::Workload],
        )
        .await;
    let m2 = fleet
        .agent("m2", "192.168.202.2", vec![MachineType::Workload])
        .await;
    let environment = fleet
        .environment(&[&m1, &m2], &["app.example.com"], "")
        .await;
    let d1 = create_deployment(
        fleet.store.as_ref(),
        m2.state.logs.as_ref(),
        &environment.id,
        None,
    )
    .await
    .unwrap();
    let mut seen = vec![d1.status];

    // The builder only builds; its own rollout comes last
    assert_eq!(tick_and_wait(&m1).await, 1);
    seen.push(deployment(&fleet, &d1.id).await.status);

    assert_eq!(tick_and_wait(&m2).await, 1);
    seen.push(deployment(&fleet, &d1.id).await.status);
    assert_eq!(*seen.last().unwrap(), DeploymentStatus::StartingContainers);
    assert_finished_iff_all_deployed(&fleet, &m2, &d1.id).await;
    assert_eq!(
        deployment(&fleet, &d1.id).await.status,
        DeploymentStatus::StartingContainers
    );

    let jobs = fleet
        .store
        .list_deployment_jobs_for_deployment(&d1.id)
        .await
        .unwrap();
    let own = jobs
        .iter()
        .find(|j| j.machine_id == m1.state.machine.id)
        .unwrap();
    assert_eq!(own.status, DeploymentJobStatus::ToDeploy);
    assert!(roll_out(&m1.state, own).await.unwrap());
    seen.push(deployment(&fleet, &d1.id).await.status);
    assert_eq!(*seen.last().unwrap(), DeploymentStatus::StartingContainers);

    // Both jobs deployed; the next tick finishes the deployment
    assert_finished_iff_all_deployed(&fleet, &m2, &d1.id).await;
    seen.push(deployment(&fleet, &d1.id).await.status);
    assert_eq!(*seen.last().unwrap(), DeploymentStatus::Finished);
    assert!(seen.windows(2).all(|w| rank(w[0]) <= rank(w[1])), "{:?}", seen);

    // Both machines serve the domain regardless of completion order
    let proxies = fleet.store.list_proxies().await.unwrap();
    assert_eq!(proxies.len(), 2);
    assert!(proxies.iter().all(|p| p.deployment_id == d1.id));
}
