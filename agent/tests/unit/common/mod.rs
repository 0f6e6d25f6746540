//! Shared fixtures: a scripted command runner and an in-process fleet

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rollagent::app::state::{AppState, DeployOptions};
use rollagent::deploy::process::{CommandRunner, CommandSpec, ExitOutcome};
use rollagent::errors::AgentError;
use rollagent::models::{Environment, Machine, MachineType, Service};
use rollagent::proxy;
use rollagent::services::env_logs::StoreLogSink;
use rollagent::store::{EntityStore, MemoryStore};

pub const REGISTRY: &str = "10.9.0.1:7000";

/// Records every command and exits non-zero when it matches a failure pattern
#[derive(Default)]
pub struct FakeRunner {
    commands: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn fail_when(&self, pattern: &str) {
        self.failures.lock().unwrap().push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Commands containing `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        lines: mpsc::Sender<String>,
    ) -> Result<ExitOutcome, AgentError> {
        let display = spec.display();
        self.commands.lock().unwrap().push(display.clone());
        let _ = lines.send(format!("$ {}", spec.program)).await;

        let failed = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .any(|p| display.contains(p.as_str()));
        Ok(ExitOutcome {
            code: Some(if failed { 1 } else { 0 }),
        })
    }
}

/// One simulated agent
pub struct Agent {
    pub state: Arc<AppState>,
    pub runner: Arc<FakeRunner>,
    pub config_path: PathBuf,
}

/// Several agents sharing one store
pub struct Fleet {
    pub store: Arc<MemoryStore>,
    pub dir: TempDir,
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn EntityStore> {
        self.store.clone()
    }

    /// Register a machine and start an agent for it
    pub async fn agent(&self, name: &str, vpn_ip: &str, types: Vec<MachineType>) -> Agent {
        let machine = Machine::new(name, vpn_ip, types);
        self.store.insert_machine(&machine).await.unwrap();
        self.agent_for(machine, false)
    }

    pub fn agent_for(&self, machine: Machine, exclusive_claims: bool) -> Agent {
        let runner = Arc::new(FakeRunner::default());
        let base = self.dir.path().join(&machine.name);
        let config_path = base.join("Caddyfile");

        let deploy = DeployOptions {
            registry: REGISTRY.to_string(),
            checkouts_dir: base.join("checkouts"),
            exclusive_claims,
        };
        let proxy_options = proxy::Options {
            config_path: config_path.clone(),
            ..Default::default()
        };
        let store = self.dyn_store();
        let state = Arc::new(AppState::new(
            store.clone(),
            runner.clone(),
            Arc::new(StoreLogSink::new(store)),
            machine,
            deploy,
            proxy_options,
        ));
        Agent {
            state,
            runner,
            config_path,
        }
    }

    /// A service plus one environment targeting `machines`
    pub async fn environment(
        &self,
        machines: &[&Agent],
        domains: &[&str],
        image_name: &str,
    ) -> Environment {
        let service = Service {
            id: rollagent::utils::generate_id(7),
            name: "web".to_string(),
            git_url: "https://git.example.com/web.git".to_string(),
            image_name: image_name.to_string(),
            ..Default::default()
        };
        self.store.insert_service(&service).await.unwrap();

        let mut environment = Environment::new(&service.id, "production", "main", "8080");
        environment.domains = domains.iter().map(|d| d.to_string()).collect();
        environment.machine_ids = machines.iter().map(|a| a.state.machine.id.clone()).collect();
        self.store.insert_environment(&environment).await.unwrap();
        environment
    }
}

/// Wait for every dispatched pipeline
pub async fn drain(handles: Vec<JoinHandle<()>>) -> usize {
    let count = handles.len();
    for handle in handles {
        handle.await.unwrap();
    }
    count
}

/// Run deployment ticks on every agent, waiting for each pipeline, until the
/// fleet stops making progress
pub async fn converge(agents: &[&Agent]) {
    let mut idle_rounds = 0;
    while idle_rounds < 2 {
        let mut dispatched = 0;
        for agent in agents {
            let handles = rollagent::workers::deployments::tick(&agent.state)
                .await
                .unwrap();
            dispatched += drain(handles).await;
        }
        idle_rounds = if dispatched == 0 { idle_rounds + 1 } else { 0 };
    }
}
