//! Application state
//!
//! Everything a pipeline needs is reached through one `AppState`: the shared
//! store, this agent's Machine row, the process runner, the log sink and the
//! proxy compiler. Several states can share one store, which is how tests run
//! a whole fleet in one process.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::deploy::process::CommandRunner;
use crate::errors::AgentError;
use crate::models::{EnvLog, Machine};
use crate::proxy::{self, ProxyCompiler};
use crate::services::env_logs::LogSink;
use crate::store::EntityStore;

/// Settings the pipelines read
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Registry `host:port`
    pub registry: String,

    /// Parent directory of fresh checkouts
    pub checkouts_dir: PathBuf,

    /// Claim work with conditional status updates
    pub exclusive_claims: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            registry: "192.168.202.1:7000".to_string(),
            checkouts_dir: std::env::temp_dir().join("rollagent-checkouts"),
            exclusive_claims: false,
        }
    }
}

/// Main application state
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub runner: Arc<dyn CommandRunner>,
    pub logs: Arc<dyn LogSink>,
    pub proxy: Arc<ProxyCompiler>,

    /// This agent's fleet record
    pub machine: Machine,
    pub deploy: DeployOptions,
}

impl AppState {
    pub fn new(
        store: Arc<dyn EntityStore>,
        runner: Arc<dyn CommandRunner>,
        logs: Arc<dyn LogSink>,
        machine: Machine,
        deploy: DeployOptions,
        proxy_options: proxy::Options,
    ) -> Self {
        info!(
            "Agent state for machine {} ({}) at {}",
            machine.name, machine.id, machine.vpn_ip
        );
        let proxy = Arc::new(ProxyCompiler::new(
            proxy_options,
            store.clone(),
            runner.clone(),
        ));
        Self {
            store,
            runner,
            logs,
            proxy,
            machine,
            deploy,
        }
    }

    /// Expected status for a claim, when claims are exclusive
    pub fn claim_guard<S>(&self, current: S) -> Option<S> {
        self.deploy.exclusive_claims.then_some(current)
    }

    /// Log template attributed to this machine
    pub fn log_template(&self) -> EnvLog {
        EnvLog::info("").machine(&self.machine.id)
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        info!("Shutting down application state...");
        Ok(())
    }
}
