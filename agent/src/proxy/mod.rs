//! Edge proxy route compiler
//!
//! Turns the live Proxy rows into a Caddyfile, writes it atomically and asks
//! Caddy to reload. A failed reload is logged and left for the next change.

pub mod caddy;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::deploy::process::{CommandRunner, CommandSpec};
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::proxy::caddy::{group_routes, render, ControlRoutes};
use crate::store::EntityStore;
use crate::utils::sha256_hash;

/// Proxy compiler options
#[derive(Debug, Clone)]
pub struct Options {
    pub config_path: PathBuf,

    /// Reload command; the config path is appended as the last argument
    pub reload_command: Vec<String>,
    pub control: ControlRoutes,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/caddy/Caddyfile"),
            reload_command: vec!["caddy".into(), "reload".into(), "-c".into()],
            control: ControlRoutes::default(),
        }
    }
}

impl Options {
    fn reload_spec(&self) -> Result<CommandSpec, AgentError> {
        let (program, args) = self
            .reload_command
            .split_first()
            .ok_or_else(|| AgentError::ConfigError("empty proxy reload command".to_string()))?;
        Ok(CommandSpec::new(program.as_str())
            .args(args.iter().cloned())
            .arg(self.config_path.to_string_lossy()))
    }
}

pub struct ProxyCompiler {
    options: Options,
    store: Arc<dyn EntityStore>,
    runner: Arc<dyn CommandRunner>,

    /// Fingerprint of the last configuration written
    applied: Mutex<Option<String>>,
}

impl ProxyCompiler {
    pub fn new(
        options: Options,
        store: Arc<dyn EntityStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            options,
            store,
            runner,
            applied: Mutex::new(None),
        }
    }

    pub fn config_path(&self) -> &std::path::Path {
        &self.options.config_path
    }

    /// Regenerate and reload unconditionally
    pub async fn compile(&self) -> Result<(), AgentError> {
        self.apply(true).await.map(|_| ())
    }

    /// Regenerate and reload only when the configuration changed.
    /// Returns whether anything was written.
    pub async fn refresh(&self) -> Result<bool, AgentError> {
        self.apply(false).await
    }

    async fn apply(&self, force: bool) -> Result<bool, AgentError> {
        let mut applied = self.applied.lock().await;

        let proxies = self.store.list_proxies().await?;
        let routes = group_routes(&proxies);
        let config = render(&self.options.control, &routes);
        let fingerprint = sha256_hash(config.as_bytes());

        if !force && applied.as_deref() == Some(fingerprint.as_str()) {
            return Ok(false);
        }

        File::new(&self.options.config_path)
            .write_atomic(config.as_bytes())
            .await?;
        info!(
            "Wrote proxy config with {} domains to {}",
            routes.len(),
            self.options.config_path.display()
        );
        *applied = Some(fingerprint);

        self.reload().await?;
        Ok(true)
    }

    async fn reload(&self) -> Result<(), AgentError> {
        let spec = self.options.reload_spec()?;
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let drain = async {
            while let Some(line) = rx.recv().await {
                debug!("proxy reload: {}", line);
            }
        };
        let (outcome, ()) = tokio::join!(self.runner.run(&spec, tx), drain);

        match outcome {
            Ok(outcome) if outcome.success() => debug!("Proxy reloaded"),
            Ok(outcome) => warn!("'{}' exited with {:?}", spec.display(), outcome.code),
            Err(e) => warn!("Failed to run '{}': {}", spec.display(), e),
        }
        Ok(())
    }
}
