//! Settings file management
//!
//! Every field has a default, so a missing or partial `settings.json` is valid.
//! A handful of `ROLLAGENT_*` environment variables override the file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

pub const ENV_CONTAINER_REGISTRY: &str = "ROLLAGENT_CONTAINER_REGISTRY";
pub const ENV_AGENT_PORT: &str = "ROLLAGENT_AGENT_PORT";
pub const ENV_AGENT_DOMAIN: &str = "ROLLAGENT_AGENT_DOMAIN";
pub const ENV_STORE_URL: &str = "ROLLAGENT_STORE_URL";
pub const ENV_MACHINE_NAME: &str = "ROLLAGENT_MACHINE_NAME";
pub const ENV_VPN_IP: &str = "ROLLAGENT_VPN_IP";

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: LogLevel,

    /// Emit JSON log lines instead of text
    pub log_json: bool,

    /// Also write a daily rolling log file under the base directory
    pub log_to_file: bool,

    /// Machine name; read from the VPN certificate when unset
    pub machine_name: Option<String>,

    /// Registry `host:port` that prefixes every image reference
    pub container_registry: String,

    /// Bounds every external process; 0 disables the limit
    pub process_timeout_secs: u64,

    /// Claim builds and rollouts with conditional status updates
    pub exclusive_claims: bool,

    pub max_shutdown_delay_secs: u64,

    pub store: StoreSettings,
    pub server: ServerSettings,
    pub proxy: ProxySettings,
    pub workers: WorkerSettings,
    pub identity: IdentitySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            machine_name: None,
            container_registry: "192.168.202.1:7000".to_string(),
            process_timeout_secs: 3600,
            exclusive_claims: false,
            max_shutdown_delay_secs: 30,
            store: StoreSettings::default(),
            server: ServerSettings::default(),
            proxy: ProxySettings::default(),
            workers: WorkerSettings::default(),
            identity: IdentitySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Rqlite,
    Memory,
}

/// Shared store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub kind: StoreKind,
    pub url: String,

    /// Leader probes at startup before giving up
    pub leader_attempts: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::Rqlite,
            url: "http://localhost:4001".to_string(),
            leader_attempts: 10,
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,

    /// Public domain routed to this agent by the edge proxy
    pub domain: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 5445,
            domain: None,
        }
    }
}

/// Edge proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub config_path: PathBuf,

    /// Reload command; the config path is appended
    pub reload_command: Vec<String>,

    /// VPN-internal site name proxied to the agent
    pub vpn_domain: Option<String>,
    pub vpn_tls_cert: Option<PathBuf>,
    pub vpn_tls_key: Option<PathBuf>,

    /// Enable the Coraza WAF on every site
    pub waf: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/caddy/Caddyfile"),
            reload_command: vec!["caddy".into(), "reload".into(), "-c".into()],
            vpn_domain: None,
            vpn_tls_cert: Some(PathBuf::from("/etc/ssl/vpn_fullchain.pem")),
            vpn_tls_key: Some(PathBuf::from("/etc/ssl/vpn_private.key")),
            waf: false,
        }
    }
}

/// Polling intervals in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub deployments_interval_secs: u64,
    pub container_jobs_interval_secs: u64,
    pub image_jobs_interval_secs: u64,
    pub proxy_interval_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            deployments_interval_secs: 2,
            container_jobs_interval_secs: 5,
            image_jobs_interval_secs: 5,
            proxy_interval_secs: 5,
        }
    }
}

/// Where the agent learns its VPN name and address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    /// VPN address; read from the VPN certificate when unset
    pub vpn_ip: Option<String>,
    pub nebula_cert_bin: String,
    pub host_cert_path: PathBuf,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            vpn_ip: None,
            nebula_cert_bin: "nebula-cert".to_string(),
            host_cert_path: PathBuf::from("/etc/nebula/host.crt"),
        }
    }
}

impl Settings {
    /// Read the settings file, falling back to defaults when it does not exist
    pub async fn load(file: &File) -> Result<Self, AgentError> {
        if !file.exists().await {
            info!("No settings file at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json::<Settings>().await
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(registry) = non_empty(ENV_CONTAINER_REGISTRY) {
            self.container_registry = registry;
        }
        if let Some(port) = non_empty(ENV_AGENT_PORT) {
            self.server.port = port.trim().parse().map_err(|_| {
                AgentError::ConfigError(format!("{} is not a port: {}", ENV_AGENT_PORT, port))
            })?;
        }
        if let Some(domain) = non_empty(ENV_AGENT_DOMAIN) {
            self.server.domain = Some(domain);
        }
        if let Some(url) = non_empty(ENV_STORE_URL) {
            self.store.url = url;
        }
        if let Some(name) = non_empty(ENV_MACHINE_NAME) {
            self.machine_name = Some(name);
        }
        if let Some(ip) = non_empty(ENV_VPN_IP) {
            self.identity.vpn_ip = Some(ip);
        }
        Ok(())
    }
}
