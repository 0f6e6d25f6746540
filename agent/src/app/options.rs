//! Application configuration options

use std::time::Duration;

use crate::app::identity;
use crate::app::state::DeployOptions;
use crate::proxy::{self, caddy::ControlRoutes};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{Settings, StoreKind};
use crate::store::rqlite;
use crate::workers::{container_jobs, deployments, image_jobs, proxy as proxy_worker};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,
    pub layout: StorageLayout,
    pub store: StoreOptions,
    pub identity: identity::Options,

    /// Bound on every external process
    pub process_timeout: Option<Duration>,

    pub deploy: DeployOptions,
    pub proxy: proxy::Options,

    /// Enable local HTTP server
    pub enable_socket_server: bool,
    pub server: ServerOptions,

    pub deployments_worker: deployments::Options,
    pub container_jobs_worker: container_jobs::Options,
    pub image_jobs_worker: image_jobs::Options,
    pub proxy_worker: proxy_worker::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let vpn_tls = match (&settings.proxy.vpn_tls_cert, &settings.proxy.vpn_tls_key) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        };
        let secs = Duration::from_secs;

        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: secs(settings.max_shutdown_delay_secs),
            },
            store: StoreOptions {
                kind: settings.store.kind,
                url: settings.store.url.clone(),
                rqlite: rqlite::Options {
                    leader_attempts: settings.store.leader_attempts,
                    ..Default::default()
                },
            },
            identity: identity::Options {
                machine_name: settings.machine_name.clone(),
                vpn_ip: settings.identity.vpn_ip.clone(),
                nebula_cert_bin: settings.identity.nebula_cert_bin.clone(),
                host_cert_path: settings.identity.host_cert_path.clone(),
            },
            process_timeout: (settings.process_timeout_secs > 0)
                .then(|| secs(settings.process_timeout_secs)),
            deploy: DeployOptions {
                registry: settings.container_registry.clone(),
                checkouts_dir: layout.checkouts_dir().path().to_path_buf(),
                exclusive_claims: settings.exclusive_claims,
            },
            proxy: proxy::Options {
                config_path: settings.proxy.config_path.clone(),
                reload_command: settings.proxy.reload_command.clone(),
                control: ControlRoutes {
                    agent_domain: settings.server.domain.clone(),
                    agent_port: settings.server.port,
                    vpn_domain: settings.proxy.vpn_domain.clone(),
                    vpn_tls,
                    waf: settings.proxy.waf,
                },
            },
            enable_socket_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            deployments_worker: deployments::Options {
                interval: secs(settings.workers.deployments_interval_secs),
            },
            container_jobs_worker: container_jobs::Options {
                interval: secs(settings.workers.container_jobs_interval_secs),
            },
            image_jobs_worker: image_jobs::Options {
                interval: secs(settings.workers.image_jobs_interval_secs),
            },
            proxy_worker: proxy_worker::Options {
                interval: secs(settings.workers.proxy_interval_secs),
            },
            layout,
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Shared store connection options
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub kind: StoreKind,
    pub url: String,
    pub rqlite: rqlite::Options,
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5445,
        }
    }
}
