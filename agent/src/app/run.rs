//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::identity::{resolve_machine, vpn_identity};
use crate::app::options::{AppOptions, LifecycleOptions, StoreOptions};
use crate::app::state::AppState;
use crate::deploy::process::{CommandRunner, ShellRunner};
use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::services::env_logs::{LogSink, StoreLogSink};
use crate::storage::settings::StoreKind;
use crate::store::{EntityStore, MemoryStore, RqliteStore};
use crate::workers::{container_jobs, deployments, image_jobs, proxy as proxy_worker};

/// Run the rollout agent
pub async fn run(
    agent_version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing rollout agent {}...", agent_version);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start agent: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, AgentError> {
    let app_state = init_app_state(options, shutdown_manager).await?;

    // Routes may have changed while this agent was down
    if let Err(e) = app_state.proxy.compile().await {
        error!("Initial proxy compile failed: {}", e);
    }

    init_deployments_worker(
        options.deployments_worker.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_container_jobs_worker(
        options.container_jobs_worker.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_image_jobs_worker(
        options.image_jobs_worker.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_proxy_worker(
        options.proxy_worker.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_socket_server {
        init_socket_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(app_state)
}

async fn init_store(options: &StoreOptions) -> Result<Arc<dyn EntityStore>, AgentError> {
    let store: Arc<dyn EntityStore> = match options.kind {
        StoreKind::Rqlite => {
            info!("Using rqlite store at {}", options.url);
            let client = HttpClient::new(&options.url).await?;
            Arc::new(RqliteStore::new(client, options.rqlite.clone()))
        }
        StoreKind::Memory => {
            info!("Using in-process store; state is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };
    store.init().await?;
    Ok(store)
}

async fn init_app_state(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, AgentError> {
    options.layout.setup().await?;

    let store = init_store(&options.store).await?;
    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new(options.process_timeout));

    let identity = vpn_identity(&options.identity, runner.as_ref()).await?;
    let machine = resolve_machine(&identity, store.as_ref()).await?;

    let logs: Arc<dyn LogSink> = Arc::new(StoreLogSink::new(store.clone()));
    let app_state = Arc::new(AppState::new(
        store,
        runner,
        logs,
        machine,
        options.deploy.clone(),
        options.proxy.clone(),
    ));

    shutdown_manager.with_app_state(app_state.clone())?;
    Ok(app_state)
}

fn init_deployments_worker(
    options: deployments::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing deployment worker...");

    let handle = tokio::spawn(async move {
        deployments::run(
            &options,
            app_state,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_deployments_worker_handle(handle)
}

fn init_container_jobs_worker(
    options: container_jobs::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing container job worker...");

    let handle = tokio::spawn(async move {
        container_jobs::run(
            &options,
            app_state,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_container_jobs_worker_handle(handle)
}

fn init_image_jobs_worker(
    options: image_jobs::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing image job worker...");

    let handle = tokio::spawn(async move {
        image_jobs::run(
            &options,
            app_state,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_image_jobs_worker_handle(handle)
}

fn init_proxy_worker(
    options: proxy_worker::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing proxy watcher...");

    let proxy = app_state.proxy.clone();
    let handle = tokio::spawn(async move {
        proxy_worker::run(
            &options,
            proxy,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_proxy_worker_handle(handle)
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(
        app_state.store.clone(),
        app_state.logs.clone(),
        app_state.proxy.clone(),
        app_state.machine.id.clone(),
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    socket_server_handle: Option<JoinHandle<Result<(), AgentError>>>,
    deployments_worker_handle: Option<JoinHandle<()>>,
    container_jobs_worker_handle: Option<JoinHandle<()>>,
    image_jobs_worker_handle: Option<JoinHandle<()>>,
    proxy_worker_handle: Option<JoinHandle<()>>,
}

fn set_once<T>(slot: &mut Option<T>, value: T, name: &str) -> Result<(), AgentError> {
    if slot.is_some() {
        return Err(AgentError::ShutdownError(format!("{} already set", name)));
    }
    *slot = Some(value);
    Ok(())
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            socket_server_handle: None,
            deployments_worker_handle: None,
            container_jobs_worker_handle: None,
            image_jobs_worker_handle: None,
            proxy_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), AgentError> {
        set_once(&mut self.app_state, state, "app_state")
    }

    pub fn with_deployments_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), AgentError> {
        set_once(&mut self.deployments_worker_handle, handle, "deployments_handle")
    }

    pub fn with_container_jobs_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), AgentError> {
        set_once(
            &mut self.container_jobs_worker_handle,
            handle,
            "container_jobs_handle",
        )
    }

    pub fn with_image_jobs_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), AgentError> {
        set_once(&mut self.image_jobs_worker_handle, handle, "image_jobs_handle")
    }

    pub fn with_proxy_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        set_once(&mut self.proxy_worker_handle, handle, "proxy_handle")
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AgentError>>,
    ) -> Result<(), AgentError> {
        set_once(&mut self.socket_server_handle, handle, "server_handle")
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down rollout agent...");

        // 1. Polling workers
        let workers = [
            self.deployments_worker_handle.take(),
            self.container_jobs_worker_handle.take(),
            self.image_jobs_worker_handle.take(),
            self.proxy_worker_handle.take(),
        ];
        for handle in workers.into_iter().flatten() {
            handle
                .await
                .map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 2. Socket server
        if let Some(handle) = self.socket_server_handle.take() {
            handle
                .await
                .map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }

        // 3. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
