//! Proxy watcher
//!
//! Recompiles the edge proxy config whenever the Proxy rows change, so agents
//! that did not run a rollout still pick up the cutover.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::proxy::ProxyCompiler;

/// Proxy watcher options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Run the proxy watcher
pub async fn run<S, F>(
    options: &Options,
    proxy: Arc<ProxyCompiler>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Proxy watcher starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Proxy watcher shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        match proxy.refresh().await {
            Ok(true) => debug!("Proxy routes changed, config reloaded"),
            Ok(false) => {}
            Err(e) => error!("Proxy refresh failed: {}", e),
        }
    }
}
