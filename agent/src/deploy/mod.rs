//! Build, rollout and cleanup pipelines

pub mod build;
pub mod cleanup;
pub mod docker;
pub mod fsm;
pub mod git;
pub mod ports;
pub mod process;
pub mod rollout;

use tokio::sync::mpsc;

use crate::app::state::AppState;
use crate::deploy::process::{CommandSpec, ExitOutcome};
use crate::errors::AgentError;
use crate::models::{EnvLog, PRIORITY_INFO};

/// Run `spec`, submitting every output line to the environment log
pub(crate) async fn run_logged(
    state: &AppState,
    spec: &CommandSpec,
    template: &EnvLog,
) -> Result<ExitOutcome, AgentError> {
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let forward = async {
        while let Some(line) = rx.recv().await {
            state
                .logs
                .submit(template.with_message(PRIORITY_INFO, line))
                .await;
        }
    };
    let (outcome, ()) = tokio::join!(state.runner.run(spec, tx), forward);
    outcome
}
