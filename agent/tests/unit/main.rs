//! Integration tests for the rollout agent

mod common;
mod test_fsm;
mod test_pipelines;
mod test_proxy;
mod test_scenario;
mod test_server;
