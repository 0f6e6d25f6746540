//! Rollout agent library
//!
//! Every machine in the fleet runs one agent. Agents share nothing but a
//! replicated store: they poll it for work addressed to them, build images,
//! start containers and keep the edge proxy pointed at the live ones.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod proxy;
pub mod server;
pub mod services;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
