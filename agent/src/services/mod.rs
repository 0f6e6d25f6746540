//! Request-level operations shared by the server and the workers

pub mod deployments;
pub mod env_logs;
pub mod environments;
