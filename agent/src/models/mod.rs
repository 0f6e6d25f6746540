//! Entity models shared through the replicated store

pub mod deployment;
pub mod env_log;
pub mod environment;
pub mod image;
pub mod jobs;
pub mod machine;
pub mod proxy;

pub use deployment::{Deployment, DeploymentStatus};
pub use env_log::{EnvLog, LogWindow, PRIORITY_ERR, PRIORITY_INFO};
pub use environment::{Environment, EnvironmentDeployments, Service};
pub use image::{partition_retained, Image, ImageStatus, RETAINED_IMAGES};
pub use jobs::{ContainerJob, DeploymentJob, DeploymentJobStatus, ImageJob, JobStatus, JobType};
pub use machine::{Machine, MachineStatus, MachineType};
pub use proxy::Proxy;

/// Length of generated entity ids
pub const ID_LEN: usize = 7;
