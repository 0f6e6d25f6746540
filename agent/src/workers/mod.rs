//! Per-family polling loops

pub mod container_jobs;
pub mod deployments;
pub mod image_jobs;
pub mod proxy;
