//! HTTP client for the replicated store

pub mod client;
