//! Proxy routing rule model

use serde::{Deserialize, Serialize};

use crate::models::ID_LEN;
use crate::utils::{generate_id, now_micros};

/// Routes one public domain to a container reachable over the VPN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Proxy {
    pub id: String,
    #[serde(rename = "ServerPrivateIP")]
    pub server_private_ip: String,
    pub port: u16,
    pub domain: String,
    pub environment_id: String,
    pub deployment_id: String,
    #[serde(default)]
    pub created_at: i64,
}

impl Proxy {
    pub fn new(
        domain: &str,
        server_private_ip: &str,
        port: u16,
        environment_id: &str,
        deployment_id: &str,
    ) -> Self {
        Self {
            id: generate_id(ID_LEN),
            server_private_ip: server_private_ip.to_string(),
            port,
            domain: domain.to_string(),
            environment_id: environment_id.to_string(),
            deployment_id: deployment_id.to_string(),
            created_at: now_micros(),
        }
    }

    /// `ip:port` upstream address
    pub fn upstream(&self) -> String {
        format!("{}:{}", self.server_private_ip, self.port)
    }
}
