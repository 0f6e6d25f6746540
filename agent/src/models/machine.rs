//! Fleet membership model

use serde::{Deserialize, Serialize};

use crate::models::ID_LEN;
use crate::utils::{generate_id, now_micros};

/// Roles a machine can take in the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineType {
    Lighthouse,
    Workload,
    Builder,
    Balancer,
}

impl MachineType {
    pub const ALL: [MachineType; 4] = [
        MachineType::Lighthouse,
        MachineType::Workload,
        MachineType::Builder,
        MachineType::Balancer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineType::Lighthouse => "lighthouse",
            MachineType::Workload => "workload",
            MachineType::Builder => "builder",
            MachineType::Balancer => "balancer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    #[default]
    Created,
    Provision,
    Online,
    Offline,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Created => "created",
            MachineStatus::Provision => "provision",
            MachineStatus::Online => "online",
            MachineStatus::Offline => "offline",
        }
    }
}

/// Fleet membership record; owned by fleet management, read-only to pipelines
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Machine {
    pub id: String,
    #[serde(rename = "VPNIp")]
    pub vpn_ip: String,
    pub public_ip: String,
    pub name: String,
    pub types: Vec<MachineType>,
    pub status: MachineStatus,
    pub created_at: i64,
}

impl Machine {
    pub fn new(name: &str, vpn_ip: &str, types: Vec<MachineType>) -> Self {
        Self {
            id: generate_id(ID_LEN),
            vpn_ip: vpn_ip.to_string(),
            name: name.to_string(),
            types,
            created_at: now_micros(),
            ..Default::default()
        }
    }

    pub fn has_type(&self, machine_type: MachineType) -> bool {
        self.types.contains(&machine_type)
    }

    pub fn is_builder(&self) -> bool {
        self.has_type(MachineType::Builder)
    }
}
