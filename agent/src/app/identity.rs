//! Resolving which Machine row this agent is
//!
//! The name and VPN address come from settings or, failing that, from the
//! Nebula host certificate. The Machine row is then looked up by name. An
//! empty Machine table means this is the first node, which registers itself
//! with every role.

use std::path::PathBuf;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::deploy::process::{CommandRunner, CommandSpec};
use crate::errors::AgentError;
use crate::models::{Machine, MachineStatus, MachineType};
use crate::store::EntityStore;

/// Identity options
#[derive(Debug, Clone)]
pub struct Options {
    pub machine_name: Option<String>,
    pub vpn_ip: Option<String>,
    pub nebula_cert_bin: String,
    pub host_cert_path: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            machine_name: None,
            vpn_ip: None,
            nebula_cert_bin: "nebula-cert".to_string(),
            host_cert_path: PathBuf::from("/etc/nebula/host.crt"),
        }
    }
}

/// Name and address this agent has on the VPN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnIdentity {
    pub name: String,
    pub vpn_ip: Option<String>,
}

#[derive(Deserialize)]
struct CertOutput {
    details: CertDetails,
}

#[derive(Deserialize)]
struct CertDetails {
    name: String,
    #[serde(default)]
    ips: Vec<String>,
}

/// Parse `nebula-cert print -json` output. Addresses come as `ip/mask`.
pub fn parse_cert_json(output: &str) -> Result<VpnIdentity, AgentError> {
    let cert: CertOutput = serde_json::from_str(output.trim())
        .map_err(|e| AgentError::IdentityError(format!("bad certificate output: {}", e)))?;
    let vpn_ip = cert
        .details
        .ips
        .first()
        .and_then(|ip| ip.split('/').next())
        .map(str::to_string)
        .filter(|ip| !ip.is_empty());
    Ok(VpnIdentity {
        name: cert.details.name,
        vpn_ip,
    })
}

async fn read_certificate(
    options: &Options,
    runner: &dyn CommandRunner,
) -> Result<VpnIdentity, AgentError> {
    let spec = CommandSpec::new(options.nebula_cert_bin.as_str())
        .args(["print", "-json", "-path"])
        .arg(options.host_cert_path.to_string_lossy());

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let collect = async {
        let mut output = String::new();
        while let Some(line) = rx.recv().await {
            output.push_str(&line);
            output.push('\n');
        }
        output
    };
    let (outcome, output) = tokio::join!(runner.run(&spec, tx), collect);
    outcome?.into_result("nebula-cert")?;
    parse_cert_json(&output)
}

/// Work out this agent's name and VPN address
pub async fn vpn_identity(
    options: &Options,
    runner: &dyn CommandRunner,
) -> Result<VpnIdentity, AgentError> {
    if let (Some(name), Some(ip)) = (&options.machine_name, &options.vpn_ip) {
        return Ok(VpnIdentity {
            name: name.clone(),
            vpn_ip: Some(ip.clone()),
        });
    }

    match read_certificate(options, runner).await {
        Ok(cert) => Ok(VpnIdentity {
            name: options.machine_name.clone().unwrap_or(cert.name),
            vpn_ip: options.vpn_ip.clone().or(cert.vpn_ip),
        }),
        Err(e) => match &options.machine_name {
            Some(name) => {
                warn!("Cannot read VPN certificate: {}", e);
                Ok(VpnIdentity {
                    name: name.clone(),
                    vpn_ip: options.vpn_ip.clone(),
                })
            }
            None => Err(e),
        },
    }
}

/// Find this agent's Machine row, registering the first node of a new fleet
pub async fn resolve_machine(
    identity: &VpnIdentity,
    store: &dyn EntityStore,
) -> Result<Machine, AgentError> {
    if let Some(mut machine) = store.find_machine_by_name(&identity.name).await? {
        if machine.vpn_ip.is_empty() {
            if let Some(ip) = &identity.vpn_ip {
                machine.vpn_ip = ip.clone();
            }
        }
        info!("This agent is machine {} ({})", machine.name, machine.id);
        return Ok(machine);
    }

    if !store.list_machines().await?.is_empty() {
        return Err(AgentError::IdentityError(format!(
            "no machine named {} in the fleet",
            identity.name
        )));
    }

    let vpn_ip = identity.vpn_ip.clone().ok_or_else(|| {
        AgentError::IdentityError(format!("no VPN address known for {}", identity.name))
    })?;
    let mut machine = Machine::new(&identity.name, &vpn_ip, MachineType::ALL.to_vec());
    machine.status = MachineStatus::Online;
    store.insert_machine(&machine).await?;
    info!(
        "Registered {} ({}) as the first machine of the fleet",
        machine.name, machine.id
    );
    Ok(machine)
}
