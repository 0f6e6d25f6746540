//! Host port allocation

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;

use crate::errors::AgentError;

/// Ask the OS for an unused TCP port; the listener is closed before returning
pub async fn free_port() -> Result<u16, AgentError> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
