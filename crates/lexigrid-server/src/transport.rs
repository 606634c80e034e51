//! UDP transport using renet_netcode.

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, SystemTime, SystemTimeError, UNIX_EPOCH};

use renet::RenetServer;
use renet_netcode::{NetcodeServerTransport, ServerAuthentication, ServerConfig};
use tracing::{error, info};

/// Protocol ID for Lexigrid (must match client)
pub const PROTOCOL_ID: u64 = 0x1E_C5_16_01;

/// Server transport configuration
pub struct TransportConfig {
    /// Public address for clients to connect
    pub public_address: SocketAddr,
    pub max_clients: usize,
    /// Optional private key for secure authentication (32 bytes)
    /// If None, uses unsecure authentication (for development)
    pub private_key: Option<[u8; 32]>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            public_address: SocketAddr::from(([127, 0, 0, 1], 7777)),
            max_clients: 4,
            private_key: None,
        }
    }
}

/// Transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind socket to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    #[error("Failed to determine bound address for {0}: {1}")]
    LocalAddrFailed(SocketAddr, std::io::Error),

    #[error("Failed to configure socket: {0}")]
    SocketConfig(std::io::Error),

    #[error("System clock is before the epoch: {0}")]
    Clock(#[from] SystemTimeError),

    #[error("Failed to create transport: {0}")]
    TransportCreation(String),
}

fn now() -> Result<Duration, TransportError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?)
}

/// Creates server transport with netcode authentication
pub fn create_server_transport(
    config: TransportConfig,
) -> Result<NetcodeServerTransport, TransportError> {
    let socket = UdpSocket::bind(config.public_address)
        .map_err(|e| TransportError::BindFailed(config.public_address, e))?;

    let bound_addr = socket
        .local_addr()
        .map_err(|e| TransportError::LocalAddrFailed(config.public_address, e))?;

    socket
        .set_nonblocking(true)
        .map_err(TransportError::SocketConfig)?;

    let authentication = match config.private_key {
        Some(key) => ServerAuthentication::Secure { private_key: key },
        None => ServerAuthentication::Unsecure,
    };

    let server_config = ServerConfig {
        current_time: now()?,
        max_clients: config.max_clients,
        protocol_id: PROTOCOL_ID,
        public_addresses: vec![bound_addr],
        authentication,
    };

    let transport = NetcodeServerTransport::new(server_config, socket)
        .map_err(|e| TransportError::TransportCreation(e.to_string()))?;

    info!(
        "Transport bound to {} (max {} clients, protocol {:016x})",
        bound_addr, config.max_clients, PROTOCOL_ID
    );

    Ok(transport)
}

/// Drives a `NetcodeServerTransport` for a `RenetServer`.
pub struct ServerRunner {
    transport: NetcodeServerTransport,
}

impl ServerRunner {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let transport = create_server_transport(config)?;
        Ok(Self { transport })
    }

    /// Advance both layers by `delta` and receive pending packets into `renet_server`.
    pub fn receive(&mut self, renet_server: &mut RenetServer, delta: Duration) {
        renet_server.update(delta);
        if let Err(e) = self.transport.update(delta, renet_server) {
            error!("Transport update error: {}", e);
        }
    }

    /// Flush queued messages to the network.
    pub fn send(&mut self, renet_server: &mut RenetServer) {
        self.transport.send_packets(renet_server);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.addresses().first().copied()
    }
}
