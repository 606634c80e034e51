//! Renet channel layout.
//!
//! Channel 0: ReliableOrdered - session traffic (placements, submissions, retractions)
//! Channel 1: Unreliable - ping/pong

use std::time::Duration;

use lexigrid_protocol::{ClientMessage, ServerMessage};
use renet::ChannelConfig;

/// Channel IDs for different message types
pub mod channel_id {
    /// Session traffic - rollback depends on per-connection order
    pub const SESSION: u8 = 0;
    /// Ping/keepalive - can be lost
    pub const HEARTBEAT: u8 = 1;
}

/// Maximum bytes per channel
const MAX_CHANNEL_MEMORY: usize = 5 * 1024 * 1024; // 5 MB

pub fn create_channel_configs() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig {
            channel_id: channel_id::SESSION,
            max_memory_usage_bytes: MAX_CHANNEL_MEMORY,
            send_type: renet::SendType::ReliableOrdered {
                resend_time: Duration::from_millis(300),
            },
        },
        ChannelConfig {
            channel_id: channel_id::HEARTBEAT,
            max_memory_usage_bytes: 64 * 1024, // 64 KB
            send_type: renet::SendType::Unreliable,
        },
    ]
}

/// Channel a server message travels on.
pub fn server_channel(message: &ServerMessage) -> u8 {
    match message {
        ServerMessage::Pong { .. } => channel_id::HEARTBEAT,
        _ => channel_id::SESSION,
    }
}

/// Channel a client message travels on.
pub fn client_channel(message: &ClientMessage) -> u8 {
    match message {
        ClientMessage::Ping { .. } => channel_id::HEARTBEAT,
        _ => channel_id::SESSION,
    }
}
