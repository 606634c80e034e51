//! Wire codec: MessagePack for the network, JSON for debugging and fixtures.

use rmp_serde::{decode, encode};
use thiserror::Error;

use crate::{ClientMessage, ServerMessage};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(#[from] encode::Error),
    #[error("decode error: {0}")]
    Decode(#[from] decode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a client message for network transmission
pub fn serialize_client_message(msg: &ClientMessage) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(msg)?)
}

/// Deserialize a client message from network data
pub fn deserialize_client_message(bytes: &[u8]) -> Result<ClientMessage, WireError> {
    Ok(decode::from_slice(bytes)?)
}

/// Serialize a server message for network transmission
pub fn serialize_server_message(msg: &ServerMessage) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(msg)?)
}

/// Deserialize a server message from network data
pub fn deserialize_server_message(bytes: &[u8]) -> Result<ServerMessage, WireError> {
    Ok(decode::from_slice(bytes)?)
}

pub fn serialize_client_message_json(msg: &ClientMessage) -> Result<String, WireError> {
    Ok(serde_json::to_string(msg)?)
}

pub fn deserialize_client_message_json(json: &str) -> Result<ClientMessage, WireError> {
    Ok(serde_json::from_str(json)?)
}

pub fn serialize_server_message_json(msg: &ServerMessage) -> Result<String, WireError> {
    Ok(serde_json::to_string(msg)?)
}

pub fn deserialize_server_message_json(json: &str) -> Result<ServerMessage, WireError> {
    Ok(serde_json::from_str(json)?)
}
