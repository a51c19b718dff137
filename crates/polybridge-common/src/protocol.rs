//! Protocol tags and message types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-facing wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternalProtocol {
    #[serde(rename = "REST")]
    Rest,
    #[serde(rename = "WEBSOCKET")]
    WebSocket,
    #[serde(rename = "JSONRPC")]
    JsonRpc,
    #[serde(rename = "MQTT")]
    Mqtt,
}

impl ExternalProtocol {
    pub const ALL: [ExternalProtocol; 4] = [
        ExternalProtocol::Rest,
        ExternalProtocol::WebSocket,
        ExternalProtocol::JsonRpc,
        ExternalProtocol::Mqtt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExternalProtocol::Rest => "REST",
            ExternalProtocol::WebSocket => "WEBSOCKET",
            ExternalProtocol::JsonRpc => "JSONRPC",
            ExternalProtocol::Mqtt => "MQTT",
        }
    }
}

impl fmt::Display for ExternalProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-facing transport protocols between framework-managed services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InternalProtocol {
    /// Binary RPC in the style of gRPC
    Grpc,
    #[default]
    InternalJsonrpc,
    CustomBinary,
}

impl InternalProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            InternalProtocol::Grpc => "GRPC",
            InternalProtocol::InternalJsonrpc => "INTERNAL_JSONRPC",
            InternalProtocol::CustomBinary => "CUSTOM_BINARY",
        }
    }
}

impl fmt::Display for InternalProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interaction pattern of a message. Survives every adapter round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    RequestResponse,
    PublishSubscribe,
    Stream,
}

impl MessageType {
    /// Whether the sender waits for a reply.
    pub fn expects_response(self) -> bool {
        !matches!(self, MessageType::PublishSubscribe)
    }
}
