//! polybridge common types
//!
//! Shared vocabulary of the bridge between external wire protocols (REST,
//! WebSocket, JSON-RPC, MQTT) and internal transport protocols:
//!
//! - [`error`] - the numeric error taxonomy and [`BridgeError`]
//! - [`protocol`] - protocol tags and [`MessageType`]
//! - [`message`] - external and internal request/response types
//! - [`endpoint`] - [`ServiceEndpoint`] and its connection accounting
//! - [`registry`] - the registry collaborator interface
//! - [`serializer`] - payload encoding seam
//! - [`jsonrpc`] - JSON-RPC 2.0 wire types
//!
//! # Example
//!
//! ```
//! use polybridge_common::{InternalRequest, InternalResponse};
//!
//! let request = InternalRequest::new("Calculator", "add", "[1,2]");
//! let response = InternalResponse::success("3").correlate(&request);
//! assert_eq!(response.trace_id.as_deref(), Some(request.trace_id()));
//! ```

pub mod endpoint;
pub mod error;
pub mod jsonrpc;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod serializer;

pub use endpoint::{ConnectionGuard, EndpointDescriptor, EndpointLease, ServiceEndpoint};
pub use error::{BridgeError, ErrorCode, Result};
pub use message::{
    generate_trace_id, headers, metadata_keys, ExternalRequest, ExternalResponse, Headers,
    InternalRequest, InternalResponse, Metadata,
};
pub use protocol::{ExternalProtocol, InternalProtocol, MessageType};
pub use registry::{InMemoryRegistry, ServiceRegistry};
pub use serializer::{JsonSerializer, Serializer};
