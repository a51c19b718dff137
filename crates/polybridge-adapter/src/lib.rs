//! Protocol adapters.
//!
//! Each adapter maps one family of external protocols onto the internal
//! message model and back:
//!
//! | Protocol | Adapter |
//! |---|---|
//! | REST | [`RestAdapter`] |
//! | JSON-RPC | [`JsonRpcAdapter`] |
//! | WebSocket, MQTT | [`EnvelopeAdapter`] |
//!
//! [`AdapterSet`] dispatches on the protocol tag of a message.

mod adapter;
pub mod envelope;
pub mod jsonrpc;
pub mod rest;
mod set;

pub use adapter::ProtocolAdapter;
pub use envelope::{EnvelopeAdapter, Framing};
pub use jsonrpc::JsonRpcAdapter;
pub use rest::{PathTemplate, RestAdapter};
pub use set::AdapterSet;
