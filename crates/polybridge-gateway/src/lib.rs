//! polybridge gateway
//!
//! Composes the protocol adapters, the message router and the resilient
//! invoker into one pipeline:
//!
//! ```text
//! ExternalRequest -> adapter -> router -> invoker -> Downstream -> adapter -> ExternalResponse
//! ```
//!
//! # Example
//!
//! ```no_run
//! use polybridge_common::{ExternalProtocol, ExternalRequest, ServiceEndpoint};
//! use polybridge_gateway::{Bridge, BridgeConfig, HandlerTable, LocalDownstream};
//! use std::sync::Arc;
//!
//! # async fn run() -> polybridge_common::Result<()> {
//! let mut handlers = HandlerTable::new();
//! handlers.register_typed("Calculator", "add", |(a, b): (i64, i64)| async move {
//!     Ok::<_, polybridge_common::BridgeError>(a + b)
//! });
//!
//! let bridge = Bridge::new(BridgeConfig::default(), Arc::new(LocalDownstream::new(handlers)))?;
//! bridge
//!     .router()
//!     .add_service_endpoint("Calculator", ServiceEndpoint::new("calc-1", "Calculator", "local", 0));
//!
//! let request = ExternalRequest::new(
//!     ExternalProtocol::JsonRpc,
//!     r#"{"jsonrpc":"2.0","method":"Calculator.add","params":[1,2],"id":7}"#,
//! );
//! let response = bridge.handle(request).await;
//! assert_eq!(response.body_json()?["result"], 3);
//! # Ok(())
//! # }
//! ```

mod bridge;
mod config;
mod downstream;
pub mod http;
pub mod local;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use downstream::Downstream;
pub use http::JsonRpcHttpDownstream;
pub use local::{HandlerFn, HandlerTable, LocalDownstream};
