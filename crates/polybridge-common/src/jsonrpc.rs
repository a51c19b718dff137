//! JSON-RPC 2.0 wire types.
//!
//! Used by the JSON-RPC protocol adapter on the client side and by the HTTP
//! downstream towards `INTERNAL_JSONRPC` backends.
//!
//! - Request format: `{"jsonrpc": "2.0", "method": "...", "params": ..., "id": ...}`
//! - Response format: `{"jsonrpc": "2.0", "result": ..., "id": ...}` or
//!   `{"jsonrpc": "2.0", "error": {"code": ..., "message": "...", "data": ...}, "id": ...}`
//!
//! A request without an `id` member is a notification. An explicit
//! `"id": null` is still a request and deserializes as `Some(Value::Null)`.

use crate::error::BridgeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// `None` for notifications
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Standard JSON-RPC 2.0 error codes
/// Invalid JSON was received by the server
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid Request object
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist / is not available
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameter(s)
pub const INVALID_PARAMS: i32 = -32602;
/// Internal JSON-RPC error
pub const INTERNAL_ERROR: i32 = -32603;

impl JsonRpcError {
    pub fn method_not_found() -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: "Method not found".into(),
            data: None,
        }
    }
}

impl From<&BridgeError> for JsonRpcError {
    /// Keeps the framework's numeric code rather than remapping it onto the
    /// JSON-RPC reserved range.
    fn from(err: &BridgeError) -> Self {
        Self {
            code: i32::from(err.code.as_u16()),
            message: err.message.clone(),
            data: err.details.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_jsonrpc_request_serialization() {
        let req = JsonRpcRequest::new("Calculator.add", json!([1, 2]), 1);
        let serialized = serde_json::to_string(&req).unwrap();
        assert!(serialized.contains("\"jsonrpc\":\"2.0\""));
        assert!(serialized.contains("\"method\":\"Calculator.add\""));
        assert!(serialized.contains("\"id\":1"));
    }

    #[test]
    fn test_notification_omits_id() {
        let req = JsonRpcRequest::notification("Events.publish", json!({}));
        let serialized = serde_json::to_string(&req).unwrap();
        assert!(!serialized.contains("\"id\""));
    }

    #[test]
    fn test_missing_id_is_notification() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"a.b","params":[]}"#).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_null_id_is_not_notification() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"a.b","id":null}"#).unwrap();
        assert_eq!(req.id, Some(Value::Null));
        assert_eq!(req.params, Value::Null);
    }

    #[test]
    fn test_response_serialization_skips_absent_members() {
        let ok = serde_json::to_value(JsonRpcResponse::success(json!(7), json!(3))).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "result": 3, "id": 7}));

        let err = JsonRpcResponse::error(json!(7), JsonRpcError::method_not_found());
        let err = serde_json::to_value(err).unwrap();
        assert_eq!(
            err,
            json!({"jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found"}, "id": 7})
        );
    }

    #[test]
    fn test_error_from_bridge_error_keeps_code() {
        let err = BridgeError::routing("no endpoints");
        let rpc = JsonRpcError::from(&err);
        assert_eq!(rpc.code, 602);
        assert_eq!(rpc.message, "no endpoints");
        assert_eq!(ErrorCode::from_u16(rpc.code as u16), Some(ErrorCode::RoutingError));
    }

    #[test]
    fn test_reserved_error_codes() {
        assert_eq!(JsonRpcError::method_not_found().code, METHOD_NOT_FOUND);
        assert_eq!(METHOD_NOT_FOUND, -32601);
        assert_eq!(PARSE_ERROR, -32700);
    }
}
