//! Unified error taxonomy.
//!
//! Every component reports failures as a [`BridgeError`] carrying one of the
//! numeric [`ErrorCode`]s below. Codes below 600 mirror HTTP semantics, the
//! 6xx range is reserved for framework-level failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Numeric error codes shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    Timeout = 408,
    InternalError = 500,
    NotImplemented = 501,
    ServiceUnavailable = 503,
    ProtocolError = 600,
    SerializationError = 601,
    RoutingError = 602,
    ConnectionError = 603,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 12] = [
        ErrorCode::BadRequest,
        ErrorCode::Unauthorized,
        ErrorCode::Forbidden,
        ErrorCode::NotFound,
        ErrorCode::Timeout,
        ErrorCode::InternalError,
        ErrorCode::NotImplemented,
        ErrorCode::ServiceUnavailable,
        ErrorCode::ProtocolError,
        ErrorCode::SerializationError,
        ErrorCode::RoutingError,
        ErrorCode::ConnectionError,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Looks up a code by its numeric value.
    pub fn from_u16(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_u16() == code)
    }

    /// Human-readable meaning of the code.
    pub fn reason(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "Bad Request",
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::Forbidden => "Forbidden",
            ErrorCode::NotFound => "Not Found",
            ErrorCode::Timeout => "Request Timeout",
            ErrorCode::InternalError => "Internal Error",
            ErrorCode::NotImplemented => "Not Implemented",
            ErrorCode::ServiceUnavailable => "Service Unavailable",
            ErrorCode::ProtocolError => "Protocol Error",
            ErrorCode::SerializationError => "Serialization Error",
            ErrorCode::RoutingError => "Routing Error",
            ErrorCode::ConnectionError => "Connection Error",
        }
    }

    /// Whether this is a framework-specific (6xx) code.
    pub fn is_framework(self) -> bool {
        self.as_u16() >= 600
    }

    /// HTTP status to put on the wire. 6xx codes are not valid HTTP statuses
    /// and collapse to 500.
    pub fn http_status(self) -> u16 {
        if self.is_framework() {
            500
        } else {
            self.as_u16()
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.as_u16()
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        ErrorCode::from_u16(value).ok_or_else(|| format!("unknown error code {}", value))
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Structured failure crossing any component boundary.
#[derive(Error, Debug)]
#[error("{code}: {message}")]
pub struct BridgeError {
    pub code: ErrorCode,
    pub message: String,
    /// Optional structured context rendered into protocol error bodies
    pub details: Option<serde_json::Value>,
    #[source]
    source: Option<BoxError>,
}

impl BridgeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolError, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, message)
    }

    pub fn routing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RoutingError, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionError, message)
    }

    /// Error body shared by the protocol renderers.
    pub fn to_json(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.code.as_u16(),
            "message": self.message,
        });
        if let (Some(details), Some(obj)) = (&self.details, error.as_object_mut()) {
            obj.insert("details".to_string(), details.clone());
        }
        error
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::serialization(err.to_string()).with_source(err)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::connection(err.to_string()).with_source(err)
    }
}

impl From<tokio::time::error::Elapsed> for BridgeError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        BridgeError::timeout("downstream attempt timed out").with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
