//! Gateway error taxonomy.
//!
//! Every pipeline stage rejects with a [`GatewayError`]. Rejections are
//! expected outcomes and are returned to the caller as a structured body
//! `{"error": {"kind": ..., "message": ...}}`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable rejection kind, serialized as its variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    BadSignature,
    WrongTarget,
    StaleRequest,
    Blacklisted,
    NotWhitelisted,
    IpBlacklisted,
    NotPermitted,
    RateLimited,
    UnknownEndpoint,
    InvalidParams,
    HandlerError,
    UpstreamUnavailable,
    Timeout,
}

impl ErrorKind {
    /// Name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadSignature => "BadSignature",
            ErrorKind::WrongTarget => "WrongTarget",
            ErrorKind::StaleRequest => "StaleRequest",
            ErrorKind::Blacklisted => "Blacklisted",
            ErrorKind::NotWhitelisted => "NotWhitelisted",
            ErrorKind::IpBlacklisted => "IpBlacklisted",
            ErrorKind::NotPermitted => "NotPermitted",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::UnknownEndpoint => "UnknownEndpoint",
            ErrorKind::InvalidParams => "InvalidParams",
            ErrorKind::HandlerError => "HandlerError",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field that failed parameter validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Parameter name
    pub field: String,
    /// What was wrong with it
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Rejection produced by a pipeline stage or the dispatcher.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("bad signature: {0}")]
    BadSignature(String),

    #[error("wrong target: {0}")]
    WrongTarget(String),

    #[error("stale request: {0}")]
    StaleRequest(String),

    #[error("sender {0} is blacklisted")]
    Blacklisted(String),

    #[error("sender {0} is not whitelisted")]
    NotWhitelisted(String),

    #[error("network address {0} is blacklisted")]
    IpBlacklisted(String),

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error("rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("invalid params: {}", join_fields(.0))]
    InvalidParams(Vec<FieldError>),

    /// Carries only the endpoint name; fault details stay in server logs.
    #[error("endpoint {0} failed")]
    HandlerError(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("request exceeded {0}ms deadline")]
    Timeout(u64),
}

impl GatewayError {
    /// Convenience for a single failing field.
    pub fn invalid_param(field: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::InvalidParams(vec![FieldError::new(field, reason)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::BadSignature(_) => ErrorKind::BadSignature,
            GatewayError::WrongTarget(_) => ErrorKind::WrongTarget,
            GatewayError::StaleRequest(_) => ErrorKind::StaleRequest,
            GatewayError::Blacklisted(_) => ErrorKind::Blacklisted,
            GatewayError::NotWhitelisted(_) => ErrorKind::NotWhitelisted,
            GatewayError::IpBlacklisted(_) => ErrorKind::IpBlacklisted,
            GatewayError::NotPermitted(_) => ErrorKind::NotPermitted,
            GatewayError::RateLimited(_) => ErrorKind::RateLimited,
            GatewayError::UnknownEndpoint(_) => ErrorKind::UnknownEndpoint,
            GatewayError::InvalidParams(_) => ErrorKind::InvalidParams,
            GatewayError::HandlerError(_) => ErrorKind::HandlerError,
            GatewayError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            GatewayError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Wire representation of this rejection.
    pub fn to_api_error(&self) -> ApiError {
        let data = match self {
            GatewayError::InvalidParams(fields) => serde_json::to_value(fields).ok(),
            _ => None,
        };
        ApiError {
            kind: self.kind(),
            message: self.to_string(),
            fields: data,
        }
    }
}

/// Serialized error body sent to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    /// Per-field failures, present for `InvalidParams` only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

/// Envelope for [`ApiError`] as it appears in a response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ApiError,
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        Self {
            error: err.to_api_error(),
        }
    }
}

/// Result type for pipeline operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Process-level errors (not returned to callers)
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::domain::config::ConfigError),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(#[source] std::io::Error),

    /// Server terminated with an I/O error
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            GatewayError::Blacklisted("ab".into()).kind(),
            ErrorKind::Blacklisted
        );
        assert_eq!(GatewayError::Timeout(5).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_error_body_serialization() {
        let err = GatewayError::RateLimited("10.0.0.1".into());
        let json = serde_json::to_value(ErrorBody::from(&err)).unwrap();
        assert_eq!(json["error"]["kind"], "RateLimited");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("10.0.0.1"));
        assert!(json["error"].get("fields").is_none());
    }

    #[test]
    fn test_invalid_params_lists_fields() {
        let err = GatewayError::InvalidParams(vec![
            FieldError::new("name", "missing required field"),
            FieldError::new("count", "expected integer"),
        ]);
        let body = ErrorBody::from(&err);
        assert!(body.error.message.contains("name: missing required field"));
        assert!(body.error.message.contains("count: expected integer"));
        assert_eq!(body.error.fields.unwrap()[1]["field"], "count");
    }

    #[test]
    fn test_handler_error_hides_details() {
        let err = GatewayError::HandlerError("ping".into());
        assert_eq!(err.to_string(), "endpoint ping failed");
    }

    #[test]
    fn test_kind_roundtrip() {
        let json = serde_json::to_string(&ErrorKind::StaleRequest).unwrap();
        assert_eq!(json, "\"StaleRequest\"");
        assert_eq!(ErrorKind::StaleRequest.as_str(), "StaleRequest");
    }
}
