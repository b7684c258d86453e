//! JSON-RPC 2.0 envelopes and the mapping of domain errors onto wire codes.

use rust_mcp_sdk::schema::RpcError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, value::RawValue, Number, Value};

use crate::errors::{McpError, ServiceError};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Substrings that mark a storage connectivity failure.
const CONNECTIVITY_VOCABULARY: [&str; 10] = [
    "database",
    "connection",
    "sql",
    "driver",
    "network",
    "timeout",
    "connection refused",
    "connection reset",
    "broken pipe",
    "no such host",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(Number),
    String(String),
    Null,
}

impl RequestId {
    /// Accepts strings, integral finite numbers and `null`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(id) => Some(Self::String(id.clone())),
            Value::Number(number) if is_integral(number) => Some(Self::Number(number.clone())),
            Value::Null => Some(Self::Null),
            _ => None,
        }
    }
}

fn is_integral(number: &Number) -> bool {
    if number.is_i64() || number.is_u64() {
        return true;
    }
    number
        .as_f64()
        .is_some_and(|float| float.is_finite() && float.fract() == 0.0)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

/// Which member name carried the protocol version. Responses echo the
/// caller's spelling; `version` is used when none could be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionMember {
    #[default]
    Version,
    Jsonrpc,
}

impl VersionMember {
    fn of(object: &serde_json::Map<String, Value>) -> Self {
        if object.contains_key("jsonrpc") && !object.contains_key("version") {
            Self::Jsonrpc
        } else {
            Self::Version
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<&'static str>,
    pub id: RequestId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    fn new(id: RequestId, outcome: Outcome) -> Self {
        Self {
            version: Some(JSONRPC_VERSION),
            jsonrpc: None,
            id,
            outcome,
        }
    }

    pub fn success(id: RequestId, result: Value) -> Self {
        Self::new(id, Outcome::Result(result))
    }

    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self::new(id, Outcome::Error(error))
    }

    pub fn spelled(mut self, member: VersionMember) -> Self {
        (self.version, self.jsonrpc) = match member {
            VersionMember::Version => (Some(JSONRPC_VERSION), None),
            VersionMember::Jsonrpc => (None, Some(JSONRPC_VERSION)),
        };
        self
    }

    pub fn parse_error() -> Self {
        Self::error(RequestId::Null, rpc_error(PARSE_ERROR, "Parse error"))
    }

    pub fn invalid_request(id: RequestId, detail: &str) -> Self {
        Self::error(
            id,
            rpc_error_with_data(
                INVALID_REQUEST,
                "Invalid Request",
                Some(json!({ "detail": detail })),
            ),
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// A validated request or notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// `None` marks a notification.
    pub id: Option<RequestId>,
    pub method: String,
    pub params: Option<Value>,
    pub version_member: VersionMember,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(alias = "version")]
    jsonrpc: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    id: Option<Value>,
    method: Option<Value>,
    params: Option<Value>,
}

/// Keeps an explicit `null` distinguishable from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Request {
    /// Validates one envelope. The error carries the response to send back,
    /// echoing the request id whenever it could be read.
    pub fn from_raw(raw: &RawValue) -> Result<Self, Response> {
        let value: Value =
            serde_json::from_str(raw.get()).map_err(|_| Response::parse_error())?;
        let Value::Object(object) = &value else {
            return Err(Response::invalid_request(
                RequestId::Null,
                "request must be a JSON object",
            ));
        };
        let version_member = VersionMember::of(object);
        let reject = |id: RequestId, detail: &str| {
            Response::invalid_request(id, detail).spelled(version_member)
        };
        let echo_id = object
            .get("id")
            .and_then(RequestId::from_value)
            .unwrap_or(RequestId::Null);

        // The typed pass rejects duplicate member names.
        let envelope: RawEnvelope = serde_json::from_str(raw.get())
            .map_err(|_| reject(echo_id.clone(), "malformed request envelope"))?;

        if envelope.jsonrpc.as_ref().and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(reject(echo_id, "jsonrpc version must be \"2.0\""));
        }

        let id = match envelope.id {
            None => None,
            Some(raw_id) => Some(RequestId::from_value(&raw_id).ok_or_else(|| {
                reject(RequestId::Null, "id must be a string, an integer or null")
            })?),
        };

        let method = match envelope.method {
            Some(Value::String(method)) if !method.trim().is_empty() => method,
            _ => return Err(reject(echo_id, "method must be a non-empty string")),
        };

        let params = match envelope.params {
            None => None,
            Some(params @ (Value::Object(_) | Value::Array(_))) => Some(params),
            Some(_) => return Err(reject(echo_id, "params must be an object or an array")),
        };

        Ok(Self {
            id,
            method,
            params,
            version_member,
        })
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

pub fn rpc_error(code: i64, message: impl Into<String>) -> RpcError {
    rpc_error_with_data(code, message, None)
}

pub fn rpc_error_with_data(code: i64, message: impl Into<String>, data: Option<Value>) -> RpcError {
    RpcError {
        code,
        data,
        message: message.into(),
    }
}

pub fn is_connectivity_failure(message: &str) -> bool {
    let normalized = message.to_ascii_lowercase();
    CONNECTIVITY_VOCABULARY
        .iter()
        .any(|needle| normalized.contains(needle))
}

/// The single translation point from domain failures to JSON-RPC errors.
/// Only caller-facing sentences leave this function; internal details are
/// logged by the processor.
pub fn map_service_error(err: &ServiceError) -> RpcError {
    match err {
        ServiceError::Validation(message) | ServiceError::Conflict(message) => {
            rpc_error(INVALID_PARAMS, message.clone())
        }
        ServiceError::NotFound { .. }
        | ServiceError::InvalidInlineData
        | ServiceError::InvalidTextPosition
        | ServiceError::EmptyLinkedText
        | ServiceError::ParentEntityMismatch => rpc_error(INVALID_PARAMS, err.to_string()),
        ServiceError::Unauthorized(_) | ServiceError::Forbidden(_) => {
            rpc_error(INTERNAL_ERROR, "Unauthorized access")
        }
        ServiceError::Timeout => rpc_error(INTERNAL_ERROR, "Operation timeout"),
        ServiceError::Canceled => rpc_error(INTERNAL_ERROR, "Operation canceled"),
        ServiceError::Unavailable(_) => rpc_error(INTERNAL_ERROR, "Service temporarily unavailable"),
        ServiceError::Internal(message) if is_connectivity_failure(message) => {
            rpc_error(INTERNAL_ERROR, "Service temporarily unavailable")
        }
        ServiceError::Internal(_) => rpc_error(INTERNAL_ERROR, "Internal server error"),
    }
}

pub fn map_mcp_error(err: &McpError) -> RpcError {
    match err {
        McpError::InvalidRequest(message) => rpc_error(INVALID_REQUEST, message.clone()),
        McpError::MethodNotFound(message) => rpc_error(METHOD_NOT_FOUND, message.clone()),
        McpError::InvalidParams(message) => rpc_error(INVALID_PARAMS, message.clone()),
        McpError::Service(service) => map_service_error(service),
    }
}
