use std::{sync::Arc, time::Duration};

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use crate::errors::{McpError, ServiceError};
use crate::mcp::context::RequestContext;
use crate::mcp::rpc::RequestId;

pub static CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

const MAX_CORRELATION_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Correlation ID assigned to an HTTP request, stored in request extensions.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub Arc<str>);

fn inbound_correlation_id(request: &Request) -> Option<Arc<str>> {
    let value = request.headers().get(&CORRELATION_HEADER)?.to_str().ok()?;
    let valid = !value.is_empty()
        && value.len() <= MAX_CORRELATION_ID_LEN
        && value.bytes().all(|byte| byte.is_ascii_graphic());
    valid.then(|| Arc::from(value))
}

pub async fn request_logging_middleware(mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let correlation_id = inbound_correlation_id(&request)
        .unwrap_or_else(|| Arc::from(Uuid::new_v4().to_string()));
    request
        .extensions_mut()
        .insert(CorrelationId(Arc::clone(&correlation_id)));
    let started_at = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    info!(
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "request summary"
    );

    match status.as_u16() {
        401 => warn!(correlation_id = %correlation_id, method = %method, path = %path, "authentication failure"),
        403 => warn!(correlation_id = %correlation_id, method = %method, path = %path, "authorization failure"),
        _ => {}
    }

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response
            .headers_mut()
            .insert(CORRELATION_HEADER.clone(), value);
    }

    response
}

pub fn log_request(
    ctx: &RequestContext,
    method: &str,
    id: Option<&RequestId>,
    params: Option<&Value>,
) {
    debug!(
        correlation_id = %ctx.correlation_id,
        user_id = ctx.user_id().as_deref().unwrap_or("anonymous"),
        rpc_method = method,
        rpc_id = ?id,
        params = %redact_audit_params(params),
        "mcp request received"
    );
}

pub fn log_outcome(
    ctx: &RequestContext,
    method: &str,
    elapsed: Duration,
    outcome: Result<(), &McpError>,
) {
    let user_id = ctx.user_id();
    let user_id = user_id.as_deref().unwrap_or("anonymous");
    let duration_ms = elapsed.as_millis();

    match outcome {
        Ok(()) => info!(
            correlation_id = %ctx.correlation_id,
            user_id,
            rpc_method = method,
            duration_ms,
            outcome = "success",
            "mcp request completed"
        ),
        Err(McpError::Service(
            err @ (ServiceError::Internal(_) | ServiceError::Unavailable(_)),
        )) => error!(
            correlation_id = %ctx.correlation_id,
            user_id,
            rpc_method = method,
            duration_ms,
            outcome = "failure",
            error = %err,
            "mcp request failed"
        ),
        Err(err) => warn!(
            correlation_id = %ctx.correlation_id,
            user_id,
            rpc_method = method,
            duration_ms,
            outcome = "failure",
            error = %err,
            "mcp request rejected"
        ),
    }
}

pub fn log_slow_operation(ctx: &RequestContext, method: &str, elapsed: Duration, threshold: Duration) {
    warn!(
        correlation_id = %ctx.correlation_id,
        user_id = ctx.user_id().as_deref().unwrap_or("anonymous"),
        rpc_method = method,
        duration_ms = elapsed.as_millis(),
        threshold_ms = threshold.as_millis(),
        "slow operation"
    );
}

/// Audit entry written for every data-modifying call, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub tool_name: String,
    pub arguments: Value,
    pub resource_kind: Option<&'static str>,
    pub resource_id: Option<String>,
}

impl AuditRecord {
    pub fn from_tool_call(params: Option<&Value>) -> Self {
        let tool_name = params
            .and_then(|params| params.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let arguments = params
            .and_then(|params| params.get("arguments"))
            .and_then(Value::as_object);

        let resource_kind = resource_kind(&tool_name);
        let resource_id = resource_kind
            .and_then(|kind| resource_id(kind, arguments));

        Self {
            arguments: arguments
                .map(|arguments| redact_audit_value(&Value::Object(arguments.clone())))
                .unwrap_or(Value::Null),
            tool_name,
            resource_kind,
            resource_id,
        }
    }
}

fn resource_kind(tool_name: &str) -> Option<&'static str> {
    [
        "steering_document",
        "acceptance_criteria",
        "user_story",
        "epic",
        "requirement",
    ]
    .into_iter()
    .find(|kind| tool_name.contains(kind))
    .or_else(|| tool_name.contains("relationship").then_some("requirement"))
}

fn resource_id(kind: &str, arguments: Option<&Map<String, Value>>) -> Option<String> {
    let arguments = arguments?;
    arguments
        .get(&format!("{kind}_id"))
        .or_else(|| arguments.get("source_requirement_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn log_audit(ctx: &RequestContext, record: &AuditRecord, succeeded: bool) {
    info!(
        correlation_id = %ctx.correlation_id,
        user_id = ctx.user_id().as_deref().unwrap_or("anonymous"),
        tool_name = %record.tool_name,
        arguments = %record.arguments,
        resource_kind = record.resource_kind.unwrap_or("none"),
        resource_id = record.resource_id.as_deref().unwrap_or("none"),
        outcome = if succeeded { "success" } else { "failure" },
        "mcp action audited"
    );
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || ["token", "secret", "password", "credential"]
        .iter()
        .any(|needle| normalized.contains(needle))
}
