//! JSON-RPC request processing: envelope parsing, batching and dispatch.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use serde_json::{value::RawValue, Value};
use tokio::time::Instant;
use tracing::{debug, error, Instrument};

use crate::errors::McpError;
use crate::logging::{log_audit, log_outcome, log_request, log_slow_operation, AuditRecord};
use crate::mcp::context::RequestContext;
use crate::mcp::rpc::{
    map_mcp_error, rpc_error, Request, RequestId, Response, INTERNAL_ERROR,
};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, McpError>> + Send>>;

pub trait MethodHandler: Send + Sync {
    fn call(&self, ctx: RequestContext, params: Option<Value>) -> HandlerFuture;
}

impl<F, Fut> MethodHandler for F
where
    F: Fn(RequestContext, Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, McpError>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext, params: Option<Value>) -> HandlerFuture {
        Box::pin(self(ctx, params))
    }
}

/// Methods whose calls are written to the audit log.
const DATA_MODIFYING_METHODS: [&str; 1] = ["tools/call"];

/// Serialized reply for one HTTP exchange.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Empty when every message was a notification.
    pub body: Vec<u8>,
    /// The payload was not JSON at all.
    pub parse_failed: bool,
}

impl ProcessOutput {
    fn parse_error() -> Self {
        Self {
            body: to_bytes(&Response::parse_error()),
            parse_failed: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

fn to_bytes<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("jsonrpc response serialization")
}

pub struct Processor {
    handlers: HashMap<&'static str, Arc<dyn MethodHandler>>,
    slow_threshold: Duration,
}

impl Processor {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            slow_threshold,
        }
    }

    /// Registering the same method twice is a programming error.
    pub fn register(&mut self, method: &'static str, handler: impl MethodHandler + 'static) {
        let previous = self.handlers.insert(method, Arc::new(handler));
        assert!(
            previous.is_none(),
            "JSON-RPC method {method} registered twice"
        );
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub async fn process(self: &Arc<Self>, ctx: &RequestContext, body: &[u8]) -> ProcessOutput {
        let Ok(payload) = serde_json::from_slice::<Box<RawValue>>(body) else {
            debug!(correlation_id = %ctx.correlation_id, bytes = body.len(), "unparseable jsonrpc payload");
            return ProcessOutput::parse_error();
        };

        let body = if payload.get().trim_start().starts_with('[') {
            let Ok(batch) = serde_json::from_str::<Vec<Box<RawValue>>>(payload.get()) else {
                return ProcessOutput::parse_error();
            };
            self.process_batch(ctx, batch).await
        } else {
            self.process_one(ctx.clone(), &payload)
                .await
                .map(|response| to_bytes(&response))
                .unwrap_or_default()
        };

        debug!(
            correlation_id = %ctx.correlation_id,
            request_bytes = payload.get().len(),
            response_bytes = body.len(),
            "jsonrpc exchange sized"
        );

        ProcessOutput {
            body,
            parse_failed: false,
        }
    }

    async fn process_batch(self: &Arc<Self>, ctx: &RequestContext, batch: Vec<Box<RawValue>>) -> Vec<u8> {
        if batch.is_empty() {
            return to_bytes(&[Response::invalid_request(
                RequestId::Null,
                "batch must not be empty",
            )]);
        }

        let tasks = batch
            .into_iter()
            .map(|element| {
                let processor = Arc::clone(self);
                let ctx = ctx.clone();
                tokio::spawn(async move { processor.process_one(ctx, &element).await })
            })
            .collect::<Vec<_>>();

        let mut responses = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(Some(response)) => responses.push(response),
                Ok(None) => {}
                Err(err) => {
                    error!(correlation_id = %ctx.correlation_id, error = %err, "batch element task failed");
                    responses.push(Response::error(
                        RequestId::Null,
                        rpc_error(INTERNAL_ERROR, "Internal server error"),
                    ));
                }
            }
        }

        if responses.is_empty() {
            Vec::new()
        } else {
            to_bytes(&responses)
        }
    }

    async fn process_one(&self, ctx: RequestContext, raw: &RawValue) -> Option<Response> {
        let request = match Request::from_raw(raw) {
            Ok(request) => request,
            Err(rejection) => return Some(rejection),
        };

        let span = tracing::info_span!(
            "rpc",
            correlation_id = %ctx.correlation_id,
            method = %request.method
        );
        self.dispatch(ctx, request).instrument(span).await
    }

    async fn dispatch(&self, ctx: RequestContext, request: Request) -> Option<Response> {
        let Request {
            id,
            method,
            params,
            version_member,
        } = request;

        let Some(handler) = self.handlers.get(method.as_str()).cloned() else {
            debug!(correlation_id = %ctx.correlation_id, rpc_method = %method, "unknown method");
            let error = McpError::MethodNotFound(format!("Method not found: {method}"));
            return id.map(|id| Response::error(id, map_mcp_error(&error)).spelled(version_member));
        };

        let started_at = Instant::now();
        log_request(&ctx, &method, id.as_ref(), params.as_ref());
        let audit = DATA_MODIFYING_METHODS
            .contains(&method.as_str())
            .then(|| AuditRecord::from_tool_call(params.as_ref()));

        let result = handler.call(ctx.clone(), params).await;
        let elapsed = started_at.elapsed();

        log_outcome(&ctx, &method, elapsed, result.as_ref().map(|_| ()));
        if let Some(audit) = &audit {
            log_audit(&ctx, audit, result.is_ok());
        }
        if elapsed > self.slow_threshold {
            log_slow_operation(&ctx, &method, elapsed, self.slow_threshold);
        }

        let id = id?;
        let response = match result {
            Ok(value) => Response::success(id, value),
            Err(err) => Response::error(id, map_mcp_error(&err)),
        };
        Some(response.spelled(version_member))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::errors::ServiceError;
    use crate::mcp::rpc::{INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR};

    fn processor() -> Arc<Processor> {
        let mut processor = Processor::new(Duration::from_millis(100));
        processor.register("echo", |_ctx: RequestContext, params: Option<Value>| async move {
            Ok::<_, McpError>(params.unwrap_or(Value::Null))
        });
        processor.register("fail", |_ctx: RequestContext, _params: Option<Value>| async move {
            Err::<Value, _>(McpError::Service(ServiceError::validation("bad input")))
        });
        processor.register("slow", |_ctx: RequestContext, params: Option<Value>| async move {
            let millis = params
                .as_ref()
                .and_then(|params| params.get("ms"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, McpError>(json!(millis))
        });
        Arc::new(processor)
    }

    fn ctx() -> RequestContext {
        RequestContext::new("test", None, CancellationToken::new())
    }

    async fn run(body: &str) -> (Value, bool) {
        let output = processor().process(&ctx(), body.as_bytes()).await;
        let value = if output.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&output.body).expect("json body")
        };
        (value, output.parse_failed)
    }

    #[tokio::test]
    async fn empty_and_invalid_bodies_are_parse_errors() {
        for body in ["", "   ", "{", "not json"] {
            let (response, parse_failed) = run(body).await;
            assert!(parse_failed, "{body:?}");
            assert_eq!(response["error"]["code"], json!(PARSE_ERROR));
            assert_eq!(response["id"], Value::Null);
        }
    }

    #[tokio::test]
    async fn echoes_the_request_id() {
        let (response, _) =
            run(r#"{"jsonrpc":"2.0","id":"abc","method":"echo","params":{"x":1}}"#).await;
        assert_eq!(response["id"], json!("abc"));
        assert_eq!(response["result"], json!({"x": 1}));
        assert_eq!(response["jsonrpc"], json!("2.0"));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (response, _) = run(r#"{"jsonrpc":"2.0","id":1,"method":"nope"}"#).await;
        assert_eq!(response["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn handler_errors_go_through_the_error_mapper() {
        let (response, _) = run(r#"{"jsonrpc":"2.0","id":1,"method":"fail"}"#).await;
        assert_eq!(response["error"]["code"], json!(INVALID_PARAMS));
        assert_eq!(response["error"]["message"], json!("bad input"));
    }

    #[tokio::test]
    async fn notifications_produce_no_body() {
        let output = processor()
            .process(&ctx(), br#"{"jsonrpc":"2.0","method":"echo"}"#)
            .await;
        assert!(output.is_empty());
        assert!(!output.parse_failed);

        let output = processor()
            .process(&ctx(), br#"{"jsonrpc":"2.0","method":"unknown"}"#)
            .await;
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn batch_preserves_order_and_skips_notifications() {
        let body = r#"[
            {"jsonrpc":"2.0","id":1,"method":"slow","params":{"ms":30}},
            {"jsonrpc":"2.0","method":"echo"},
            {"jsonrpc":"2.0","id":2,"method":"slow","params":{"ms":0}},
            {"jsonrpc":"1.0","id":3,"method":"echo"}
        ]"#;

        let (response, _) = run(body).await;
        let responses = response.as_array().expect("batch response");

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], json!(1));
        assert_eq!(responses[0]["result"], json!(30));
        assert_eq!(responses[1]["id"], json!(2));
        assert_eq!(responses[2]["id"], json!(3));
        assert_eq!(responses[2]["error"]["code"], json!(INVALID_REQUEST));
    }

    #[tokio::test]
    async fn all_notification_batch_is_empty() {
        let output = processor()
            .process(
                &ctx(),
                br#"[{"jsonrpc":"2.0","method":"echo"},{"jsonrpc":"2.0","method":"echo"}]"#,
            )
            .await;
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_an_invalid_request() {
        let (response, _) = run("[]").await;
        assert_eq!(response[0]["error"]["code"], json!(INVALID_REQUEST));
    }

    #[tokio::test]
    async fn non_object_batch_elements_are_invalid() {
        let (response, _) = run("[1, \"x\"]").await;
        let responses = response.as_array().expect("batch response");
        assert_eq!(responses.len(), 2);
        assert!(responses
            .iter()
            .all(|response| response["error"]["code"] == json!(INVALID_REQUEST)));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut processor = Processor::new(Duration::from_millis(100));
        processor.register("ping", |_ctx: RequestContext, _params: Option<Value>| async move {
            Ok::<_, McpError>(json!({}))
        });
        processor.register("ping", |_ctx: RequestContext, _params: Option<Value>| async move {
            Ok::<_, McpError>(json!({}))
        });
    }

    #[derive(Debug, Default, Clone)]
    struct CapturedEvent {
        message: String,
        fields: HashMap<String, String>,
    }

    impl tracing::field::Visit for CapturedEvent {
        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.record(field, value.to_string());
        }

        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.record(field, format!("{value:?}"));
        }
    }

    impl CapturedEvent {
        fn record(&mut self, field: &tracing::field::Field, value: String) {
            if field.name() == "message" {
                self.message = value;
            } else {
                self.fields.insert(field.name().to_string(), value);
            }
        }
    }

    /// Collects every event emitted while installed as the thread default.
    #[derive(Clone, Default)]
    struct EventLog(Arc<std::sync::Mutex<Vec<CapturedEvent>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventLog {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut captured = CapturedEvent::default();
            event.record(&mut captured);
            self.0.lock().expect("event log lock").push(captured);
        }
    }

    impl EventLog {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            use tracing_subscriber::layer::SubscriberExt;
            tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
        }

        fn find(&self, message: &str) -> Vec<CapturedEvent> {
            self.0
                .lock()
                .expect("event log lock")
                .iter()
                .filter(|event| event.message == message)
                .cloned()
                .collect()
        }
    }

    #[tokio::test]
    async fn failed_tool_calls_are_still_audited() {
        let mut processor = Processor::new(Duration::from_secs(60));
        processor.register("tools/call", |_ctx: RequestContext, _params: Option<Value>| async move {
            Err::<Value, _>(McpError::Service(ServiceError::internal("connection refused")))
        });
        let processor = Arc::new(processor);
        let events = EventLog::default();
        let _guard = events.install();

        let output = processor
            .process(
                &ctx(),
                br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"update_epic","arguments":{"epic_id":"EP-001","api_token":"hunter2"}}}"#,
            )
            .await;
        assert!(!output.is_empty());

        let audited = events.find("mcp action audited");
        assert_eq!(audited.len(), 1);
        assert_eq!(audited[0].fields["outcome"], "failure");
        assert_eq!(audited[0].fields["tool_name"], "update_epic");
        assert_eq!(audited[0].fields["resource_id"], "EP-001");
        assert!(!audited[0].fields["arguments"].contains("hunter2"));
    }

    #[tokio::test]
    async fn read_methods_outside_tools_call_are_not_audited() {
        let events = EventLog::default();
        let _guard = events.install();

        run(r#"{"jsonrpc":"2.0","id":1,"method":"echo"}"#).await;
        assert!(events.find("mcp action audited").is_empty());
    }

    #[tokio::test]
    async fn slow_operations_are_reported_above_the_threshold() {
        let mut processor = Processor::new(Duration::from_millis(10));
        processor.register("slow", |_ctx: RequestContext, _params: Option<Value>| async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok::<_, McpError>(Value::Null)
        });
        processor.register("fast", |_ctx: RequestContext, _params: Option<Value>| async move {
            Ok::<_, McpError>(Value::Null)
        });
        let processor = Arc::new(processor);
        let events = EventLog::default();
        let _guard = events.install();

        processor
            .process(&ctx(), br#"{"jsonrpc":"2.0","id":1,"method":"fast"}"#)
            .await;
        assert!(events.find("slow operation").is_empty());

        processor
            .process(&ctx(), br#"{"jsonrpc":"2.0","id":2,"method":"slow"}"#)
            .await;
        let slow = events.find("slow operation");
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].fields["rpc_method"], "slow");
        assert_eq!(slow[0].fields["threshold_ms"], "10");
    }
}
