//! MCP method handlers and their registration with the JSON-RPC processor.

use std::{
    future::Future,
    sync::{Arc, OnceLock},
    time::Duration,
};

use regex::Regex;
use rust_mcp_sdk::schema::{
    CallToolRequestParams, Implementation, InitializeResult, ListResourcesResult,
    ListToolsResult, ReadResourceRequestParams, Tool,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::{
    resources::{build_resources_list, handle_resources_read},
    tools::{build_tools_list, handle_tools_call},
};
use crate::errors::McpError;
use crate::mcp::capabilities::{has_prompts, instructions, server_capabilities};
use crate::mcp::context::RequestContext;
use crate::mcp::processor::{MethodHandler, Processor};
use crate::store::Services;

pub const SERVER_NAME: &str = "spexus mcp";
pub const SERVER_TITLE: &str = "Spexus MCP";
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 2] = ["2025-03-26", "2025-06-18"];
const BASELINE_PROTOCOL_VERSION: &str = "2025-03-26";
const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    pub slow_operation_threshold: Duration,
    pub resources_list_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            slow_operation_threshold: Duration::from_millis(100),
            resources_list_timeout: Duration::from_secs(30),
        }
    }
}

fn protocol_version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("valid protocol version regex"))
}

/// Picks the version answered to the client. Only an exact match on the newer
/// version upgrades the session; every other supported offer gets the baseline.
pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<&'static str, McpError> {
    let offered = params
        .and_then(|params| params.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| McpError::invalid_params("initialize params.protocolVersion is required"))?;

    if !protocol_version_pattern().is_match(offered) {
        return Err(McpError::invalid_params(
            "protocolVersion must use the YYYY-MM-DD format",
        ));
    }

    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&offered) {
        return Err(McpError::invalid_request(format!(
            "Unsupported protocol version: {offered}"
        )));
    }

    if offered == LATEST_PROTOCOL_VERSION {
        Ok(LATEST_PROTOCOL_VERSION)
    } else {
        Ok(BASELINE_PROTOCOL_VERSION)
    }
}

fn validate_client_info(params: Option<&Value>) -> Result<(), McpError> {
    let client_info = params
        .and_then(|params| params.get("clientInfo"))
        .ok_or_else(|| McpError::invalid_params("initialize params.clientInfo is required"))?;

    for field in ["name", "version"] {
        let present = client_info
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|value| !value.trim().is_empty());
        if !present {
            return Err(McpError::invalid_params(format!(
                "clientInfo.{field} must be a non-empty string"
            )));
        }
    }
    Ok(())
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, McpError> {
    let params = params.ok_or_else(|| McpError::invalid_params("Invalid params"))?;
    serde_json::from_value(params).map_err(|_| McpError::invalid_params("Invalid params"))
}

fn to_result<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).expect("mcp result serialization")
}

pub struct McpHandlers {
    services: Services,
    settings: ServerSettings,
    tools: Vec<Tool>,
}

impl McpHandlers {
    pub fn new(services: Services, settings: ServerSettings) -> Self {
        Self {
            services,
            settings,
            tools: build_tools_list(),
        }
    }

    async fn initialize(
        self: Arc<Self>,
        ctx: RequestContext,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let protocol_version = negotiate_protocol_version(params.as_ref())?;
        validate_client_info(params.as_ref())?;

        let prompts = self.services.prompts.as_ref();
        let result = InitializeResult {
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some(SERVER_TITLE.to_string()),
                description: None,
                icons: vec![],
                website_url: None,
            },
            capabilities: server_capabilities(&self.tools, has_prompts(prompts, &ctx).await),
            protocol_version: protocol_version.to_string(),
            instructions: Some(instructions(prompts, &ctx).await),
            meta: None,
        };

        Ok(to_result(result))
    }

    async fn ping(
        self: Arc<Self>,
        _ctx: RequestContext,
        _params: Option<Value>,
    ) -> Result<Value, McpError> {
        Ok(json!({}))
    }

    async fn initialized(
        self: Arc<Self>,
        ctx: RequestContext,
        _params: Option<Value>,
    ) -> Result<Value, McpError> {
        debug!(correlation_id = %ctx.correlation_id, "client initialized");
        Ok(Value::Null)
    }

    async fn tools_list(
        self: Arc<Self>,
        _ctx: RequestContext,
        _params: Option<Value>,
    ) -> Result<Value, McpError> {
        Ok(to_result(ListToolsResult {
            meta: None,
            next_cursor: None,
            tools: self.tools.clone(),
        }))
    }

    async fn tools_call(
        self: Arc<Self>,
        ctx: RequestContext,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let call: CallToolRequestParams = parse_params(params)?;
        let arguments = call.arguments.unwrap_or_default();

        let result = ctx
            .run(handle_tools_call(&self.services, &ctx, &call.name, arguments))
            .await?;
        Ok(to_result(result))
    }

    async fn resources_list(
        self: Arc<Self>,
        ctx: RequestContext,
        _params: Option<Value>,
    ) -> Result<Value, McpError> {
        let ctx = ctx.child_with_timeout(self.settings.resources_list_timeout);
        let resources = ctx
            .run(build_resources_list(self.services.requirements.as_ref()))
            .await?;

        Ok(to_result(ListResourcesResult {
            meta: None,
            next_cursor: None,
            resources,
        }))
    }

    async fn resources_read(
        self: Arc<Self>,
        ctx: RequestContext,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let request: ReadResourceRequestParams = parse_params(params)?;
        let result = ctx
            .run(handle_resources_read(
                self.services.requirements.as_ref(),
                &request.uri,
            ))
            .await?;
        Ok(to_result(result))
    }

    async fn prompts_list(
        self: Arc<Self>,
        ctx: RequestContext,
        _params: Option<Value>,
    ) -> Result<Value, McpError> {
        let prompts = ctx.run(self.services.prompts.list_prompts()).await?;
        let prompts = prompts
            .into_iter()
            .map(|prompt| {
                json!({
                    "name": prompt.name,
                    "title": prompt.title,
                    "description": prompt.description,
                    "arguments": [],
                })
            })
            .collect::<Vec<_>>();

        Ok(json!({ "prompts": prompts }))
    }

    async fn prompts_get(
        self: Arc<Self>,
        ctx: RequestContext,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let name = params
            .as_ref()
            .and_then(|params| params.get("name"))
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| McpError::invalid_params("missing required field 'name'"))?
            .to_string();

        let prompt = ctx.run(self.services.prompts.get_prompt(&name)).await?;
        Ok(json!({
            "description": prompt.description.unwrap_or(prompt.title),
            "messages": [{
                "role": "assistant",
                "content": { "type": "text", "text": prompt.content },
            }],
        }))
    }
}

fn bind<F, Fut>(handlers: &Arc<McpHandlers>, method: F) -> impl MethodHandler + 'static
where
    F: Fn(Arc<McpHandlers>, RequestContext, Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, McpError>> + Send + 'static,
{
    let handlers = Arc::clone(handlers);
    move |ctx: RequestContext, params: Option<Value>| method(Arc::clone(&handlers), ctx, params)
}

pub fn build_processor(services: Services, settings: ServerSettings) -> Processor {
    let handlers = Arc::new(McpHandlers::new(services, settings));
    let mut processor = Processor::new(settings.slow_operation_threshold);

    processor.register("initialize", bind(&handlers, McpHandlers::initialize));
    processor.register("notifications/initialized", bind(&handlers, McpHandlers::initialized));
    processor.register("ping", bind(&handlers, McpHandlers::ping));
    processor.register("tools/list", bind(&handlers, McpHandlers::tools_list));
    processor.register("tools/call", bind(&handlers, McpHandlers::tools_call));
    processor.register("resources/list", bind(&handlers, McpHandlers::resources_list));
    processor.register("resources/read", bind(&handlers, McpHandlers::resources_read));
    processor.register("prompts/list", bind(&handlers, McpHandlers::prompts_list));
    processor.register("prompts/get", bind(&handlers, McpHandlers::prompts_get));

    processor
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::domain::model::Prompt;
    use crate::errors::ServiceError;
    use crate::mcp::rpc::{map_mcp_error, INVALID_PARAMS, INVALID_REQUEST};
    use crate::store::{InMemoryStore, PromptRepository};

    fn initialize_params(version: &str) -> Value {
        json!({
            "protocolVersion": version,
            "clientInfo": {"name": "x", "version": "1"}
        })
    }

    #[test]
    fn negotiates_the_baseline_unless_the_newer_version_is_requested() {
        assert_eq!(
            negotiate_protocol_version(Some(&initialize_params("2025-03-26"))),
            Ok("2025-03-26")
        );
        assert_eq!(
            negotiate_protocol_version(Some(&initialize_params("2025-06-18"))),
            Ok("2025-06-18")
        );
    }

    #[test]
    fn unsupported_version_is_an_invalid_request() {
        let err = negotiate_protocol_version(Some(&initialize_params("2024-01-01")))
            .expect_err("unsupported");
        let rpc = map_mcp_error(&err);

        assert_eq!(rpc.code, INVALID_REQUEST);
        assert!(rpc.message.starts_with("Unsupported protocol version"));
    }

    #[test]
    fn malformed_version_is_an_invalid_param() {
        for params in [
            initialize_params("March 2025"),
            initialize_params("٢٠٢٥-٠٣-٢٦"),
            json!({"clientInfo": {"name": "x", "version": "1"}}),
        ] {
            let err = negotiate_protocol_version(Some(&params)).expect_err("malformed");
            assert_eq!(map_mcp_error(&err).code, INVALID_PARAMS);
        }
    }

    #[test]
    fn client_info_needs_name_and_version() {
        assert!(validate_client_info(Some(&initialize_params("2025-03-26"))).is_ok());

        let err = validate_client_info(Some(&json!({"clientInfo": {"name": "x", "version": " "}})))
            .expect_err("blank version");
        assert_eq!(
            err,
            McpError::invalid_params("clientInfo.version must be a non-empty string")
        );
    }

    struct UnreachablePrompts;

    #[async_trait::async_trait]
    impl PromptRepository for UnreachablePrompts {
        async fn get_active(&self) -> Result<Option<Prompt>, ServiceError> {
            Err(ServiceError::internal("dial tcp: connection refused"))
        }

        async fn list_prompts(&self) -> Result<Vec<Prompt>, ServiceError> {
            Err(ServiceError::internal("dial tcp: connection refused"))
        }

        async fn get_prompt(&self, _name: &str) -> Result<Prompt, ServiceError> {
            Err(ServiceError::internal("dial tcp: connection refused"))
        }
    }

    #[tokio::test]
    async fn initialize_survives_an_unreachable_prompt_store() {
        let services = Services {
            prompts: Arc::new(UnreachablePrompts),
            ..Services::from_store(Arc::new(InMemoryStore::default()))
        };
        let processor = Arc::new(build_processor(services, ServerSettings::default()));
        let ctx = RequestContext::new("test", None, CancellationToken::new());
        let request = json!({
            "version": "2.0",
            "id": 1,
            "method": "initialize",
            "params": initialize_params("2025-03-26")
        });

        let output = processor.process(&ctx, request.to_string().as_bytes()).await;
        let response: Value = serde_json::from_slice(&output.body).expect("json body");

        assert!(response.get("error").is_none(), "{response}");
        assert_eq!(response["result"]["instructions"], "");
        assert!(response["result"]["capabilities"].get("prompts").is_none());
        assert_eq!(response["result"]["serverInfo"]["title"], SERVER_TITLE);
    }

    #[test]
    fn every_method_is_registered() {
        let processor = build_processor(
            Services::from_store(Arc::new(InMemoryStore::default())),
            ServerSettings::default(),
        );

        for method in [
            "initialize",
            "notifications/initialized",
            "ping",
            "tools/list",
            "tools/call",
            "resources/list",
            "resources/read",
            "prompts/list",
            "prompts/get",
        ] {
            assert!(processor.has_method(method), "{method}");
        }
    }
}
