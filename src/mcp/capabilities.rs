//! Capability advertisement and server instructions for `initialize`.

use rust_mcp_sdk::schema::{
    ServerCapabilities, ServerCapabilitiesPrompts, ServerCapabilitiesResources,
    ServerCapabilitiesTools, Tool,
};
use tracing::warn;

use crate::mcp::context::RequestContext;
use crate::store::PromptRepository;

/// A feature is advertised only when its provider has something to offer.
/// Resources are always present.
pub fn server_capabilities(tools: &[Tool], has_prompts: bool) -> ServerCapabilities {
    ServerCapabilities {
        tools: (!tools.is_empty()).then_some(ServerCapabilitiesTools {
            list_changed: Some(false),
        }),
        prompts: has_prompts.then_some(ServerCapabilitiesPrompts {
            list_changed: Some(false),
        }),
        resources: Some(ServerCapabilitiesResources {
            subscribe: None,
            list_changed: Some(false),
        }),
        ..Default::default()
    }
}

pub async fn has_prompts(prompts: &dyn PromptRepository, ctx: &RequestContext) -> bool {
    match ctx.run(prompts.list_prompts()).await {
        Ok(prompts) => !prompts.is_empty(),
        Err(err) => {
            warn!(correlation_id = %ctx.correlation_id, error = %err, "prompt listing failed, prompts not advertised");
            false
        }
    }
}

/// Content of the active prompt. Lookup failures, including the request
/// deadline, never fail `initialize`.
pub async fn instructions(prompts: &dyn PromptRepository, ctx: &RequestContext) -> String {
    match ctx.run(prompts.get_active()).await {
        Ok(Some(prompt)) => prompt.content,
        Ok(None) => String::new(),
        Err(err) => {
            warn!(correlation_id = %ctx.correlation_id, error = %err, "active prompt lookup failed, using empty instructions");
            String::new()
        }
    }
}
