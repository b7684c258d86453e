use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod store;

use config::{Config, Credential};
use domain::model::AuthenticatedUser;
use mcp::processor::Processor;
use mcp::server::{build_processor, ServerSettings};
use store::{InMemoryStore, Services};

#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<HashMap<String, AuthenticatedUser>>,
    pub services: Services,
    pub processor: Arc<Processor>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        credentials: &[Credential],
        services: Services,
        settings: ServerSettings,
        request_timeout: Duration,
    ) -> Self {
        let tokens = credentials
            .iter()
            .map(|credential| (credential.token.clone(), credential.user.clone()))
            .collect();

        Self {
            tokens: Arc::new(tokens),
            processor: Arc::new(build_processor(services.clone(), settings)),
            services,
            request_timeout,
        }
    }

    /// State backed by a fresh in-memory store seeded with the configured
    /// users and system prompt.
    pub fn from_config(config: &Config) -> Self {
        let store = Arc::new(InMemoryStore::new(config.users(), config.seed_prompts()));
        Self::new(
            &config.credentials,
            Services::from_store(store),
            config.server_settings(),
            config.request_timeout,
        )
    }
}

pub fn build_app(state: AppState) -> Router {
    use http::comments;

    let protected = Router::new()
        .route("/mcp", post(http::handlers::mcp_endpoint))
        .route(
            "/api/v1/comments/{comment_id}/replies",
            get(comments::list_replies),
        )
        .route(
            "/api/v1/comments/{comment_id}/resolve",
            post(comments::resolve_comment),
        )
        .route(
            "/api/v1/comments/{comment_id}/unresolve",
            post(comments::unresolve_comment),
        )
        .route(
            "/api/v1/{kind}/{identifier}/comments",
            get(comments::list_comments).post(comments::create_comment),
        )
        .route(
            "/api/v1/{kind}/{identifier}/comments/inline/visible",
            get(comments::list_visible_inline_comments),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
