use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::domain::model::EntityKind;

/// Errors raised by the planning-artifact services.
///
/// Messages are caller-safe only for the validation family. Everything else is
/// logged and replaced by a fixed sentence before it leaves the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{kind} not found: {identifier}")]
    NotFound {
        kind: &'static str,
        identifier: String,
    },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("operation timed out")]
    Timeout,
    #[error("operation canceled")]
    Canceled,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("inline comment data must include linked_text, text_position_start and text_position_end")]
    InvalidInlineData,
    #[error("text position does not match the entity body")]
    InvalidTextPosition,
    #[error("linked text must not be empty")]
    EmptyLinkedText,
    #[error("parent comment belongs to a different entity")]
    ParentEntityMismatch,
    #[error("internal: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(kind: EntityKind, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.display_name(),
            identifier: identifier.into(),
        }
    }

    pub fn not_found_named(kind: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            identifier: identifier.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failure kinds a JSON-RPC method handler can return.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum McpError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl McpError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest {
        code: &'static str,
        message: String,
    },
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("forbidden: {message}")]
    Forbidden {
        code: &'static str,
        message: &'static str,
    },
    #[error("not found: {message}")]
    NotFound {
        code: &'static str,
        message: String,
    },
    #[error("conflict: {message}")]
    Conflict {
        code: &'static str,
        message: String,
    },
    #[error("unsupported media type")]
    UnsupportedMediaType,
    #[error("service unavailable")]
    Unavailable { message: String },
    #[error("internal error")]
    Internal { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }

    pub fn forbidden(code: &'static str, message: &'static str) -> Self {
        Self::Forbidden { code, message }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(message) => Self::bad_request("validation_failed", message),
            ServiceError::InvalidInlineData => {
                Self::bad_request("invalid_inline_data", err.to_string())
            }
            ServiceError::InvalidTextPosition => {
                Self::bad_request("invalid_text_position", err.to_string())
            }
            ServiceError::EmptyLinkedText => {
                Self::bad_request("empty_linked_text", err.to_string())
            }
            ServiceError::ParentEntityMismatch => {
                Self::bad_request("parent_entity_mismatch", err.to_string())
            }
            ServiceError::NotFound { .. } => Self::NotFound {
                code: "not_found",
                message: err.to_string(),
            },
            ServiceError::Conflict(message) => Self::Conflict {
                code: "conflict",
                message,
            },
            ServiceError::Unauthorized(message) => Self::unauthorized("unauthorized", message),
            ServiceError::Forbidden(message) => Self::forbidden("forbidden", message),
            ServiceError::Unavailable(message) => Self::Unavailable { message },
            ServiceError::Timeout | ServiceError::Canceled | ServiceError::Internal(_) => {
                Self::internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, code, message.to_string())
            }
            Self::Forbidden { code, message } => {
                (StatusCode::FORBIDDEN, code, message.to_string())
            }
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message),
            Self::Conflict { code, message } => (StatusCode::CONFLICT, code, message),
            Self::UnsupportedMediaType => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_media_type",
                "content type must be application/json".to_string(),
            ),
            Self::Unavailable { message } => {
                tracing::error!(error = %message, "request failed with storage error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "service temporarily unavailable".to_string(),
                )
            }
            Self::Internal { code, message } => {
                tracing::error!(error = %message, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details: json!({}),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_kind_and_identifier() {
        let err = ServiceError::not_found(EntityKind::Epic, "EP-999");
        assert_eq!(err.to_string(), "Epic not found: EP-999");
        assert!(err.is_not_found());
    }

    #[test]
    fn service_errors_map_to_distinct_http_statuses() {
        let unauthorized = AppError::from(ServiceError::Unauthorized("token expired"));
        let forbidden = AppError::from(ServiceError::Forbidden("missing role"));

        assert_eq!(
            unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(forbidden.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn internal_details_are_not_returned() {
        let response =
            AppError::from(ServiceError::internal("pq: relation \"epics\" missing")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
