//! REST routes for comments on planning artifacts.
//!
//! Listings answer `{comments, count}`; single comments are returned as-is.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::anchors::InlineSelection;
use crate::domain::model::{AuthenticatedUser, Comment, EntityKind, EntityLookup};
use crate::errors::AppError;
use crate::store::NewComment;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CommentList {
    pub comments: Vec<Comment>,
    pub count: usize,
}

impl From<Vec<Comment>> for CommentList {
    fn from(comments: Vec<Comment>) -> Self {
        Self {
            count: comments.len(),
            comments,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    pub parent_id: Option<Uuid>,
    #[serde(flatten)]
    pub selection: InlineSelection,
}

/// Resolves `/{kind}/{id-or-ref}` to the entity kind and canonical id.
async fn resolve_target(
    state: &AppState,
    kind: &str,
    identifier: &str,
) -> Result<(EntityKind, Uuid), AppError> {
    let kind = EntityKind::from_collection(kind).ok_or_else(|| AppError::NotFound {
        code: "unknown_entity_kind",
        message: format!("unknown entity kind '{kind}'"),
    })?;
    let lookup = EntityLookup::parse(identifier).ok_or_else(|| {
        AppError::bad_request(
            "invalid_identifier",
            "identifier must be a canonical id or a reference such as EP-001",
        )
    })?;

    let entity = state.services.requirements.get_entity(kind, &lookup).await?;
    Ok((kind, entity.id()))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path((kind, identifier)): Path<(String, String)>,
) -> Result<Json<CommentList>, AppError> {
    let (kind, entity_id) = resolve_target(&state, &kind, &identifier).await?;
    let comments = state.services.comments.list_comments(kind, entity_id).await?;
    Ok(Json(comments.into()))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((kind, identifier)): Path<(String, String)>,
    Json(request): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let (kind, entity_id) = resolve_target(&state, &kind, &identifier).await?;
    let comment = state
        .services
        .comments
        .create_comment(NewComment {
            entity_type: kind,
            entity_id,
            author_id: user.id,
            content: request.content,
            parent_comment_id: request.parent_id,
            selection: request.selection,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn list_visible_inline_comments(
    State(state): State<AppState>,
    Path((kind, identifier)): Path<(String, String)>,
) -> Result<Json<CommentList>, AppError> {
    let (kind, entity_id) = resolve_target(&state, &kind, &identifier).await?;
    let comments = state
        .services
        .comments
        .list_visible_inline_comments(kind, entity_id)
        .await?;
    Ok(Json(comments.into()))
}

pub async fn list_replies(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
) -> Result<Json<CommentList>, AppError> {
    let replies = state.services.comments.list_replies(comment_id).await?;
    Ok(Json(replies.into()))
}

pub async fn resolve_comment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(comment_id): Path<Uuid>,
) -> Result<Json<Comment>, AppError> {
    let comment = state
        .services
        .comments
        .set_resolved(comment_id, true, &user)
        .await?;
    Ok(Json(comment))
}

pub async fn unresolve_comment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(comment_id): Path<Uuid>,
) -> Result<Json<Comment>, AppError> {
    let comment = state
        .services
        .comments
        .set_resolved(comment_id, false, &user)
        .await?;
    Ok(Json(comment))
}
