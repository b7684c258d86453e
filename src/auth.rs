use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::{errors::AppError, AppState};

/// Resolves the bearer token to a user and stores it in request extensions.
pub async fn require_bearer_token(
    State(state): State<AppState>,
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(TypedHeader(auth)) = auth_header else {
        return Err(AppError::unauthorized(
            "missing_token",
            "missing authorization header",
        ));
    };

    let Some(user) = state.tokens.get(auth.token()).cloned() else {
        return Err(AppError::unauthorized(
            "invalid_token",
            "invalid bearer token",
        ));
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
