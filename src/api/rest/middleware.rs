use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::{bearer_token, Identity, Role};
use crate::error::AppError;
use crate::state::AppState;

/// Verifies the bearer token and stores the caller's [`Identity`] in the
/// request extensions.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let token = bearer_token(header)
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: No token provided".to_string()))?;

    let identity = state.authenticator.authenticate(token)?;
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

pub async fn require_delivery_personnel(
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = request
        .extensions()
        .get::<Identity>()
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: No user found".to_string()))?;

    if !identity.has_role(&Role::DeliveryPersonnel) {
        return Err(AppError::Forbidden("Forbidden: Access denied".to_string()));
    }

    Ok(next.run(request).await)
}
