use axum::http::HeaderMap;

use crate::error::AppError;
use crate::state::AppState;

/// Checks the `Authorization: Bearer <token>` header against the configured ingest token.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] if the header is missing, malformed, or carries the wrong
/// token.
pub fn validate_bearer_token(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AppError::Unauthorized)?;

    if token.is_empty() || token != state.config.ingest_token {
        return Err(AppError::Unauthorized);
    }

    Ok(())
}
