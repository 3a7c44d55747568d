use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::error::AppError;
use crate::AppState;

/// Bound-session middleware
/// Resolves the DBSC cookie to its session and credential
pub async fn dbsc_session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let jar = CookieJar::from_headers(request.headers());

    let cookie_value = jar
        .get(state.dbsc.cookie().name())
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::Unauthorized("Missing session cookie".to_string()))?;

    let session = state
        .dbsc
        .verify_session(&cookie_value)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Session expired".to_string()))?;

    // Insert verified session into request extensions
    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

