use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;

use crate::error::{ApiResponse, Result};
use crate::models::{RefreshOutcome, SessionGrant};
use crate::services::dbsc::{
    CHALLENGE_HEADER, REGISTRATION_HEADER, RESPONSE_HEADER, SESSION_ID_HEADER,
};
use crate::AppState;

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}

fn fallback_cookie<'a>(state: &AppState, jar: &'a CookieJar) -> Option<&'a str> {
    jar.get(&state.config.fallback.cookie_name).map(|c| c.value())
}

/// Sets the bound cookie and returns the session instructions, uncached
fn grant_response(state: &AppState, jar: CookieJar, grant: SessionGrant) -> Response {
    let jar = jar.add(state.dbsc.cookie().build(grant.cookie_value));
    (
        jar,
        [(header::CACHE_CONTROL, "no-store")],
        Json(grant.instructions),
    )
        .into_response()
}

/// Ask the browser to create a bound session
/// GET /api/start-dbsc-flow
pub async fn start_dbsc_flow(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse> {
    let registration = state.dbsc.start(fallback_cookie(&state, &jar)).await?;

    Ok((
        [(REGISTRATION_HEADER, registration)],
        Json(ApiResponse::<()>::success_message("DBSC registration requested")),
    ))
}

/// Verify the registration proof and issue the first bound cookie
/// POST /api/register-dbsc-cookie
pub async fn register_dbsc_cookie(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Response> {
    let grant = state
        .dbsc
        .register(
            header_value(&headers, RESPONSE_HEADER),
            fallback_cookie(&state, &jar),
        )
        .await?;

    Ok(grant_response(&state, jar, grant))
}

/// Challenge, or rotate the bound cookie against a signed proof
/// POST /api/refresh-dbsc-cookie
pub async fn refresh_dbsc_cookie(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Response> {
    let outcome = state
        .dbsc
        .refresh(
            header_value(&headers, SESSION_ID_HEADER),
            header_value(&headers, RESPONSE_HEADER),
        )
        .await?;

    match outcome {
        RefreshOutcome::ChallengeRequired { challenge_header } => Ok((
            StatusCode::UNAUTHORIZED,
            [(CHALLENGE_HEADER, challenge_header)],
        )
            .into_response()),
        RefreshOutcome::Refreshed(grant) => Ok(grant_response(&state, jar, grant)),
    }
}
