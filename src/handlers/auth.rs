use axum::{extract::State, response::IntoResponse, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::error::{ApiResponse, Result};
use crate::models::{LoginRequest, LoginResponse};
use crate::services::AuthService;
use crate::AppState;

fn fallback_cookie(state: &AppState, value: String) -> Cookie<'static> {
    Cookie::build((state.config.fallback.cookie_name.clone(), value))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.cookie.secure)
        .path("/")
        .max_age(time::Duration::seconds(state.config.fallback.max_age().num_seconds()))
        .build()
}

/// Password login; sets the long-lived fallback cookie DBSC registration starts from
/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let user = AuthService::login(&state.db, &req).await?;
    let cookie_value = state.identities.issue(&user.id).await?;

    tracing::info!("User {} logged in", user.username);

    let jar = jar.add(fallback_cookie(&state, cookie_value));
    Ok((jar, Json(ApiResponse::success(LoginResponse::from(user)))))
}

/// Revoke the bound session and forget the fallback identity
/// POST /api/logout
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Result<impl IntoResponse> {
    if let Some(bound) = jar.get(state.dbsc.cookie().name()) {
        state.dbsc.logout(bound.value()).await?;
    }
    if let Some(fallback) = jar.get(&state.config.fallback.cookie_name) {
        state.identities.forget(fallback.value()).await?;
    }

    let jar = jar
        .remove(state.dbsc.cookie().removal())
        .remove(fallback_cookie(&state, String::new()));

    Ok((jar, Json(ApiResponse::<()>::success_message("Logged out"))))
}
