use axum::{Extension, Json};

use crate::error::ApiResponse;
use crate::models::{SessionInfoResponse, VerifiedSession};

/// Describe the bound session the request arrived with
/// GET /api/session
pub async fn get_session(
    Extension(session): Extension<VerifiedSession>,
) -> Json<ApiResponse<SessionInfoResponse>> {
    Json(ApiResponse::success(SessionInfoResponse {
        session_identifier: session.session_id,
        credential: String::from_utf8_lossy(&session.credential).into_owned(),
    }))
}
