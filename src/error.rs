use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Reasons a DBSC request is rejected.
///
/// Callers only ever see a bare 401; the variant is for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("malformed token: {0}")]
    MalformedToken(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unknown or consumed challenge")]
    UnknownOrConsumedChallenge,

    #[error("unknown session")]
    UnknownSession,

    #[error("public key does not match the session binding")]
    KeyMismatch,

    #[error("session id already bound to a different key")]
    KeyConflict,

    #[error("no credential to attach to the session")]
    MissingCredential,
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Session rejected: {0}")]
    Session(#[from] SessionError),
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn success_message(message: &str) -> ApiResponse<()> {
        ApiResponse {
            code: 0,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn error(code: i32, message: &str) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Database error".to_string())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 401, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 400, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, msg.clone())
            }
            AppError::Session(e) => {
                tracing::warn!("DBSC request rejected: {}", e);
                (StatusCode::UNAUTHORIZED, 401, "Unauthorized".to_string())
            }
        };

        let body = Json(ApiResponse::<()>::error(code, &message));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
