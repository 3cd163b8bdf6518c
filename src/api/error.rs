use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Structured error type for the HTTP handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. WebSocket viewers never see these; session
/// creation failures on the viewer endpoint are reported as an `error`
/// protocol message instead.
#[derive(Debug)]
pub enum ApiError {
    /// 404 - A specific session id was not found.
    SessionNotFound(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::SessionNotFound(_) => "session_not_found",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::SessionNotFound(id) => format!("Session not found: {}.", id),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
