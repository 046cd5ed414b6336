use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tapestry_core::error as core_error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] tapestry_core::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A provider hook or server setting failed in a way the caller cannot fix.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Core(err) => match err {
                core_error::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                core_error::Error::NotFound(_) => StatusCode::NOT_FOUND,
                core_error::Error::Conflict(_) => StatusCode::CONFLICT,
                core_error::Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                core_error::Error::Provider { .. }
                | core_error::Error::ShapeMismatch { .. }
                | core_error::Error::Backend { .. }
                | core_error::Error::BackendMessage(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::warn!(status = %code, error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_core_errors_to_statuses() {
        let cases = [
            (tapestry_core::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (tapestry_core::Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (tapestry_core::Error::Conflict("x".into()), StatusCode::CONFLICT),
            (tapestry_core::Error::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (
                tapestry_core::Error::provider_message("toggl", "boom"),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
        assert_eq!(
            ApiError::Internal("hook".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
