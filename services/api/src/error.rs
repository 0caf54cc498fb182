use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use consult_core::ConsultError;
use serde::Serialize;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Upstream failure. Only the public message reaches the client.
    #[error("{0}")]
    Upstream(String),

    #[error("Too many requests, please try again later.")]
    RateLimited { message: &'static str },
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<&'static str>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Maps a core error, hiding upstream details behind `public_message`.
    pub fn from_core(error: ConsultError, public_message: &str) -> Self {
        match error {
            ConsultError::Validation(message) => ApiError::BadRequest(message),
            ConsultError::Media(e) => ApiError::BadRequest(format!("{e}. {}", e.guidance())),
            ConsultError::Recognition(e) => ApiError::BadRequest(e.to_string()),
            ConsultError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            ConsultError::TurnInProgress | ConsultError::InvalidTransition { .. } => {
                ApiError::Conflict(error.to_string())
            }
            ConsultError::Upstream { .. }
            | ConsultError::Transport { .. }
            | ConsultError::EmptyReply => {
                tracing::error!(error = %error, "{public_message}");
                ApiError::Upstream(public_message.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error, retry_after) = match &self {
            ApiError::RateLimited { message } => (message.to_string(), Some("15 minutes")),
            other => (other.to_string(), None),
        };
        let body = ErrorBody {
            error: &error,
            retry_after,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_details_are_hidden() {
        let err = ApiError::from_core(
            ConsultError::Upstream {
                service: "avatar platform",
                status: 401,
                body: "invalid api key sk-123".into(),
            },
            "Failed to create session token",
        );
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "Failed to create session token");
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ApiError::from_core(ConsultError::validation("No image data provided"), "x");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "No image data provided");
    }
}
