use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Rejections vs Faults
///
/// - `MissingToken`, `InvalidToken` and `DuplicateRequest` are normal
///   rejections of a client request and carry the client-facing message
/// - `StoreUnavailable` is an infrastructure fault; its detail is logged but
///   never sent to the client
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing request token: {0}")]
    MissingToken(String),

    #[error("Invalid request token: {0}")]
    InvalidToken(String),

    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("Token store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingToken(_)
            | AppError::InvalidToken(_)
            | AppError::SerializationError(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateRequest(_) => StatusCode::FORBIDDEN,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body: `{"error": "<message>"}`.
#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server-side faults keep their detail in the logs only
        let message = match &self {
            AppError::MissingToken(msg)
            | AppError::InvalidToken(msg)
            | AppError::DuplicateRequest(msg) => {
                tracing::debug!(error = %self, "Request rejected");
                msg.as_str()
            }
            AppError::SerializationError(_) => {
                tracing::debug!(error = %self, "Request rejected");
                "Malformed JSON in request body"
            }
            AppError::StoreUnavailable(_) => {
                tracing::error!(error = %self, "Request failed");
                "Request deduplication is temporarily unavailable. Please try again later."
            }
            AppError::ConfigError(_) => {
                tracing::error!(error = %self, "Request failed");
                "An internal error occurred. Please contact support if the issue persists."
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_rejections_carry_configured_message() {
        let (status, body) = body_of(AppError::MissingToken("need a token".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({ "error": "need a token" }));

        let (status, body) = body_of(AppError::DuplicateRequest("please wait".into())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "please wait");
    }

    #[tokio::test]
    async fn test_store_fault_hides_backend_detail() {
        let (status, body) =
            body_of(AppError::StoreUnavailable("connection refused 10.0.0.7:6379".into())).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let message = body["error"].as_str().unwrap();
        assert!(!message.contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn test_config_error_is_internal_and_hides_detail() {
        let (status, body) =
            body_of(AppError::ConfigError("REDIS_URL=redis://secret".into())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["error"].as_str().unwrap().contains("secret"));
    }

    #[test]
    fn test_duplicate_and_missing_have_distinct_status() {
        assert_ne!(
            AppError::MissingToken(String::new()).status(),
            AppError::DuplicateRequest(String::new()).status()
        );
    }
}
