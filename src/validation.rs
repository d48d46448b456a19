//! Validation of client-supplied idempotency tokens.
//!
//! Tokens are opaque, but they end up as members of a (possibly shared)
//! store, so their size is bounded and control characters are refused.

use axum::http::HeaderName;

use crate::error::{AppError, AppResult};

/// Default maximum token length in bytes.
///
/// Generous enough for UUIDs, ULIDs and hex digests.
pub const DEFAULT_MAX_TOKEN_LEN: usize = 256;

/// Validate a trimmed, non-empty token against the configured bound.
///
/// Rules:
/// - At most `max_len` bytes
/// - No control characters (a header value may still carry horizontal tabs)
pub fn validate_token(token: &str, max_len: usize) -> AppResult<()> {
    if token.len() > max_len {
        return Err(AppError::InvalidToken(format!(
            "request token cannot exceed {max_len} bytes"
        )));
    }

    if let Some(pos) = token.chars().position(char::is_control) {
        return Err(AppError::InvalidToken(format!(
            "request token contains a control character at position {pos}"
        )));
    }

    Ok(())
}

/// Parse the configured token header name.
pub fn validate_header_name(name: &str) -> AppResult<HeaderName> {
    if name.trim().is_empty() {
        return Err(AppError::ConfigError(
            "DEDUP_HEADER_NAME cannot be empty".to_string(),
        ));
    }

    HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
        AppError::ConfigError(format!("DEDUP_HEADER_NAME '{name}' is not a valid header: {e}"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_token_valid() {
        assert!(validate_token("abc", DEFAULT_MAX_TOKEN_LEN).is_ok());
        assert!(validate_token("550e8400-e29b-41d4-a716-446655440000", 64).is_ok());
        assert!(validate_token(&"x".repeat(256), 256).is_ok());
    }

    #[test]
    fn test_validate_token_too_long() {
        let err = validate_token(&"x".repeat(257), 256).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(_)));
        assert!(err.to_string().contains("256"));
    }

    #[test]
    fn test_validate_token_rejects_tab() {
        let err = validate_token("ab\tc", DEFAULT_MAX_TOKEN_LEN).unwrap_err();
        assert!(err.to_string().contains("position 2"));
    }

    #[test]
    fn test_validate_header_name() {
        assert_eq!(
            validate_header_name("X-Request-Id").unwrap().as_str(),
            "x-request-id"
        );
        assert_eq!(
            validate_header_name(" Idempotency-Key ").unwrap().as_str(),
            "idempotency-key"
        );
        assert!(validate_header_name("").is_err());
        assert!(validate_header_name("bad header").is_err());
    }
}
