//! Guarded demo mutation.
//!
//! # Endpoints
//!
//! - `POST /submissions` - Accept an arbitrary JSON document
//!
//! The deduplication layer has already claimed `(client, token)` by the time
//! this handler runs. `PROCESSING_DELAY_MS` stretches the handler so that
//! overlapping retries are easy to observe.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::AppResult;
use crate::guard::extract_token;
use crate::models::SubmissionResponse;
use crate::state::AppState;

/// Accept a submission after the configured processing delay.
///
/// # Request Body
///
/// Any JSON document.
///
/// # Response Body
///
/// ```json
/// {
///   "submission_id": "550e8400-e29b-41d4-a716-446655440000",
///   "status": "accepted",
///   "request_token": "order-42",
///   "payload_bytes": 17,
///   "received_at": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state, headers, payload))]
pub async fn accept_submission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> AppResult<Json<SubmissionResponse>> {
    let payload_bytes = serde_json::to_vec(&payload)?.len();

    let delay = state.config.processing_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let request_token = extract_token(&headers, &state.guard.settings().header_name)?
        .map(str::to_string);
    let submission_id = Uuid::new_v4();
    info!(%submission_id, payload_bytes, "Submission accepted");

    Ok(Json(SubmissionResponse {
        submission_id,
        status: "accepted".to_string(),
        request_token,
        payload_bytes,
        received_at: Utc::now(),
    }))
}
