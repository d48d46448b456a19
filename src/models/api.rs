use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Token store backend in use
    pub backend: String,
    /// Whether the token store answered a ping
    pub store_reachable: bool,
    /// Service version
    pub version: String,
    /// Seconds since startup
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Response after accepting a guarded submission.
#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    /// Server-generated identifier of the accepted submission
    pub submission_id: Uuid,
    /// Always "accepted"
    pub status: String,
    /// Idempotency token the client sent, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_token: Option<String>,
    /// Size of the JSON payload in bytes
    pub payload_bytes: usize,
    /// When processing finished
    pub received_at: DateTime<Utc>,
}
