mod api;

pub use api::{HealthResponse, SubmissionResponse};
