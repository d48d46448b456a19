mod health;
mod submissions;

pub use health::{health_check, readiness_check};
pub use submissions::accept_submission;
