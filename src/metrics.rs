//! Prometheus metrics for the deduplication guard.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `dedup_requests_total` - Guard decisions (label: `outcome`)
//! - `dedup_release_failures_total` - Claims that could not be released (label: `backend`)
//!
//! ## Histograms
//! - `dedup_store_op_duration_seconds` - Token store latency (labels: `backend`, `op`)
//!
//! # Usage
//!
//! ```rust,ignore
//! use request_dedup::metrics::{try_init_metrics, record_outcome, Outcome};
//!
//! try_init_metrics("0.0.0.0:9090".parse()?);
//! record_outcome(Outcome::Duplicate);
//! ```
//!
//! Recording functions are no-ops until an exporter is installed.

use std::net::SocketAddr;

use anyhow::Context;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "dedup_requests_total";
    pub const RELEASE_FAILURES_TOTAL: &str = "dedup_release_failures_total";
    pub const STORE_OP_DURATION_SECONDS: &str = "dedup_store_op_duration_seconds";
}

/// Terminal decision of the guard for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Bypassed,
    Admitted,
    Duplicate,
    MissingToken,
    PassedWithoutToken,
    InvalidToken,
    BackendFault,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Bypassed => "bypassed",
            Outcome::Admitted => "admitted",
            Outcome::Duplicate => "duplicate",
            Outcome::MissingToken => "missing_token",
            Outcome::PassedWithoutToken => "passed_without_token",
            Outcome::InvalidToken => "invalid_token",
            Outcome::BackendFault => "backend_fault",
        }
    }
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Fails if the HTTP listener cannot be installed (e.g. a recorder is
/// already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install Prometheus exporter")?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Requests seen by the deduplication guard, by outcome"
    );
    describe_counter!(
        names::RELEASE_FAILURES_TOTAL,
        "Claims whose release failed and may stay stuck in the store"
    );
    describe_histogram!(
        names::STORE_OP_DURATION_SECONDS,
        "Token store operation duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_outcome(outcome: Outcome) {
    counter!(names::REQUESTS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_release_failure(backend: &'static str) {
    counter!(names::RELEASE_FAILURES_TOTAL, "backend" => backend).increment(1);
}

pub fn record_store_op(backend: &'static str, op: &'static str, duration_secs: f64) {
    histogram!(names::STORE_OP_DURATION_SECONDS, "backend" => backend, "op" => op)
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Recording without an installed recorder must not panic

    #[test]
    fn test_record_functions_without_recorder() {
        record_outcome(Outcome::Admitted);
        record_release_failure("memory");
        record_store_op("redis", "save", 0.002);
    }

    #[test]
    fn test_outcome_labels_are_unique() {
        let all = [
            Outcome::Bypassed,
            Outcome::Admitted,
            Outcome::Duplicate,
            Outcome::MissingToken,
            Outcome::PassedWithoutToken,
            Outcome::InvalidToken,
            Outcome::BackendFault,
        ];
        let mut labels: Vec<_> = all.iter().map(Outcome::as_str).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), all.len());
    }
}
