//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Deduplication
//!
//! - `DEDUP_HEADER_NAME`: Header carrying the idempotency token (default: `X-Request-Id`)
//! - `DEDUP_PASS_ON_MISSING`: Let requests without a token through (default: false)
//! - `DEDUP_BACKEND`: `memory` for a single instance, `redis` to share claims
//!   across instances (default: memory)
//! - `REDIS_URL`: Required when `DEDUP_BACKEND=redis`
//!
//! # Client Identity
//!
//! - `TRUSTED_PROXIES`: Comma-separated CIDRs whose `X-Forwarded-For` is believed

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::guard::{
    DEFAULT_HEADER_NAME, DEFAULT_OVERLAP_MESSAGE, DedupSettings, default_missing_message,
};
use crate::middleware::TrustedProxyConfig;
use crate::store::{
    BackendKind, DEFAULT_REDIS_RESOURCE, DEFAULT_SET_KEY, LocalTokenStore, SharedTokenStore,
    StoreEnvironment, TokenStore,
};
use crate::validation::{DEFAULT_MAX_TOKEN_LEN, validate_header_name};

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Deduplication Guard
    // =========================================================================
    /// Header carrying the idempotency token (default: "X-Request-Id")
    pub header_name: String,

    /// Let requests without a token through unchecked (default: false)
    pub pass_on_missing: bool,

    /// Body of the 400 response for a missing token.
    /// `None` derives "header value <header> can't be empty" from `header_name`.
    pub missing_message: Option<String>,

    /// Body of the 403 response for a duplicate request
    pub overlap_message: String,

    /// Longest accepted token in bytes (default: 256)
    pub max_token_len: usize,

    // =========================================================================
    // Token Store
    // =========================================================================
    /// Token store backend (default: memory)
    pub backend: BackendKind,

    /// Redis connection URL, required for the redis backend
    pub redis_url: Option<String>,

    /// Redis set holding claimed keys (default: "RequestID")
    pub redis_set_key: String,

    /// Upper bound on each Redis command (default: none)
    pub redis_response_timeout: Option<Duration>,

    // =========================================================================
    // HTTP
    // =========================================================================
    /// Trusted proxy CIDR ranges for client identity.
    /// Empty means forwarding headers are never believed.
    pub trusted_proxies: Vec<String>,

    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    /// Artificial latency of the demo submission handler (default: 0)
    pub processing_delay: Duration,

    /// CORS allowed origins (default: ["*"] for development)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability
    // =========================================================================
    /// Interval between background store pings (default: 30 seconds, 0 = disabled)
    pub health_check_interval: Duration,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or validate.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,

            // Guard
            header_name: Self::non_empty_env("DEDUP_HEADER_NAME").unwrap_or(defaults.header_name),
            pass_on_missing: Self::parse_env("DEDUP_PASS_ON_MISSING", defaults.pass_on_missing)?,
            missing_message: Self::non_empty_env("DEDUP_MISSING_MESSAGE"),
            overlap_message: Self::non_empty_env("DEDUP_OVERLAP_MESSAGE")
                .unwrap_or(defaults.overlap_message),
            max_token_len: Self::parse_env("DEDUP_MAX_TOKEN_LEN", defaults.max_token_len)?,

            // Store
            backend: Self::parse_env("DEDUP_BACKEND", defaults.backend)?,
            redis_url: Self::non_empty_env("REDIS_URL"),
            redis_set_key: Self::non_empty_env("DEDUP_REDIS_KEY")
                .unwrap_or(defaults.redis_set_key),
            redis_response_timeout: match Self::parse_env("REDIS_RESPONSE_TIMEOUT_MS", 0u64)? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },

            // HTTP
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),
            max_request_body_size: Self::parse_env(
                "MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_size,
            )?,
            processing_delay: Duration::from_millis(Self::parse_env("PROCESSING_DELAY_MS", 0)?),
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),

            // Observability
            health_check_interval: Duration::from_secs(Self::parse_env(
                "HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval.as_secs(),
            )?),
            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        validate_header_name(&self.header_name)?;

        if self.max_token_len == 0 {
            return Err(AppError::ConfigError(
                "DEDUP_MAX_TOKEN_LEN must be greater than 0".to_string(),
            ));
        }

        if self.backend == BackendKind::Redis && self.redis_url.is_none() {
            return Err(AppError::ConfigError(
                "REDIS_URL is required when DEDUP_BACKEND=redis".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Guard settings derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the header name is invalid.
    pub fn dedup_settings(&self) -> AppResult<DedupSettings> {
        let header_name = validate_header_name(&self.header_name)?;
        let missing_message = self
            .missing_message
            .clone()
            .unwrap_or_else(|| default_missing_message(self.header_name.trim()));

        Ok(DedupSettings {
            header_name,
            pass_on_missing: self.pass_on_missing,
            missing_message,
            overlap_message: self.overlap_message.clone(),
            max_token_len: self.max_token_len,
            trusted_proxies: TrustedProxyConfig::new(&self.trusted_proxies),
        })
    }

    /// Backend store selected by `DEDUP_BACKEND`, not yet initialized.
    pub fn build_store(&self) -> Arc<dyn TokenStore> {
        match self.backend {
            BackendKind::Memory => Arc::new(LocalTokenStore::new()),
            BackendKind::Redis => Arc::new(
                SharedTokenStore::new()
                    .with_set_key(self.redis_set_key.clone())
                    .with_response_timeout(self.redis_response_timeout),
            ),
        }
    }

    /// Named resources handed to the store's `init`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if `REDIS_URL` cannot be parsed.
    pub fn store_environment(&self) -> AppResult<StoreEnvironment> {
        let env = StoreEnvironment::new();
        let Some(url) = &self.redis_url else {
            return Ok(env);
        };

        let client = redis::Client::open(url.as_str())
            .map_err(|e| AppError::ConfigError(format!("Invalid REDIS_URL: {e}")))?;
        Ok(env.with_redis(DEFAULT_REDIS_RESOURCE, client))
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    fn non_empty_env(name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_else(|_| default.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            // Guard
            header_name: DEFAULT_HEADER_NAME.to_string(),
            pass_on_missing: false,
            missing_message: None,
            overlap_message: DEFAULT_OVERLAP_MESSAGE.to_string(),
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
            // Store
            backend: BackendKind::Memory,
            redis_url: None,
            redis_set_key: DEFAULT_SET_KEY.to_string(),
            redis_response_timeout: None,
            // HTTP
            trusted_proxies: vec![],
            max_request_body_size: 1024 * 1024, // 1MB
            processing_delay: Duration::ZERO,
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            health_check_interval: Duration::from_secs(30),
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.header_name, "X-Request-Id");
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.redis_set_key, "RequestID");
        assert_eq!(config.max_token_len, 256);
        assert!(config.redis_response_timeout.is_none());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "localhost".to_string(),
            port: 3000,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "localhost:3000");
    }

    #[test]
    fn test_metrics_addr() {
        assert_eq!(
            Config::default().metrics_addr(),
            Some("0.0.0.0:9090".parse().unwrap())
        );

        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_redis_requires_url() {
        let config = Config {
            backend: BackendKind::Redis,
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("REDIS_URL"));

        let config = Config {
            backend: BackendKind::Redis,
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_header_name() {
        let config = Config {
            header_name: "not a header".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_max_token_len_zero() {
        let config = Config {
            max_token_len: 0,
            ..Config::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("DEDUP_MAX_TOKEN_LEN")
        );
    }

    #[test]
    fn test_dedup_settings_derive_missing_message_from_header() {
        let config = Config {
            header_name: "Idempotency-Key".to_string(),
            ..Config::default()
        };

        let settings = config.dedup_settings().unwrap();
        assert_eq!(settings.header_name.as_str(), "idempotency-key");
        assert_eq!(
            settings.missing_message,
            "header value Idempotency-Key can't be empty"
        );
    }

    #[test]
    fn test_dedup_settings_trim_header_in_missing_message() {
        let config = Config {
            header_name: " Idempotency-Key ".to_string(),
            ..Config::default()
        };

        let settings = config.dedup_settings().unwrap();
        assert_eq!(settings.header_name.as_str(), "idempotency-key");
        assert_eq!(
            settings.missing_message,
            "header value Idempotency-Key can't be empty"
        );
    }

    #[test]
    fn test_dedup_settings_keep_custom_messages() {
        let config = Config {
            missing_message: Some("token please".to_string()),
            overlap_message: "slow down".to_string(),
            pass_on_missing: true,
            ..Config::default()
        };

        let settings = config.dedup_settings().unwrap();
        assert_eq!(settings.missing_message, "token please");
        assert_eq!(settings.overlap_message, "slow down");
        assert!(settings.pass_on_missing);
    }

    #[test]
    fn test_build_store_matches_backend() {
        assert_eq!(Config::default().build_store().backend(), "memory");

        let config = Config {
            backend: BackendKind::Redis,
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            ..Config::default()
        };
        assert_eq!(config.build_store().backend(), "redis");
    }

    #[test]
    fn test_store_environment() {
        let env = Config::default().store_environment().unwrap();
        assert!(env.redis(DEFAULT_REDIS_RESOURCE).is_none());

        let config = Config {
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            ..Config::default()
        };
        let env = config.store_environment().unwrap();
        assert!(env.redis(DEFAULT_REDIS_RESOURCE).is_some());

        let config = Config {
            redis_url: Some("not a url".to_string()),
            ..Config::default()
        };
        assert!(config.store_environment().is_err());
    }
}
