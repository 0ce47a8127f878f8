//! Client Configuration Settings
//!
//! Configuration types for the streaming client, loaded from environment
//! variables.

use std::collections::HashSet;
use std::time::Duration;

use crate::application::services::SessionSettings;
use crate::domain::session::DEFAULT_SESSION_TTL;

/// Brokerage environment (sandbox vs live).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Sandbox environment (delayed data, simulated orders).
    #[default]
    Sandbox,
    /// Live environment (real money).
    Live,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "LIVE" | "PRODUCTION" => Self::Live,
            _ => Self::Sandbox,
        }
    }

    /// Check if this is the live environment.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Live => "live",
        }
    }

    /// REST API base URL for this environment.
    #[must_use]
    pub const fn api_base_url(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.tradier.com",
            Self::Live => "https://api.tradier.com",
        }
    }
}

/// API credentials.
#[derive(Clone)]
pub struct Credentials {
    access_token: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(access_token: String) -> Self {
        Self { access_token }
    }

    /// Get the access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Token bucket capacity (burst size).
    pub rate_limit_burst: u32,
    /// Token bucket refill rate in requests per second.
    pub rate_limit_per_second: f64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            rate_limit_burst: 10,
            rate_limit_per_second: 2.0,
        }
    }
}

/// Streaming behaviour consumed by the supervisor and heartbeat monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingConfig {
    /// Whether the embedding application should reconnect on drop.
    pub auto_reconnect: bool,
    /// Delay between `disconnect` and `connect` in `reconnect`, and the
    /// initial backoff of the reconnect policy.
    pub reconnect_delay: Duration,
    /// Reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Interval between heartbeat frames.
    pub heartbeat_interval: Duration,
    /// Drop a message identical to the previous one for the same kind and
    /// symbol.
    pub filter_duplicates: bool,
    /// Default exchange allow-list when no explicit exchange filter is set.
    pub valid_exchanges: HashSet<String>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
            filter_duplicates: false,
            valid_exchanges: HashSet::new(),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Brokerage environment.
    pub environment: Environment,
    /// REST API base URL (environment default unless overridden).
    pub api_base_url: String,
    /// API credentials.
    pub credentials: Credentials,
    /// HTTP transport settings.
    pub http: HttpSettings,
    /// Streaming settings.
    pub streaming: StreamingConfig,
    /// Session settings.
    pub session: SessionSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl ClientConfig {
    /// Configuration with defaults for `environment`.
    #[must_use]
    pub fn new(environment: Environment, credentials: Credentials) -> Self {
        Self {
            environment,
            api_base_url: environment.api_base_url().to_string(),
            credentials,
            http: HttpSettings::default(),
            streaming: StreamingConfig::default(),
            session: SessionSettings::default(),
            metrics_port: 0,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let access_token = std::env::var("TRADIER_ACCESS_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TRADIER_ACCESS_TOKEN".to_string()))?;

        if access_token.is_empty() {
            return Err(ConfigError::EmptyValue("TRADIER_ACCESS_TOKEN".to_string()));
        }

        let environment = std::env::var("TRADIER_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let api_base_url = std::env::var("TRADIER_API_BASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| environment.api_base_url().to_string());

        let http_defaults = HttpSettings::default();
        let http = HttpSettings {
            timeout: parse_env_duration_secs("TRADIER_HTTP_TIMEOUT_SECS", http_defaults.timeout),
            max_retries: parse_env_u32("TRADIER_HTTP_MAX_RETRIES", http_defaults.max_retries),
            initial_backoff: parse_env_duration_millis(
                "TRADIER_HTTP_INITIAL_BACKOFF_MS",
                http_defaults.initial_backoff,
            ),
            max_backoff: parse_env_duration_millis(
                "TRADIER_HTTP_MAX_BACKOFF_MS",
                http_defaults.max_backoff,
            ),
            rate_limit_burst: parse_env_u32(
                "TRADIER_HTTP_RATE_LIMIT_BURST",
                http_defaults.rate_limit_burst,
            ),
            rate_limit_per_second: parse_env_f64(
                "TRADIER_HTTP_RATE_LIMIT_PER_SECOND",
                http_defaults.rate_limit_per_second,
            ),
        };

        let stream_defaults = StreamingConfig::default();
        let streaming = StreamingConfig {
            auto_reconnect: parse_env_bool(
                "TRADIER_STREAM_AUTO_RECONNECT",
                stream_defaults.auto_reconnect,
            ),
            reconnect_delay: parse_env_duration_millis(
                "TRADIER_STREAM_RECONNECT_DELAY_MS",
                stream_defaults.reconnect_delay,
            ),
            max_reconnect_attempts: parse_env_u32(
                "TRADIER_STREAM_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            ),
            heartbeat_interval: parse_env_duration_millis(
                "TRADIER_STREAM_HEARTBEAT_INTERVAL_MS",
                stream_defaults.heartbeat_interval,
            ),
            filter_duplicates: parse_env_bool(
                "TRADIER_STREAM_FILTER_DUPLICATES",
                stream_defaults.filter_duplicates,
            ),
            valid_exchanges: std::env::var("TRADIER_STREAM_VALID_EXCHANGES")
                .map(|v| parse_list(&v).into_iter().collect())
                .unwrap_or_default(),
        };

        let session_defaults = SessionSettings::default();
        let session = SessionSettings {
            ttl: parse_env_duration_secs("TRADIER_SESSION_TTL_SECS", DEFAULT_SESSION_TTL),
            renew_margin: parse_env_duration_secs(
                "TRADIER_SESSION_RENEW_MARGIN_SECS",
                session_defaults.renew_margin,
            ),
        };

        Ok(Self {
            environment,
            api_base_url,
            credentials: Credentials::new(access_token),
            http,
            streaming,
            session,
            metrics_port: parse_env_u16("TRADIER_METRICS_PORT", 0),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Split a comma-separated list, trimming and dropping empty entries.
#[must_use]
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("live", Environment::Live)]
    #[test_case("LIVE", Environment::Live)]
    #[test_case("production", Environment::Live)]
    #[test_case("sandbox", Environment::Sandbox)]
    #[test_case("unknown", Environment::Sandbox)]
    fn environment_parsing(input: &str, expected: Environment) {
        assert_eq!(Environment::from_str_case_insensitive(input), expected);
    }

    #[test]
    fn environment_base_urls() {
        assert_eq!(
            Environment::Sandbox.api_base_url(),
            "https://sandbox.tradier.com"
        );
        assert_eq!(Environment::Live.api_base_url(), "https://api.tradier.com");
        assert!(Environment::Live.is_live());
        assert!(!Environment::Sandbox.is_live());
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("token123".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("token123"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(creds.access_token(), "token123");
    }

    #[test]
    fn streaming_config_defaults() {
        let config = StreamingConfig::default();
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(!config.filter_duplicates);
        assert!(config.valid_exchanges.is_empty());
    }

    #[test]
    fn client_config_uses_environment_base_url() {
        let config = ClientConfig::new(Environment::Live, Credentials::new("t".to_string()));
        assert_eq!(config.api_base_url, "https://api.tradier.com");
        assert_eq!(config.session.ttl, DEFAULT_SESSION_TTL);
        assert_eq!(config.metrics_port, 0);
    }

    #[test]
    fn list_parsing() {
        assert_eq!(parse_list("AAPL, MSFT,,SPY "), vec!["AAPL", "MSFT", "SPY"]);
        assert!(parse_list("").is_empty());
    }
}
