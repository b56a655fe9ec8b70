//! Configuration for the voice session manager, loaded from the environment.

use std::time::Duration;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Tunables for the connection lifecycle.
///
/// `Default` carries the production constants; `from_env` overrides them from
/// `VOICELINK_*` environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// Feature-flag gate. When false, `start` fails before any network call.
    pub enabled: bool,
    /// Endpoint that issues signed URLs.
    pub credential_url: String,
    /// Endpoint that routes asynchronous pushes to a registered session.
    pub registration_url: String,
    /// Upper bound on a single transport handshake.
    pub connect_timeout: Duration,
    /// How often a liveness probe is sent while connected.
    pub heartbeat_interval: Duration,
    /// How long an unacknowledged probe may stay outstanding.
    pub heartbeat_timeout: Duration,
    /// How far before credential expiry the background renewal fires.
    pub renewal_lead: Duration,
    /// Total credential fetch attempts (initial call plus retries).
    pub credential_attempts: u32,
    /// Delay before the first credential retry; doubles on each retry.
    pub credential_retry_delay: Duration,
    /// First reconnect backoff delay.
    pub backoff_base: Duration,
    /// Ceiling on the reconnect backoff delay.
    pub backoff_cap: Duration,
    /// Jitter applied to each backoff delay, as a fraction of the delay.
    pub backoff_jitter: f64,
    /// Reconnect attempts allowed before the session lands in Error.
    pub max_reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            credential_url: String::new(),
            registration_url: String::new(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            renewal_lead: Duration::from_secs(5 * 60),
            credential_attempts: 4,
            credential_retry_delay: Duration::from_secs(1),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            backoff_jitter: 0.3,
            max_reconnect_attempts: 5,
        }
    }
}

fn duration_ms_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let defaults = Self::default();

        let enabled = match std::env::var("VOICELINK_ENABLED") {
            Ok(raw) => raw
                .parse::<bool>()
                .map_err(|_| ConfigError::InvalidValue("VOICELINK_ENABLED".to_string(), raw))?,
            Err(_) => defaults.enabled,
        };

        let credential_url = std::env::var("VOICELINK_CREDENTIAL_URL")
            .map_err(|_| ConfigError::MissingVar("VOICELINK_CREDENTIAL_URL".to_string()))?;
        let registration_url = std::env::var("VOICELINK_REGISTRATION_URL")
            .map_err(|_| ConfigError::MissingVar("VOICELINK_REGISTRATION_URL".to_string()))?;

        let max_reconnect_attempts = match std::env::var("VOICELINK_MAX_RECONNECT_ATTEMPTS") {
            Ok(raw) => raw.parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue("VOICELINK_MAX_RECONNECT_ATTEMPTS".to_string(), raw)
            })?,
            Err(_) => defaults.max_reconnect_attempts,
        };

        let credential_attempts = match std::env::var("VOICELINK_CREDENTIAL_ATTEMPTS") {
            Ok(raw) => raw.parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue("VOICELINK_CREDENTIAL_ATTEMPTS".to_string(), raw)
            })?,
            Err(_) => defaults.credential_attempts,
        };

        let backoff_jitter = match std::env::var("VOICELINK_BACKOFF_JITTER") {
            Ok(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|j| (0.0..=1.0).contains(j))
                .ok_or_else(|| {
                    ConfigError::InvalidValue("VOICELINK_BACKOFF_JITTER".to_string(), raw)
                })?,
            Err(_) => defaults.backoff_jitter,
        };

        Ok(Self {
            enabled,
            credential_url,
            registration_url,
            connect_timeout: duration_ms_var("VOICELINK_CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
            heartbeat_interval: duration_ms_var(
                "VOICELINK_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            )?,
            heartbeat_timeout: duration_ms_var(
                "VOICELINK_HEARTBEAT_TIMEOUT_MS",
                defaults.heartbeat_timeout,
            )?,
            renewal_lead: duration_ms_var("VOICELINK_RENEWAL_LEAD_MS", defaults.renewal_lead)?,
            credential_attempts,
            credential_retry_delay: duration_ms_var(
                "VOICELINK_CREDENTIAL_RETRY_DELAY_MS",
                defaults.credential_retry_delay,
            )?,
            backoff_base: duration_ms_var("VOICELINK_BACKOFF_BASE_MS", defaults.backoff_base)?,
            backoff_cap: duration_ms_var("VOICELINK_BACKOFF_MAX_MS", defaults.backoff_cap)?,
            backoff_jitter,
            max_reconnect_attempts,
        })
    }
}
