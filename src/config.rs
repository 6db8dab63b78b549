//! Application configuration parsed from environment variables.
//!
//! `main` loads an optional `.env` via `dotenvy` first, so everything here
//! reads plain process environment.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OAUTH_PROVIDER: &str = "google";
pub const DEFAULT_SUPABASE_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 300;
pub const DEFAULT_ERROR_REDIRECT_SECS: u64 = 3;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_WS_TICKET_TTL_SECS: u64 = 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    /// Base URL without trailing slash, e.g. `https://abc.supabase.co`.
    pub url: String,
    pub anon_key: String,
    pub timeout: Duration,
    pub realtime_enabled: bool,
}

/// Tuning for the OAuth callback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackConfig {
    /// Upper bound on session readiness polls.
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    /// How long the error page waits before sending the user home.
    pub error_redirect_secs: u64,
}

impl CallbackConfig {
    /// Read the `CALLBACK_*` variables. A poll bound of 0 means a single poll.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let poll_attempts = env_parse_strict("CALLBACK_SESSION_POLL_ATTEMPTS", DEFAULT_POLL_ATTEMPTS)?;
        Ok(Self {
            poll_attempts: poll_attempts.max(1),
            poll_interval: Duration::from_millis(env_parse_strict(
                "CALLBACK_SESSION_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )?),
            error_redirect_secs: env_parse_strict("CALLBACK_ERROR_REDIRECT_SECS", DEFAULT_ERROR_REDIRECT_SECS)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// External origin of this server, without trailing slash.
    pub public_url: String,
    pub oauth_provider: String,
    pub cookie_secure: bool,
    pub supabase: SupabaseConfig,
    pub callback: CallbackConfig,
    pub session_ttl: Duration,
    pub ws_ticket_ttl: Duration,
    pub static_dir: PathBuf,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// Required: `SUPABASE_URL`, `SUPABASE_ANON_KEY`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env_parse_strict("PORT", DEFAULT_PORT)?;

        let supabase_url = env_required("SUPABASE_URL")?;
        url::Url::parse(&supabase_url)
            .map_err(|_| ConfigError::Invalid { key: "SUPABASE_URL", value: supabase_url.clone() })?;
        let anon_key = env_required("SUPABASE_ANON_KEY")?;

        let public_url = std::env::var("PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();
        let cookie_secure = env_bool("COOKIE_SECURE").unwrap_or_else(|| public_url.starts_with("https://"));

        let supabase = SupabaseConfig {
            url: supabase_url.trim_end_matches('/').to_string(),
            anon_key,
            timeout: Duration::from_secs(env_parse_strict("SUPABASE_TIMEOUT_SECS", DEFAULT_SUPABASE_TIMEOUT_SECS)?),
            realtime_enabled: env_bool("REALTIME_ENABLED").unwrap_or(true),
        };

        let callback = CallbackConfig::from_env()?;

        Ok(Self {
            port,
            public_url,
            oauth_provider: std::env::var("OAUTH_PROVIDER").unwrap_or_else(|_| DEFAULT_OAUTH_PROVIDER.to_string()),
            cookie_secure,
            supabase,
            callback,
            session_ttl: Duration::from_secs(env_parse_strict("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?),
            ws_ticket_ttl: Duration::from_secs(env_parse_strict("WS_TICKET_TTL_SECS", DEFAULT_WS_TICKET_TTL_SECS)?),
            static_dir: static_dir(),
        })
    }

    /// Absolute URL the provider redirects back to after sign-in.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.public_url)
    }
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| parse_bool(&raw))
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_required(key: &'static str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing(key)),
    }
}

/// Parse `key` if set; a present-but-malformed value is an error.
fn env_parse_strict<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn static_dir() -> PathBuf {
    std::env::var("STATIC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("static"))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
