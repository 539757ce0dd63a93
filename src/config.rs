//! Application configuration loaded from environment variables.
//!
//! `main` calls `dotenv::dotenv()` first, so a local `.env` file is honoured.
//! Required keys are `DATABASE_URL`, `JWT_SECRET` and `JWT_REFRESH_SECRET`;
//! everything else has a default.

use chrono::Duration;
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Raised when a required variable is missing or a value cannot be parsed.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} must be set", key),
            ConfigError::Invalid { key, value } => {
                write!(f, "{} has an invalid value: {:?}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Secrets and lifetimes for the access/refresh token pair.
#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub access_secret: String,
    pub access_ttl: Duration,
    pub refresh_secret: String,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub server_port: u16,
    pub server_host: String,
    pub jwt: JwtSettings,
    /// Public base URL used when building upload URLs.
    pub app_url: String,
    /// Base URL of the web client, used for links in outgoing mail.
    pub frontend_url: String,
    pub upload_dir: PathBuf,
    pub mail_from: String,
    /// Additional entries for the common-password list.
    pub extra_common_passwords: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let optional = |key: &'static str, default: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let duration = |key: &'static str, default: &str| {
            let value = optional(key, default);
            parse_duration(&value).ok_or(ConfigError::Invalid { key, value })
        };

        let server_port: u16 = {
            let value = optional("SERVER_PORT", "8080");
            value
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "SERVER_PORT", value })?
        };
        let database_max_connections: u32 = {
            let value = optional("DATABASE_MAX_CONNECTIONS", "10");
            value.parse().map_err(|_| ConfigError::Invalid {
                key: "DATABASE_MAX_CONNECTIONS",
                value,
            })?
        };

        let extra_common_passwords = optional("PASSWORD_EXTRA_COMMON", "")
            .split(',')
            .map(|entry| entry.trim().to_lowercase())
            .filter(|entry| !entry.is_empty())
            .collect();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections,
            server_port,
            server_host: optional("SERVER_HOST", "127.0.0.1"),
            jwt: JwtSettings {
                access_secret: required("JWT_SECRET")?,
                access_ttl: duration("JWT_EXPIRES_IN", "7d")?,
                refresh_secret: required("JWT_REFRESH_SECRET")?,
                refresh_ttl: duration("JWT_REFRESH_EXPIRES_IN", "30d")?,
            },
            app_url: optional("APP_URL", "http://localhost:8080")
                .trim_end_matches('/')
                .to_string(),
            frontend_url: optional("FRONTEND_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            upload_dir: PathBuf::from(optional("UPLOAD_DIR", "uploads")),
            mail_from: optional("MAIL_FROM", "no-reply@quillpost.local"),
            extra_common_passwords,
        })
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }
}

/// Parses lifetimes such as `7d`, `12h`, `30m`, `45s` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], c),
        Some(_) => (value, 's'),
        None => return None,
    };
    let amount: i64 = digits.parse().ok()?;
    if amount <= 0 {
        return None;
    }
    match unit {
        'd' => Some(Duration::days(amount)),
        'h' => Some(Duration::hours(amount)),
        'm' => Some(Duration::minutes(amount)),
        's' => Some(Duration::seconds(amount)),
        _ => None,
    }
}
