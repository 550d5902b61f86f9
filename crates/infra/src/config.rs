//! Runtime configuration loaded from the environment.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("{0} is required")]
    Missing(&'static str),
}

/// Fixed-window limit: `max` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max: u32,
    pub window: Duration,
}

/// Notification rendering and channel selection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub progress_milestones: Vec<u8>,
    pub milestone_margin: u8,
    pub send_email_notifications: bool,
    pub push_on_high_progress: bool,
    pub email_with_results: bool,
    pub expiration_warning_window: chrono::Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            progress_milestones: vec![25, 50, 75, 90],
            milestone_margin: 2,
            send_email_notifications: true,
            push_on_high_progress: true,
            email_with_results: true,
            expiration_warning_window: chrono::Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub worker_api_key: Option<String>,
    pub csrf_secret: String,
    pub csrf_token_ttl: chrono::Duration,
    pub url_signing_secret: String,
    pub download_url_ttl: chrono::Duration,
    pub process_token_ttl: chrono::Duration,
    pub status_rate_limit: RateLimitConfig,
    pub notify_rate_limit: RateLimitConfig,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub dispatcher: DispatcherConfig,
}

impl Default for AppConfig {
    /// Development defaults; the same values `from_env` falls back to.
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            jwt_secret: "dev-secret".to_string(),
            worker_api_key: None,
            csrf_secret: "dev-csrf-secret".to_string(),
            csrf_token_ttl: chrono::Duration::seconds(3600),
            url_signing_secret: "dev-url-secret".to_string(),
            download_url_ttl: chrono::Duration::seconds(900),
            process_token_ttl: chrono::Duration::hours(72),
            status_rate_limit: RateLimitConfig {
                max: 10,
                window: Duration::from_secs(60),
            },
            notify_rate_limit: RateLimitConfig {
                max: 30,
                window: Duration::from_secs(60),
            },
            use_persistent_stores: false,
            database_url: None,
            redis_url: None,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get("BIND_ADDR").unwrap_or(defaults.bind_addr);

        let jwt_secret = secret_or_default(get("JWT_SECRET"), "JWT_SECRET", defaults.jwt_secret);
        let csrf_secret = secret_or_default(get("CSRF_SECRET"), "CSRF_SECRET", defaults.csrf_secret);
        let url_signing_secret = secret_or_default(
            get("URL_SIGNING_SECRET"),
            "URL_SIGNING_SECRET",
            defaults.url_signing_secret,
        );

        let worker_api_key = get("ASYNC_NOTIFICATIONS_API_KEY");
        if worker_api_key.is_none() {
            warn!("ASYNC_NOTIFICATIONS_API_KEY not set; worker callbacks require a user session");
        }

        let csrf_ttl = parse_u64(&get, "CSRF_TOKEN_TTL_SECS", 3600)?;
        let download_ttl = parse_u64(&get, "DOWNLOAD_URL_TTL_SECS", 900)?;
        let token_ttl_hours = parse_u64(&get, "PROCESS_TOKEN_TTL_HOURS", 72)?;

        let status_rate_limit = RateLimitConfig {
            max: parse_u64(&get, "STATUS_RATE_LIMIT", 10)? as u32,
            window: Duration::from_secs(parse_u64(&get, "STATUS_RATE_WINDOW_SECS", 60)?),
        };
        let notify_rate_limit = RateLimitConfig {
            max: parse_u64(&get, "NOTIFY_RATE_LIMIT", 30)? as u32,
            window: Duration::from_secs(parse_u64(&get, "NOTIFY_RATE_WINDOW_SECS", 60)?),
        };

        let use_persistent_stores = match get("USE_PERSISTENT_STORES") {
            None => false,
            Some(v) => parse_bool(&v).ok_or(ConfigError::Invalid {
                key: "USE_PERSISTENT_STORES",
                value: v,
            })?,
        };
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            bind_addr,
            jwt_secret,
            worker_api_key,
            csrf_secret,
            csrf_token_ttl: chrono::Duration::seconds(csrf_ttl as i64),
            url_signing_secret,
            download_url_ttl: chrono::Duration::seconds(download_ttl as i64),
            process_token_ttl: chrono::Duration::hours(token_ttl_hours as i64),
            status_rate_limit,
            notify_rate_limit,
            use_persistent_stores,
            database_url,
            redis_url: get("REDIS_URL"),
            dispatcher: DispatcherConfig::default(),
        })
    }
}

fn secret_or_default(value: Option<String>, key: &'static str, default: String) -> String {
    match value {
        Some(v) => v,
        None => {
            warn!(key, "secret not set; using insecure development default");
            default
        }
    }
}

fn parse_u64(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(v) => v.parse::<u64>().map_err(|_| ConfigError::Invalid { key, value: v }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.status_rate_limit.max, 10);
        assert_eq!(cfg.status_rate_limit.window, Duration::from_secs(60));
        assert_eq!(cfg.notify_rate_limit.max, 30);
        assert_eq!(cfg.process_token_ttl, chrono::Duration::hours(72));
        assert!(cfg.worker_api_key.is_none());
        assert!(!cfg.use_persistent_stores);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = load(&[("STATUS_RATE_LIMIT", "ten")]).unwrap_err();
        match err {
            ConfigError::Invalid { key, value } if key == "STATUS_RATE_LIMIT" && value == "ten" => {}
            _ => panic!("Expected Invalid for non-numeric limit"),
        }
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        assert_eq!(
            load(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        let cfg = load(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/printforge"),
        ])
        .unwrap();
        assert!(cfg.use_persistent_stores);
    }

    #[test]
    fn dispatcher_defaults() {
        let cfg = DispatcherConfig::default();
        assert_eq!(cfg.progress_milestones, vec![25, 50, 75, 90]);
        assert_eq!(cfg.milestone_margin, 2);
        assert_eq!(cfg.expiration_warning_window, chrono::Duration::hours(24));
    }
}
