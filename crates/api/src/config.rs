//! Application configuration

use std::env;
use std::time::Duration;

use supportdesk_shared::{GroupId, Region};

/// Region table used when `REGION_GROUPS` is not set
pub const DEFAULT_REGION_GROUPS: &str = "asia-pacific=1,europe-zone-1=2,europe-zone-2=3,north-america=4,latin-america=5,middle-east-africa=6";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database (absent: in-memory store)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,

    // Ticketing backend (absent: in-memory backend)
    pub ticketing_url: Option<String>,
    pub ticketing_token: Option<String>,
    pub ticketing_timeout_ms: u64,

    // Routing
    pub regions: Vec<Region>,
    pub alert_webhook_url: Option<String>,

    // Live streams
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub stream_buffer: usize,
    pub dedup_window: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let heartbeat_secs: u64 = parse_var("HEARTBEAT_INTERVAL_SECS", 15)?;
        let idle_secs: u64 = parse_var("IDLE_TIMEOUT_SECS", 300)?;
        if heartbeat_secs == 0 || idle_secs == 0 {
            return Err(ConfigError::Invalid(
                "HEARTBEAT_INTERVAL_SECS and IDLE_TIMEOUT_SECS must be positive".to_string(),
            ));
        }

        let ticketing_url = env::var("TICKETING_URL")
            .ok()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        let ticketing_token = match &ticketing_url {
            Some(_) => Some(env::var("TICKETING_TOKEN").map_err(|_| ConfigError::Missing("TICKETING_TOKEN"))?),
            None => None,
        };

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,

            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            ticketing_url,
            ticketing_token,
            ticketing_timeout_ms: parse_var("TICKETING_TIMEOUT_MS", 10_000)?,

            regions: parse_region_groups(
                &env::var("REGION_GROUPS").unwrap_or_else(|_| DEFAULT_REGION_GROUPS.to_string()),
            )?,
            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok().filter(|url| !url.is_empty()),

            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            idle_timeout: Duration::from_secs(idle_secs),
            stream_buffer: parse_var("STREAM_BUFFER", 64)?,
            dedup_window: Duration::from_secs(parse_var("DEDUP_WINDOW_SECS", 60)?),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a `code=group_id` comma list. Bijection checks happen when the
/// region directory is built.
pub fn parse_region_groups(raw: &str) -> Result<Vec<Region>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (code, group) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::Invalid(format!("REGION_GROUPS entry '{entry}' is not code=id")))?;
            let group_id: i64 = group
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("REGION_GROUPS entry '{entry}' has a non-numeric group id")))?;
            Ok(Region {
                code: code.trim().to_string(),
                backend_group_id: GroupId(group_id),
            })
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required() {
        env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");
        env::set_var("TICKETING_URL", "https://desk.example.com/");
        env::set_var("TICKETING_TOKEN", "token");
    }

    fn clear_all() {
        for name in [
            "JWT_SECRET",
            "TICKETING_URL",
            "TICKETING_TOKEN",
            "REGION_GROUPS",
            "DATABASE_URL",
            "IDLE_TIMEOUT_SECS",
            "HEARTBEAT_INTERVAL_SECS",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial(config_env)]
    fn test_defaults() {
        clear_all();
        set_required();

        let config = Config::from_env().unwrap();
        assert_eq!(config.ticketing_url.as_deref(), Some("https://desk.example.com"));
        assert_eq!(config.ticketing_token.as_deref(), Some("token"));
        assert!(config.database_url.is_none());
        assert_eq!(config.regions.len(), 6);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        clear_all();
    }

    #[test]
    #[serial(config_env)]
    fn test_ticketing_is_optional_but_needs_token() {
        clear_all();
        env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");

        let config = Config::from_env().unwrap();
        assert!(config.ticketing_url.is_none());
        assert!(config.ticketing_token.is_none());

        env::set_var("TICKETING_URL", "https://desk.example.com");
        assert!(matches!(Config::from_env(), Err(ConfigError::Missing("TICKETING_TOKEN"))));
        clear_all();
    }

    #[test]
    #[serial(config_env)]
    fn test_weak_jwt_secret_rejected() {
        clear_all();
        set_required();
        env::set_var("JWT_SECRET", "short");

        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret(_))));
        clear_all();
    }

    #[test]
    #[serial(config_env)]
    fn test_invalid_number_rejected() {
        clear_all();
        set_required();
        env::set_var("IDLE_TIMEOUT_SECS", "soon");

        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));
        clear_all();
    }

    #[test]
    fn test_parse_region_groups() {
        let regions = parse_region_groups(" asia-pacific=4 , europe-zone-1=7,").unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].code, "asia-pacific");
        assert_eq!(regions[1].backend_group_id, GroupId(7));

        assert!(parse_region_groups("asia-pacific").is_err());
        assert!(parse_region_groups("asia-pacific=x").is_err());
    }
}
