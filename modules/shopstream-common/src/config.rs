use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Which implementation backs the log, the aggregate store, or the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Memory,
}

/// What the dispatcher does with a message whose handler failed permanently
/// (malformed or invalid payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Leave the offset uncommitted. A restart redelivers the message unless
    /// a later message on the same partition was committed first.
    #[default]
    Redeliver,
    /// Log at error level and commit past the message.
    Skip,
}

/// A deployed service role. Each role owns a port and, for consumers,
/// a consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Users,
    Products,
    Recommendations,
    Analytics,
}

impl Role {
    pub fn default_port(self) -> u16 {
        match self {
            Role::Users => 8080,
            Role::Products => 8081,
            Role::Recommendations => 8082,
            Role::Analytics => 8083,
        }
    }

    pub fn consumer_group(self) -> Option<&'static str> {
        match self {
            Role::Recommendations => Some("recommendation_service"),
            Role::Analytics => Some("analytics_service"),
            Role::Users | Role::Products => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Users => "users",
            Role::Products => "products",
            Role::Recommendations => "recommendations",
            Role::Analytics => "analytics",
        }
    }
}

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub backend: Backend,
    pub cache_backend: Backend,

    pub web_host: String,
    /// Overrides the per-role default port when set.
    pub web_port: Option<u16>,

    pub poll_timeout: Duration,
    pub publish_timeout: Duration,
    pub flush_timeout: Duration,
    pub cache_ttl: Duration,
    /// How often expired cache entries are swept out.
    pub cache_sweep_interval: Duration,
    pub failure_policy: FailurePolicy,

    /// HMAC secret for user tokens. Unset means a per-process secret, so
    /// tokens do not survive a restart.
    pub jwt_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. `from_env` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let database_url = match lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            Some(url) => url,
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                var("POSTGRES_USER", "postgres"),
                var("POSTGRES_PASSWORD", "1"),
                var("POSTGRES_HOST", "localhost"),
                var("POSTGRES_PORT", "5432"),
                var("POSTGRES_DB", "postgres"),
            ),
        };

        let web_port = match lookup("WEB_PORT").filter(|v| !v.is_empty()) {
            Some(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid {
                key: "WEB_PORT",
                expected: "a port number",
                value: raw.clone(),
            })?),
            None => None,
        };

        Ok(Self {
            database_url,
            backend: parse_backend("BACKEND", &var("BACKEND", "postgres"))?,
            cache_backend: parse_backend("CACHE_BACKEND", &var("CACHE_BACKEND", "memory"))?,
            web_host: var("WEB_HOST", "0.0.0.0"),
            web_port,
            poll_timeout: parse_millis(
                "CONSUMER_POLL_TIMEOUT_MS",
                &var("CONSUMER_POLL_TIMEOUT_MS", "1000"),
            )?,
            publish_timeout: parse_millis(
                "PUBLISH_TIMEOUT_MS",
                &var("PUBLISH_TIMEOUT_MS", "10000"),
            )?,
            flush_timeout: parse_millis("FLUSH_TIMEOUT_MS", &var("FLUSH_TIMEOUT_MS", "5000"))?,
            cache_ttl: Duration::from_secs(parse_u64(
                "CACHE_TTL_SECS",
                &var("CACHE_TTL_SECS", "60"),
            )?),
            cache_sweep_interval: Duration::from_secs(
                parse_u64("CACHE_SWEEP_INTERVAL_SECS", &var("CACHE_SWEEP_INTERVAL_SECS", "60"))?
                    .max(1),
            ),
            failure_policy: parse_policy(&var("FAILURE_POLICY", "redeliver"))?,
            jwt_secret: lookup("JWT_SECRET").filter(|v| !v.is_empty()),
        })
    }

    pub fn port_for(&self, role: Role) -> u16 {
        self.web_port.unwrap_or_else(|| role.default_port())
    }

    pub fn log_redacted(&self) {
        let url = match self.database_url.split_once('@') {
            Some((_, host)) => format!("postgres://***@{host}"),
            None => "<unparsed>".to_string(),
        };
        tracing::info!(
            database = %url,
            backend = ?self.backend,
            cache_backend = ?self.cache_backend,
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            publish_timeout_ms = self.publish_timeout.as_millis() as u64,
            flush_timeout_ms = self.flush_timeout.as_millis() as u64,
            cache_ttl_secs = self.cache_ttl.as_secs(),
            cache_sweep_interval_secs = self.cache_sweep_interval.as_secs(),
            failure_policy = ?self.failure_policy,
            jwt_secret = if self.jwt_secret.is_some() { "set" } else { "unset" },
            "Config loaded"
        );
    }
}

fn parse_backend(key: &'static str, raw: &str) -> Result<Backend, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "postgres" | "pg" => Ok(Backend::Postgres),
        "memory" => Ok(Backend::Memory),
        _ => Err(ConfigError::Invalid {
            key,
            expected: "'postgres' or 'memory'",
            value: raw.to_string(),
        }),
    }
}

fn parse_policy(raw: &str) -> Result<FailurePolicy, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "redeliver" => Ok(FailurePolicy::Redeliver),
        "skip" => Ok(FailurePolicy::Skip),
        _ => Err(ConfigError::Invalid {
            key: "FAILURE_POLICY",
            expected: "'redeliver' or 'skip'",
            value: raw.to_string(),
        }),
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        key,
        expected: "a non-negative integer",
        value: raw.to_string(),
    })
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse_u64(key, raw).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_per_role() {
        let config = config_from(&[]).unwrap();
        assert_eq!(
            config.database_url,
            "postgres://postgres:1@localhost:5432/postgres"
        );
        assert_eq!(config.backend, Backend::Postgres);
        assert_eq!(config.cache_backend, Backend::Memory);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.flush_timeout, Duration::from_millis(5000));
        assert_eq!(config.failure_policy, FailurePolicy::Redeliver);
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(60));
        assert_eq!(config.jwt_secret, None);
        assert_eq!(config.port_for(Role::Users), 8080);
        assert_eq!(config.port_for(Role::Analytics), 8083);
    }

    #[test]
    fn database_url_wins_over_parts() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://app@db/shop"),
            ("POSTGRES_HOST", "ignored"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "postgres://app@db/shop");
    }

    #[test]
    fn web_port_overrides_role_default() {
        let config = config_from(&[("WEB_PORT", "9000")]).unwrap();
        assert_eq!(config.port_for(Role::Recommendations), 9000);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config_from(&[("BACKEND", "kafka")]).is_err());
        assert!(config_from(&[("FAILURE_POLICY", "drop")]).is_err());
        assert!(config_from(&[("CACHE_TTL_SECS", "-1")]).is_err());
        assert!(config_from(&[("WEB_PORT", "http")]).is_err());
    }

    #[test]
    fn sweep_interval_is_at_least_a_second() {
        let config = config_from(&[("CACHE_SWEEP_INTERVAL_SECS", "0")]).unwrap();
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn skip_policy_parses() {
        let config = config_from(&[("FAILURE_POLICY", "Skip"), ("BACKEND", "memory")]).unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Skip);
        assert_eq!(config.backend, Backend::Memory);
    }
}
