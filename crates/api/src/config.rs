//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use engine::EngineConfig;

/// Output format of the `fmt` tracing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables (a `.env` file is loaded first by the
/// binary):
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `3000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL` Postgres connection string; unset runs in memory
/// - `DATABASE_MAX_CONNECTIONS` pool size (default: `10`)
/// - `PUBLIC_BASE_URL` base of certificate verification links
/// - `UPI_ID` payee handle shown with new payments
/// - `RENDER_TIMEOUT_SECS`, `RENDER_MAX_ATTEMPTS`, `SWEEP_INTERVAL_SECS`,
///   `COMMAND_RETRY_LIMIT` engine tuning
/// - `SEED_FILE` JSON file with courses and students to load at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub public_base_url: String,
    pub upi_id: String,
    pub render_timeout_secs: u64,
    pub render_max_attempts: u32,
    pub sweep_interval_secs: u64,
    pub command_retry_limit: u32,
    pub seed_file: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. Unparseable values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: parse_or(non_empty("PORT"), defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_or(non_empty("LOG_FORMAT"), defaults.log_format),
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parse_or(
                non_empty("DATABASE_MAX_CONNECTIONS"),
                defaults.database_max_connections,
            ),
            public_base_url: non_empty("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
            upi_id: non_empty("UPI_ID").unwrap_or(defaults.upi_id),
            render_timeout_secs: parse_or(
                non_empty("RENDER_TIMEOUT_SECS"),
                defaults.render_timeout_secs,
            ),
            render_max_attempts: parse_or(
                non_empty("RENDER_MAX_ATTEMPTS"),
                defaults.render_max_attempts,
            ),
            sweep_interval_secs: parse_or(
                non_empty("SWEEP_INTERVAL_SECS"),
                defaults.sweep_interval_secs,
            ),
            command_retry_limit: parse_or(
                non_empty("COMMAND_RETRY_LIMIT"),
                defaults.command_retry_limit,
            ),
            seed_file: non_empty("SEED_FILE").map(PathBuf::from),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            public_base_url: self.public_base_url.clone(),
            upi_id: self.upi_id.clone(),
            render_timeout: Duration::from_secs(self.render_timeout_secs),
            render_max_attempts: self.render_max_attempts.max(1),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            command_retry_limit: self.command_retry_limit.max(1),
            ..EngineConfig::default()
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            public_base_url: engine.public_base_url,
            upi_id: engine.upi_id,
            render_timeout_secs: engine.render_timeout.as_secs(),
            render_max_attempts: engine.render_max_attempts,
            sweep_interval_secs: engine.sweep_interval.as_secs(),
            command_retry_limit: engine.command_retry_limit,
            seed_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert_eq!(config.render_timeout_secs, 10);
        assert_eq!(config.render_max_attempts, 5);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.command_retry_limit, 8);
        assert_eq!(config.public_base_url, "http://localhost:5173");
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_addr_default() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3000");
    }

    #[test]
    fn reads_overrides_from_lookup() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/enrollments"),
            ("RENDER_TIMEOUT_SECS", "3"),
            ("SEED_FILE", "seed.json"),
        ]));

        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/enrollments")
        );
        assert_eq!(config.render_timeout_secs, 3);
        assert_eq!(config.seed_file, Some(PathBuf::from("seed.json")));
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "not-a-port"),
            ("LOG_FORMAT", "xml"),
            ("DATABASE_URL", "  "),
        ]));

        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn engine_config_carries_tuning() {
        let config = Config {
            public_base_url: "https://learn.example.com".to_string(),
            render_timeout_secs: 4,
            render_max_attempts: 0,
            command_retry_limit: 3,
            ..Config::default()
        };
        let engine = config.engine_config();

        assert_eq!(engine.render_timeout, Duration::from_secs(4));
        assert_eq!(engine.render_max_attempts, 1);
        assert_eq!(engine.command_retry_limit, 3);
        assert_eq!(
            engine.verification_url("CERT-1"),
            "https://learn.example.com/verify-certificate/CERT-1"
        );
    }
}
