//! Configuration types.

use std::net::IpAddr;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Database path that selects the in-process store.
pub const MEMORY_DB: &str = ":memory:";

/// Server configuration, read from `ONBOARDING_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// SQLite file, or `:memory:` for the non-durable store.
    pub db_path: String,
    pub bind_addr: IpAddr,
    pub http_port: u16,
    /// When set, logs are also written to a daily-rolling file here.
    pub log_dir: Option<PathBuf>,
    /// Allowed CORS origins. Empty means permissive.
    pub cors_origins: Vec<String>,
    /// Reject node updates that don't carry `expected_version`.
    pub strict_versions: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/onboarding.db".to_string(),
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            http_port: 8080,
            log_dir: None,
            cors_origins: Vec::new(),
            strict_versions: false,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let http_port = match get("ONBOARDING_HTTP_PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .map_err(|e| invalid("ONBOARDING_HTTP_PORT", e.to_string()))?,
            None => defaults.http_port,
        };

        let bind_addr = match get("ONBOARDING_BIND_ADDR") {
            Some(v) => v
                .trim()
                .parse::<IpAddr>()
                .map_err(|e| invalid("ONBOARDING_BIND_ADDR", e.to_string()))?,
            None => defaults.bind_addr,
        };

        let strict_versions = match get("ONBOARDING_STRICT_VERSIONS") {
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(invalid(
                        "ONBOARDING_STRICT_VERSIONS",
                        format!("expected a boolean, got '{other}'"),
                    ));
                }
            },
            None => defaults.strict_versions,
        };

        let cors_origins = get("ONBOARDING_CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            db_path: get("ONBOARDING_DB_PATH").unwrap_or(defaults.db_path),
            bind_addr,
            http_port,
            log_dir: get("ONBOARDING_LOG_DIR").map(PathBuf::from),
            cors_origins,
            strict_versions,
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.db_path == MEMORY_DB
    }

    pub fn listen_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.bind_addr, self.http_port)
    }
}
