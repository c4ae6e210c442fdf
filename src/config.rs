//! Application-level configuration loading.

use std::{env, fs, io::ErrorKind, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CHAT_POLL_BACK_CONFIG_PATH";
/// Environment variable that overrides the configured storage backend.
const STORE_BACKEND_ENV: &str = "CHAT_POLL_BACK_STORE";

const DEFAULT_RESULTS_LIMIT: usize = 5;
const DEFAULT_MAX_STORE_ATTEMPTS: u32 = 3;
const DEFAULT_CLOSE_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_SSE_CAPACITY: usize = 16;

/// Storage backend the supervisor connects to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile in-process maps.
    #[default]
    Memory,
    /// MongoDB, configured through `MONGO_URI`/`MONGO_DB`.
    Mongo,
    /// CouchDB, configured through `COUCH_BASE_URL`/`COUCH_DB`.
    Couch,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "couch" | "couchdb" => Ok(Self::Couch),
            other => Err(format!("unknown storage backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Maximum number of options shown in a results announcement.
    pub results_limit: usize,
    /// Attempts (first try included) for store writes failing with a conflict.
    pub max_store_attempts: u32,
    /// Delay before a failed expiry close is tried again.
    pub close_retry_delay: Duration,
    /// Capacity of each SSE broadcast channel.
    pub sse_capacity: usize,
    /// Backend installed by the storage supervisor.
    pub store_backend: StoreBackend,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    ///
    /// `CHAT_POLL_BACK_STORE` takes precedence over the backend named in the file.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        backend = ?config.store_backend,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        match env::var(STORE_BACKEND_ENV) {
            Ok(value) => config.with_backend_override(&value),
            Err(_) => config,
        }
    }

    /// Parse a JSON configuration document; absent fields keep their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    fn with_backend_override(mut self, value: &str) -> Self {
        match value.parse::<StoreBackend>() {
            Ok(backend) => self.store_backend = backend,
            Err(err) => warn!(error = %err, "ignoring {STORE_BACKEND_ENV}"),
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    results_limit: usize,
    max_store_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "close_retry_delay_ms")]
    close_retry_delay: Duration,
    sse_capacity: usize,
    store_backend: StoreBackend,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            results_limit: DEFAULT_RESULTS_LIMIT,
            max_store_attempts: DEFAULT_MAX_STORE_ATTEMPTS,
            close_retry_delay: DEFAULT_CLOSE_RETRY_DELAY,
            sse_capacity: DEFAULT_SSE_CAPACITY,
            store_backend: StoreBackend::default(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            results_limit: value.results_limit,
            // zero attempts would never call the store at all
            max_store_attempts: value.max_store_attempts.max(1),
            close_retry_delay: value.close_retry_delay,
            sse_capacity: value.sse_capacity.max(1),
            store_backend: value.store_backend,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.results_limit, 5);
        assert_eq!(config.max_store_attempts, 3);
        assert_eq!(config.close_retry_delay, Duration::from_secs(5));
        assert_eq!(config.sse_capacity, 16);
        assert_eq!(config.store_backend, StoreBackend::Memory);
    }

    #[test]
    fn fields_override_defaults() {
        let config = AppConfig::from_json(
            r#"{"results_limit": 3, "close_retry_delay_ms": 250, "store_backend": "couch"}"#,
        )
        .unwrap();
        assert_eq!(config.results_limit, 3);
        assert_eq!(config.close_retry_delay, Duration::from_millis(250));
        assert_eq!(config.store_backend, StoreBackend::Couch);
        assert_eq!(config.max_store_attempts, 3);
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        let config = AppConfig::from_json(r#"{"max_store_attempts": 0}"#).unwrap();
        assert_eq!(config.max_store_attempts, 1);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(AppConfig::from_json(r#"{"store_backend": "redis"}"#).is_err());
    }

    #[test]
    fn backend_override_accepts_aliases() {
        let config = AppConfig::default().with_backend_override("MongoDB");
        assert_eq!(config.store_backend, StoreBackend::Mongo);

        let config = config.with_backend_override("nope");
        assert_eq!(config.store_backend, StoreBackend::Mongo);
    }
}
