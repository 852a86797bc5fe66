use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::tiles::TileCacheConfig;
use crate::tiles::cache::{DEFAULT_CAPACITY, DEFAULT_CONCURRENCY};
use crate::transport::{BackoffPolicy, TransportConfig};

pub const DEFAULT_SERVER: &str = "ws://127.0.0.1:8000/ws";
pub const DEFAULT_TILE_BASE: &str = "http://127.0.0.1:8000/";

const ENV_SERVER: &str = "CHARTROOM_SERVER";
const ENV_TILE_BASE: &str = "CHARTROOM_TILE_BASE";
const ENV_BACKOFF_BASE_MS: &str = "CHARTROOM_BACKOFF_BASE_MS";
const ENV_BACKOFF_MAX_MS: &str = "CHARTROOM_BACKOFF_MAX_MS";
const ENV_FETCH_CONCURRENCY: &str = "CHARTROOM_FETCH_CONCURRENCY";
const ENV_TILE_CACHE: &str = "CHARTROOM_TILE_CACHE";
const ENV_SESSION_FILE: &str = "CHARTROOM_SESSION_FILE";

/// Client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket endpoint of the route server
    pub server_url: Url,
    /// Base URL tiles are fetched from
    pub tile_base: Url,
    pub backoff: BackoffPolicy,
    pub fetch_concurrency: usize,
    pub tile_cache_capacity: usize,
    /// Overrides `~/.chartroom/session`
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is not a valid url: {source}")]
    Url {
        key: &'static str,
        source: url::ParseError,
    },
}

impl ClientConfig {
    /// Configuration with default tuning for the given endpoints.
    pub fn new(server_url: Url, tile_base: Url) -> Self {
        Self {
            server_url,
            tile_base,
            backoff: BackoffPolicy::default(),
            fetch_concurrency: DEFAULT_CONCURRENCY,
            tile_cache_capacity: DEFAULT_CAPACITY,
            session_file: None,
        }
    }

    /// Load configuration from environment variables. Numeric values that
    /// do not parse fall back to the defaults with a warning; a bad URL is
    /// an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = env_url(ENV_SERVER, DEFAULT_SERVER)?;
        let tile_base = env_url(ENV_TILE_BASE, DEFAULT_TILE_BASE)?;
        let defaults = BackoffPolicy::default();
        let backoff = BackoffPolicy::new(
            env_parse(ENV_BACKOFF_BASE_MS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.base),
            env_parse(ENV_BACKOFF_MAX_MS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.max),
        );
        Ok(Self {
            backoff,
            fetch_concurrency: env_parse(ENV_FETCH_CONCURRENCY)
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_CONCURRENCY),
            tile_cache_capacity: env_parse(ENV_TILE_CACHE)
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_CAPACITY),
            session_file: env::var_os(ENV_SESSION_FILE)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
            ..Self::new(server_url, tile_base)
        })
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            server_url: self.server_url.clone(),
            backoff: self.backoff,
        }
    }

    pub fn tile_cache(&self) -> TileCacheConfig {
        TileCacheConfig {
            concurrency: self.fetch_concurrency,
            capacity: self.tile_cache_capacity,
        }
    }
}

fn env_url(key: &'static str, default: &str) -> Result<Url, ConfigError> {
    let raw = env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string());
    Url::parse(raw.trim()).map_err(|source| ConfigError::Url { key, source })
}

fn env_parse<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                target = "chartroom::config",
                key,
                value = raw,
                error = %err,
                "ignoring invalid configuration value"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const KEYS: [&str; 7] = [
        ENV_SERVER,
        ENV_TILE_BASE,
        ENV_BACKOFF_BASE_MS,
        ENV_BACKOFF_MAX_MS,
        ENV_FETCH_CONCURRENCY,
        ENV_TILE_CACHE,
        ENV_SESSION_FILE,
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_config_from_env_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.server_url.as_str(), DEFAULT_SERVER);
        assert_eq!(config.tile_base.as_str(), DEFAULT_TILE_BASE);
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.fetch_concurrency, 3);
        assert_eq!(config.tile_cache_capacity, 512);
        assert_eq!(config.session_file, None);
    }

    #[test]
    fn test_config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ENV_SERVER, "wss://routes.example.com/ws");
            env::set_var(ENV_BACKOFF_BASE_MS, "250");
            env::set_var(ENV_FETCH_CONCURRENCY, "6");
            env::set_var(ENV_SESSION_FILE, "/tmp/chartroom-session");
        }
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.server_url.host_str(), Some("routes.example.com"));
        assert_eq!(config.backoff.base, Duration::from_millis(250));
        assert_eq!(config.backoff.max, Duration::from_millis(30_000));
        assert_eq!(config.tile_cache().concurrency, 6);
        assert_eq!(
            config.session_file,
            Some(PathBuf::from("/tmp/chartroom-session"))
        );
        clear_env();
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ENV_TILE_CACHE, "0");
            env::set_var(ENV_BACKOFF_MAX_MS, "soon");
        }
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.tile_cache_capacity, DEFAULT_CAPACITY);
        assert_eq!(config.backoff.max, Duration::from_millis(30_000));
        clear_env();
    }

    #[test]
    fn test_invalid_url_is_an_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ENV_SERVER, "not a url");
        }
        let err = ClientConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Url { key: ENV_SERVER, .. }));
        clear_env();
    }
}
