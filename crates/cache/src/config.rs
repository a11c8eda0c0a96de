//! Handle cache configuration with precedence and validation
//!
//! Precedence, lowest to highest: built-in defaults, the JSON config file,
//! then `FSPOOL_*` environment variables.

use crate::backend::BackendConfig;
use fspool_core::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default number of distinct active keys
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1000;
/// Default grace window before an evicted handle is closed (five minutes)
pub const DEFAULT_DEFERRED_CLOSE_DELAY: Duration = Duration::from_secs(5 * 60);
/// Default period of the deferred-close sweeper (one minute)
pub const DEFAULT_DEFERRED_CLOSE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Default bounded wait of the finalizer loop
pub const DEFAULT_FINALIZER_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

const ENV_CONFIG_FILE: &str = "FSPOOL_CONFIG";
const ENV_MAX_CACHE_SIZE: &str = "FSPOOL_CACHE_MAX_SIZE";
const ENV_DEFERRED_CLOSE_DELAY: &str = "FSPOOL_DEFERRED_CLOSE_DELAY_MS";
const ENV_SWEEP_INTERVAL: &str = "FSPOOL_DEFERRED_CLOSE_SWEEP_INTERVAL_MS";
const ENV_FINALIZER_WAIT_TIMEOUT: &str = "FSPOOL_FINALIZER_WAIT_TIMEOUT_MS";
const ENV_IDENTITY_SENSITIVE_SCHEMES: &str = "FSPOOL_IDENTITY_SENSITIVE_SCHEMES";
const ENV_CLOSE_PENDING_ON_SHUTDOWN: &str = "FSPOOL_CLOSE_PENDING_ON_SHUTDOWN";

/// Configuration for the handle cache and its background workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Creation fails once this many distinct keys are active
    pub max_cache_size: usize,
    /// Grace window between eviction and physical close
    pub deferred_close_delay: Duration,
    /// How often the deferred closer sweeps its queue
    pub deferred_close_sweep_interval: Duration,
    /// Bounded wait of the finalizer loop between shutdown checks
    pub finalizer_wait_timeout: Duration,
    /// Schemes whose handles are bound to credentials and must be replaced on rotation
    pub identity_sensitive_schemes: Vec<String>,
    /// Close still-pending handles at shutdown instead of abandoning them
    pub close_pending_on_shutdown: bool,
    /// Properties passed through to the backend factory
    pub backend: BackendConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            deferred_close_delay: DEFAULT_DEFERRED_CLOSE_DELAY,
            deferred_close_sweep_interval: DEFAULT_DEFERRED_CLOSE_SWEEP_INTERVAL,
            finalizer_wait_timeout: DEFAULT_FINALIZER_WAIT_TIMEOUT,
            identity_sensitive_schemes: vec!["hdfs".to_string(), "viewfs".to_string()],
            close_pending_on_shutdown: true,
            backend: BackendConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    /// Whether handles for `scheme` must be recreated when credentials rotate
    pub fn is_identity_sensitive(&self, scheme: &str) -> bool {
        self.identity_sensitive_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
    }

    /// Reject settings the background workers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_cache_size == 0 {
            return Err(Error::configuration("max_cache_size must be greater than 0"));
        }
        if self.deferred_close_sweep_interval.is_zero() {
            return Err(Error::configuration(
                "deferred_close_sweep_interval must be greater than 0",
            ));
        }
        if self.finalizer_wait_timeout.is_zero() {
            return Err(Error::configuration(
                "finalizer_wait_timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in defaults only
    Default,
    /// Configuration file
    ConfigFile(PathBuf),
    /// Environment variables
    EnvironmentVariable(String),
}

/// Builder for [`CacheConfig`]
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: CacheConfig) -> Self {
        Self { config }
    }

    pub fn with_max_cache_size(mut self, max_cache_size: usize) -> Self {
        self.config.max_cache_size = max_cache_size;
        self
    }

    pub fn with_deferred_close_delay(mut self, delay: Duration) -> Self {
        self.config.deferred_close_delay = delay;
        self
    }

    pub fn with_deferred_close_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.deferred_close_sweep_interval = interval;
        self
    }

    pub fn with_finalizer_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.finalizer_wait_timeout = timeout;
        self
    }

    pub fn with_identity_sensitive_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.identity_sensitive_schemes = schemes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_close_pending_on_shutdown(mut self, close: bool) -> Self {
        self.config.close_pending_on_shutdown = close;
        self
    }

    pub fn with_backend_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.backend.set(key, value);
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<CacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration together with the highest-precedence source that contributed to it
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: CacheConfig,
    pub source: ConfigSource,
}

/// `cache` section of the JSON config file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheSection {
    max_cache_size: Option<usize>,
    deferred_close_delay_ms: Option<u64>,
    deferred_close_sweep_interval_ms: Option<u64>,
    finalizer_wait_timeout_ms: Option<u64>,
    identity_sensitive_schemes: Option<Vec<String>>,
    close_pending_on_shutdown: Option<bool>,
    backend: Option<BackendConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    cache: CacheSection,
}

/// Configuration loader that handles precedence
pub struct CacheConfigLoader;

impl CacheConfigLoader {
    /// Load configuration with full precedence handling
    pub fn load() -> Result<LoadedConfig> {
        let mut loaded = LoadedConfig {
            config: CacheConfig::default(),
            source: ConfigSource::Default,
        };

        let path = Self::config_file_path()?;
        if Self::apply_file(&mut loaded.config, &path)? {
            loaded.source = ConfigSource::ConfigFile(path);
        }

        if Self::apply_env(&mut loaded.config)? {
            loaded.source = ConfigSource::EnvironmentVariable("FSPOOL_*".to_string());
        }

        loaded.config.validate()?;
        Ok(loaded)
    }

    /// Merge the config file at `path` into `config`; returns false if it does not exist
    pub fn apply_file(config: &mut CacheConfig, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_system(path, "read config file", e))?;
        let file: FileConfig = serde_json::from_str(&content)?;
        let section = file.cache;

        if let Some(max_cache_size) = section.max_cache_size {
            config.max_cache_size = max_cache_size;
        }
        if let Some(ms) = section.deferred_close_delay_ms {
            config.deferred_close_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = section.deferred_close_sweep_interval_ms {
            config.deferred_close_sweep_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = section.finalizer_wait_timeout_ms {
            config.finalizer_wait_timeout = Duration::from_millis(ms);
        }
        if let Some(schemes) = section.identity_sensitive_schemes {
            config.identity_sensitive_schemes = schemes;
        }
        if let Some(close) = section.close_pending_on_shutdown {
            config.close_pending_on_shutdown = close;
        }
        if let Some(backend) = section.backend {
            config.backend = backend;
        }

        tracing::debug!("Loaded handle cache configuration from {}", path.display());
        Ok(true)
    }

    /// Apply `FSPOOL_*` overrides; returns whether any were set
    pub fn apply_env(config: &mut CacheConfig) -> Result<bool> {
        let mut applied = false;

        if let Some(max_cache_size) = parse_env::<usize>(ENV_MAX_CACHE_SIZE)? {
            config.max_cache_size = max_cache_size;
            applied = true;
        }
        if let Some(ms) = parse_env::<u64>(ENV_DEFERRED_CLOSE_DELAY)? {
            config.deferred_close_delay = Duration::from_millis(ms);
            applied = true;
        }
        if let Some(ms) = parse_env::<u64>(ENV_SWEEP_INTERVAL)? {
            config.deferred_close_sweep_interval = Duration::from_millis(ms);
            applied = true;
        }
        if let Some(ms) = parse_env::<u64>(ENV_FINALIZER_WAIT_TIMEOUT)? {
            config.finalizer_wait_timeout = Duration::from_millis(ms);
            applied = true;
        }
        if let Ok(schemes) = std::env::var(ENV_IDENTITY_SENSITIVE_SCHEMES) {
            config.identity_sensitive_schemes = schemes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
                .collect();
            applied = true;
        }
        if let Some(close) = parse_env::<bool>(ENV_CLOSE_PENDING_ON_SHUTDOWN)? {
            config.close_pending_on_shutdown = close;
            applied = true;
        }

        Ok(applied)
    }

    /// `$FSPOOL_CONFIG`, else `<config dir>/fspool/config.json`
    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONFIG_FILE) {
            return Ok(PathBuf::from(path));
        }

        let config_dir = dirs::config_dir().ok_or_else(|| {
            Error::configuration(format!(
                "could not determine config directory; set {ENV_CONFIG_FILE}"
            ))
        })?;
        Ok(config_dir.join("fspool").join("config.json"))
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .to_lowercase()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::configuration(format!("invalid value '{raw}' for {name}: {e}"))),
        Err(_) => Ok(None),
    }
}
