//! Runtime configuration.

use std::path::Path;
use std::time::Duration;

use coherence_cache::{CacheSettings, PollBackoff};
use coherence_observability::LogConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides `[database] path`.
pub const DATABASE_ENV: &str = "COHERENCE_DATABASE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration file contents. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoherenceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`. Ignored inside a Spin component, which
    /// always uses its default database.
    #[serde(default = "default_database_path")]
    pub path: String,
    /// How long a statement waits on another worker's write lock. Counts on
    /// top of `cache.lock_wait_ms` in the worst case, so it must be shorter.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> String {
    "coherence.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Longest wait for another process's build, in milliseconds.
    pub lock_wait_ms: u64,
    /// Build lease TTL. Must exceed the slowest builder.
    pub lease_ttl_ms: u64,
    pub poll_base_ms: u64,
    pub poll_max_ms: u64,
    /// Process-local tier TTL; 0 disables the tier.
    pub local_ttl_ms: u64,
    pub local_capacity: usize,
    /// Label stored with every published row.
    pub built_by: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: 10_000,
            lease_ttl_ms: 60_000,
            poll_base_ms: 25,
            poll_max_ms: 250,
            local_ttl_ms: 30_000,
            local_capacity: 1024,
            built_by: "coherence".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            lock_wait: Duration::from_millis(self.lock_wait_ms),
            built_by: self.built_by.clone(),
            local_ttl: Duration::from_millis(self.local_ttl_ms),
            local_capacity: self.local_capacity,
        }
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn backoff(&self) -> PollBackoff {
        PollBackoff {
            base: Duration::from_millis(self.poll_base_ms),
            max: Duration::from_millis(self.poll_max_ms),
        }
    }
}

impl CoherenceConfig {
    /// Load a config file (TOML, or JSON when the extension is `.json`),
    /// apply the environment override, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let config: Self = if is_json {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: display,
                reason: e.to_string(),
            })?
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: display,
                reason: e.to_string(),
            })?
        };

        config.finish()
    }

    /// Defaults plus the environment override, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().finish()
    }

    /// Parse TOML text without touching the environment.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, for writing a starter config file.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Replace the database path when an override is given.
    pub fn with_database_override(mut self, path: Option<String>) -> Self {
        if let Some(path) = path.filter(|p| !p.is_empty()) {
            self.database.path = path;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cache = &self.cache;
        if cache.lock_wait_ms == 0 {
            return Err(ConfigError::Invalid("cache.lock_wait_ms must be positive".into()));
        }
        if cache.poll_base_ms == 0 || cache.poll_base_ms > cache.poll_max_ms {
            return Err(ConfigError::Invalid(
                "cache.poll_base_ms must be positive and at most cache.poll_max_ms".into(),
            ));
        }
        if cache.lease_ttl_ms == 0 {
            return Err(ConfigError::Invalid("cache.lease_ttl_ms must be positive".into()));
        }
        if cache.built_by.trim().is_empty() {
            return Err(ConfigError::Invalid("cache.built_by must not be empty".into()));
        }
        if self.database.busy_timeout_ms >= cache.lock_wait_ms {
            return Err(ConfigError::Invalid(
                "database.busy_timeout_ms must be shorter than cache.lock_wait_ms".into(),
            ));
        }
        if self.database.path.is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }
        Ok(())
    }

    fn finish(self) -> Result<Self, ConfigError> {
        let config = self.with_database_override(std::env::var(DATABASE_ENV).ok());
        config.validate()?;
        Ok(config)
    }
}
