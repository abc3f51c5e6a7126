//! Configuration management using Figment
//!
//! Configuration is merged from the following sources (highest precedence first):
//! 1. Environment variables (prefix: `DOCDAL_`, nested keys separated by `__`)
//! 2. A TOML file
//! 3. Default values

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::error::{DataAccessError, DataAccessResult};

/// Top-level configuration of the data access layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataAccessConfig {
    /// Largest page size callers may request
    #[serde(default = "default_max_pagesize")]
    pub max_pagesize: u64,

    /// Cursor pool settings
    #[serde(default)]
    pub cursor_pool: CursorPoolConfig,
}

/// Cursor pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPoolConfig {
    /// Maximum number of pooled cursors across all shards
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Number of independently locked shards
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Pooled cursors idle for longer than this are discarded
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,

    /// Pages on either side of the requested one pre-opened by the eager random policy
    #[serde(default = "default_random_span")]
    pub random_span: u64,
}

fn default_max_pagesize() -> u64 {
    1000
}

fn default_capacity() -> usize {
    1024
}

fn default_shards() -> usize {
    16
}

fn default_max_idle_secs() -> u64 {
    600
}

fn default_random_span() -> u64 {
    2
}

impl Default for DataAccessConfig {
    fn default() -> Self {
        Self {
            max_pagesize: default_max_pagesize(),
            cursor_pool: CursorPoolConfig::default(),
        }
    }
}

impl Default for CursorPoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            shards: default_shards(),
            max_idle_secs: default_max_idle_secs(),
            random_span: default_random_span(),
        }
    }
}

impl CursorPoolConfig {
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

impl DataAccessConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing keys.
    ///
    /// A missing file is not an error. `DOCDAL_` environment variables override the file,
    /// e.g. `DOCDAL_CURSOR_POOL__CAPACITY=64`.
    pub fn load_from(path: impl AsRef<Path>) -> DataAccessResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
        }

        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(DataAccessConfig::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed("DOCDAL_").split("__")),
        )
    }

    /// Extract configuration from an arbitrary figment and validate it.
    pub fn from_figment(figment: Figment) -> DataAccessResult<Self> {
        let config: DataAccessConfig = figment.extract()?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> DataAccessResult<()> {
        if self.max_pagesize == 0 {
            return Err(DataAccessError::Configuration(
                "max_pagesize must be positive".to_string(),
            ));
        }
        if self.cursor_pool.capacity == 0 || self.cursor_pool.shards == 0 {
            return Err(DataAccessError::Configuration(
                "cursor_pool.capacity and cursor_pool.shards must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> DataAccessResult<DataAccessConfig> {
        DataAccessConfig::from_figment(
            Figment::new()
                .merge(Serialized::defaults(DataAccessConfig::default()))
                .merge(Toml::string(toml)),
        )
    }

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config = from_toml("max_pagesize = 50").unwrap();

        assert_eq!(config.max_pagesize, 50);
        assert_eq!(config.cursor_pool, CursorPoolConfig::default());
    }

    #[test]
    fn nested_pool_settings() {
        let config = from_toml(
            r#"
            [cursor_pool]
            capacity = 8
            shards = 2
            max_idle_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.cursor_pool.capacity, 8);
        assert_eq!(config.cursor_pool.shards, 2);
        assert_eq!(config.cursor_pool.max_idle(), Duration::from_secs(5));
        assert_eq!(config.cursor_pool.random_span, 2);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(matches!(
            from_toml("max_pagesize = 0"),
            Err(DataAccessError::Configuration(_))
        ));
        assert!(matches!(
            from_toml("[cursor_pool]\nshards = 0"),
            Err(DataAccessError::Configuration(_))
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = DataAccessConfig::load_from("/nonexistent/docdal.toml").unwrap();

        assert_eq!(config.max_pagesize, 1000);
    }
}
