//! Configuration file support.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. Environment variables prefixed with `SHOPSYNC__`, e.g. `SHOPSYNC__SYNC__MAX_BATCH_SIZE`
//! 2. Local config file (`./shopsync.toml`)
//! 3. Config file (`~/.config/shopsync/config.toml`)
//! 4. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [shop]
//! domain = "demo.myshopify.com"
//! api_version = "2024-10"
//! access_token = "shpat_..."  # or SHOPSYNC__SHOP__ACCESS_TOKEN
//!
//! [sync]
//! rest_page_limit = 250
//! default_batch_size = 50
//! max_batch_size = 250
//! recovery_factor = 0.75
//! max_cost_retries = 10
//!
//! [http]
//! timeout_secs = 30
//! requests_per_second = 2
//! update_concurrency = 4
//! ```

use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::budget::{
    BatchSizing, DEFAULT_BATCH_SIZE, DEFAULT_RECOVERY_FACTOR, DEFAULT_RESTORE_RATE, MAX_BATCH_SIZE,
};
use crate::rate_limit::rate_limits;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub shop: ShopConfig,
    pub sync: SyncSettings,
    pub http: HttpConfig,
}

/// Which shop to talk to.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShopConfig {
    /// Shop domain, e.g. `demo.myshopify.com`.
    pub domain: Option<String>,
    /// Admin API version segment, e.g. `2024-10`.
    pub api_version: String,
    /// Admin API access token, sent as `X-Shopify-Access-Token`.
    pub access_token: Option<String>,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            domain: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            access_token: None,
        }
    }
}

/// Admin API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "2024-10";

/// Sync engine tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// REST `limit` query parameter (the API caps it at 250).
    pub rest_page_limit: u32,
    /// Augmentation batch size before any cost telemetry exists.
    pub default_batch_size: usize,
    /// Upper bound for any augmentation batch.
    pub max_batch_size: usize,
    /// Safety margin applied when shrinking a batch after a cost overrun.
    pub recovery_factor: f64,
    /// Consecutive cost overruns tolerated before the tick fails.
    pub max_cost_retries: u32,
    /// Budget refill rate assumed when the API does not report one.
    pub default_restore_rate: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            rest_page_limit: 250,
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
            recovery_factor: DEFAULT_RECOVERY_FACTOR,
            max_cost_retries: 10,
            default_restore_rate: DEFAULT_RESTORE_RATE,
        }
    }
}

impl SyncSettings {
    pub fn batch_sizing(&self) -> BatchSizing {
        BatchSizing {
            default_batch_size: self.default_batch_size,
            max_batch_size: self.max_batch_size,
            recovery_factor: self.recovery_factor,
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    /// Proactive request pacing; `0` disables it.
    pub requests_per_second: u32,
    /// Maximum in-flight mutations in an update batch.
    pub update_concurrency: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            requests_per_second: rate_limits::REST_DEFAULT_RPS,
            update_concurrency: 4,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from files and environment.
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = Self::default_config_path()
            && path.exists()
        {
            tracing::debug!("Loading config from {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let local_config = PathBuf::from("shopsync.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./shopsync.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("SHOPSYNC")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// `~/.config/shopsync/config.toml` or the platform equivalent.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "shopsync").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(content: &str) -> Config {
        ConfigBuilder::builder()
            .add_source(config::File::from_str(content, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.shop.api_version, "2024-10");
        assert!(config.shop.domain.is_none());
        assert_eq!(config.sync.rest_page_limit, 250);
        assert_eq!(config.sync.default_batch_size, 50);
        assert_eq!(config.sync.max_batch_size, 250);
        assert_eq!(config.sync.recovery_factor, 0.75);
        assert_eq!(config.sync.max_cost_retries, 10);
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert_eq!(config.http.requests_per_second, rate_limits::REST_DEFAULT_RPS);
    }

    #[test]
    fn test_config_from_toml() {
        let config = from_toml(
            r#"
            [shop]
            domain = "demo.myshopify.com"
            access_token = "shpat_test"

            [sync]
            default_batch_size = 25
            recovery_factor = 0.5

            [http]
            update_concurrency = 8
        "#,
        );

        assert_eq!(config.shop.domain.as_deref(), Some("demo.myshopify.com"));
        assert_eq!(config.shop.access_token.as_deref(), Some("shpat_test"));
        assert_eq!(config.shop.api_version, "2024-10");
        assert_eq!(config.sync.default_batch_size, 25);
        assert_eq!(config.sync.max_batch_size, 250);
        assert_eq!(config.http.update_concurrency, 8);

        let sizing = config.sync.batch_sizing();
        assert_eq!(sizing.default_batch_size, 25);
        assert_eq!(sizing.recovery_factor, 0.5);
    }

    #[test]
    fn test_config_empty_builder_uses_defaults() {
        let settings = ConfigBuilder::builder().build().unwrap();
        let config: Config = settings.try_deserialize().unwrap_or_default();
        assert_eq!(config.sync.max_cost_retries, 10);
    }

    #[test]
    fn test_config_merging_order() {
        let settings = ConfigBuilder::builder()
            .add_source(config::File::from_str(
                "[sync]\nmax_batch_size = 200\ndefault_batch_size = 40\n",
                FileFormat::Toml,
            ))
            .add_source(config::File::from_str(
                "[sync]\nmax_batch_size = 100\n",
                FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = settings.try_deserialize().unwrap();
        assert_eq!(config.sync.max_batch_size, 100);
        assert_eq!(config.sync.default_batch_size, 40);
    }

    #[test]
    fn test_config_invalid_toml() {
        let result = ConfigBuilder::builder()
            .add_source(config::File::from_str("[sync\nmax_batch_size = 1", FileFormat::Toml))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_unknown_fields_ignored() {
        let config = from_toml("[sync]\nmax_batch_size = 10\nunknown = \"x\"\n");
        assert_eq!(config.sync.max_batch_size, 10);
    }

    #[test]
    fn test_default_config_path_ends_with_file_name() {
        if let Some(path) = Config::default_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
