//! Configuration for sentinel-watch.
//!
//! Supports loading from TOML file with CLI argument overrides. A missing or
//! unparseable file falls back to documented defaults; config errors are
//! never fatal.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentinel_market::AlertThresholds;
use serde::Deserialize;
use tracing::warn;

/// Floor for the trade-poll interval.
const MIN_POLL_INTERVAL_SECS: u64 = 60;

/// Top-level configuration for sentinel-watch.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub log_level: String,
    /// Log alerts instead of posting them to the webhook.
    pub dry_run: bool,
    pub cache_path: String,
    pub gamma_base_url: String,
    pub clob_ws_url: String,
    pub data_api_base_url: String,
    /// Discord webhook; absent means alerts are logged only.
    pub discord_webhook_url: Option<String>,
    pub poll_interval: Duration,
    pub discovery_interval: Duration,
    pub summary_interval: Duration,
    pub top_depth_levels: usize,
    pub max_monitored_markets: usize,
    pub connect_timeout: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub thresholds: AlertThresholds,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dry_run: false,
            cache_path: "data/market-cache.json".to_string(),
            gamma_base_url: "https://gamma-api.polymarket.com".to_string(),
            clob_ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/".to_string(),
            data_api_base_url: "https://data-api.polymarket.com".to_string(),
            discord_webhook_url: None,
            poll_interval: Duration::from_secs(120),
            discovery_interval: Duration::from_secs(120),
            summary_interval: Duration::from_secs(1800),
            top_depth_levels: 10,
            max_monitored_markets: 100,
            connect_timeout: Duration::from_secs(10),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            thresholds: AlertThresholds::default(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(
        &mut self,
        log_level: Option<String>,
        webhook_url: Option<String>,
        dry_run: bool,
    ) {
        if let Some(level) = log_level {
            self.log_level = level;
        }
        if let Some(url) = webhook_url {
            self.discord_webhook_url = Some(url);
        }
        if dry_run {
            self.dry_run = true;
        }
    }
}

/// TOML file structure for deserialization.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    endpoints: EndpointsToml,
    #[serde(default)]
    watch: WatchToml,
    #[serde(default)]
    stream: StreamToml,
    #[serde(default)]
    thresholds: AlertThresholds,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    log_level: String,
    dry_run: bool,
    cache_path: String,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dry_run: false,
            cache_path: "data/market-cache.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct EndpointsToml {
    gamma_base_url: String,
    clob_ws_url: String,
    data_api_base_url: String,
    discord_webhook_url: Option<String>,
}

impl Default for EndpointsToml {
    fn default() -> Self {
        Self {
            gamma_base_url: "https://gamma-api.polymarket.com".to_string(),
            clob_ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/".to_string(),
            data_api_base_url: "https://data-api.polymarket.com".to_string(),
            discord_webhook_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WatchToml {
    poll_interval_secs: u64,
    discovery_interval_secs: u64,
    summary_interval_secs: u64,
    top_depth_levels: usize,
    max_monitored_markets: usize,
}

impl Default for WatchToml {
    fn default() -> Self {
        Self {
            poll_interval_secs: 120,
            discovery_interval_secs: 120,
            summary_interval_secs: 1800,
            top_depth_levels: 10,
            max_monitored_markets: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StreamToml {
    connect_timeout_secs: u64,
    initial_reconnect_delay_secs: u64,
    max_reconnect_delay_secs: u64,
}

impl Default for StreamToml {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            initial_reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}

impl From<TomlConfig> for WatchConfig {
    fn from(toml: TomlConfig) -> Self {
        // Non-positive thresholds are a configuration error; substitute the
        // documented defaults rather than terminating.
        let thresholds = if toml.thresholds.is_valid() {
            toml.thresholds
        } else {
            warn!("Configured alert thresholds are not all positive, using defaults");
            AlertThresholds::default()
        };

        Self {
            log_level: toml.general.log_level,
            dry_run: toml.general.dry_run,
            cache_path: toml.general.cache_path,
            gamma_base_url: toml.endpoints.gamma_base_url,
            clob_ws_url: toml.endpoints.clob_ws_url,
            data_api_base_url: toml.endpoints.data_api_base_url,
            discord_webhook_url: toml.endpoints.discord_webhook_url,
            poll_interval: Duration::from_secs(
                toml.watch.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS),
            ),
            discovery_interval: Duration::from_secs(toml.watch.discovery_interval_secs),
            summary_interval: Duration::from_secs(toml.watch.summary_interval_secs),
            top_depth_levels: toml.watch.top_depth_levels,
            max_monitored_markets: toml.watch.max_monitored_markets,
            connect_timeout: Duration::from_secs(toml.stream.connect_timeout_secs),
            initial_reconnect_delay: Duration::from_secs(
                toml.stream.initial_reconnect_delay_secs,
            ),
            max_reconnect_delay: Duration::from_secs(toml.stream.max_reconnect_delay_secs),
            thresholds,
        }
    }
}
