//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// Longest accepted live window. The live set is held in memory in full.
pub const MAX_RETENTION_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub geo: GeoConfig,
    pub hub: HubConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed to read the API from a browser (the dashboard)
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origin: "http://localhost:8888".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub interval_secs: u64,
    /// Maximum age of a live event before it is evicted
    pub retention_secs: u64,
    pub min_batch: usize,
    pub max_batch: usize,
    pub intensity_weights: IntensityWeights,
    /// Fixed RNG seed for reproducible event streams
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            retention_secs: 300,
            min_batch: 3,
            max_batch: 10,
            intensity_weights: IntensityWeights::default(),
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs.min(MAX_RETENTION_SECS) as i64)
    }
}

/// Relative likelihood of each intensity tier. A zero weight disables the tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntensityWeights {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub critical: u32,
}

impl Default for IntensityWeights {
    fn default() -> Self {
        Self {
            low: 1,
            medium: 1,
            high: 1,
            critical: 1,
        }
    }
}

impl IntensityWeights {
    pub fn total(&self) -> u64 {
        [self.low, self.medium, self.high, self.critical]
            .iter()
            .map(|w| *w as u64)
            .sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Path to a MaxMind GeoLite2-City database
    pub database: Option<String>,
    /// Base URL of an ipinfo-compatible lookup service
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_size: usize,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            database: None,
            endpoint: None,
            api_key: None,
            timeout_ms: 2000,
            cache_ttl_secs: 3600,
            cache_size: 4096,
        }
    }
}

impl GeoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Messages queued per subscriber before it is considered too slow
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `ATTACKMAP_<SECTION>__<KEY>` overrides
fn environment() -> config::Environment {
    config::Environment::with_prefix("ATTACKMAP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";

        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(environment());

        let settings = builder.build()?;
        let mut config: Config = settings.try_deserialize()?;

        config.apply_legacy_env();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Honor the variable names used by earlier deployments of the map backend
    fn apply_legacy_env(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(origin) = std::env::var("FRONTEND_URL") {
            if !origin.is_empty() {
                self.server.cors_origin = origin;
            }
        }
        if let Ok(key) = std::env::var("IPINFO_API_KEY") {
            if !key.is_empty() {
                self.geo.api_key = Some(key);
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate server config
        if self.server.port == 0 {
            anyhow::bail!("Invalid port: 0 is not allowed");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        // Validate generation config
        if self.generation.interval_secs == 0 {
            anyhow::bail!("Generation interval must be at least one second");
        }
        if self.generation.retention_secs == 0 {
            anyhow::bail!("Retention horizon must be at least one second");
        }
        if self.generation.retention_secs > MAX_RETENTION_SECS {
            anyhow::bail!(
                "Retention horizon {}s exceeds the maximum of {}s",
                self.generation.retention_secs,
                MAX_RETENTION_SECS
            );
        }
        if self.generation.min_batch > self.generation.max_batch {
            anyhow::bail!(
                "Invalid batch range: min_batch {} exceeds max_batch {}",
                self.generation.min_batch,
                self.generation.max_batch
            );
        }
        if self.generation.intensity_weights.total() == 0 {
            anyhow::bail!("At least one intensity weight must be non-zero");
        }

        if self.geo.timeout_ms == 0 {
            anyhow::bail!("Geo lookup timeout cannot be 0");
        }
        if self.hub.subscriber_buffer == 0 {
            anyhow::bail!("Subscriber buffer cannot be 0");
        }

        // Validate logging level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }

        Ok(())
    }
}
