use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub flood: FloodSettings,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Files,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Files,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Anti-flood knobs. All of them can be changed at runtime through
/// [`Warden`](crate::warden::Warden) setters.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct FloodSettings {
    /// Baseline delay between consecutive join/verify operations.
    #[serde(default = "default_join_delay")]
    pub join_delay_secs: u64,
    /// Join attempts per batch before a cooldown.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_cooldown")]
    pub batch_cooldown_secs: u64,
    /// Default history window per channel for a scan.
    #[serde(default = "default_check_limit")]
    pub check_limit: usize,
    /// Emit a progress update every N items.
    #[serde(default = "default_status_interval")]
    pub status_interval: usize,
    #[serde(default = "default_hourly_cap")]
    pub hourly_join_cap: usize,
    #[serde(default = "default_daily_cap")]
    pub daily_join_cap: usize,
    /// A congestion wait at or above this aborts a join batch.
    #[serde(default = "default_flood_abort")]
    pub flood_abort_secs: u64,
    /// How many newly added channels are verified right away.
    #[serde(default = "default_max_autoverify")]
    pub max_autoverify_per_add: usize,
}

impl Default for FloodSettings {
    fn default() -> Self {
        Self {
            join_delay_secs: default_join_delay(),
            batch_size: default_batch_size(),
            batch_cooldown_secs: default_batch_cooldown(),
            check_limit: default_check_limit(),
            status_interval: default_status_interval(),
            hourly_join_cap: default_hourly_cap(),
            daily_join_cap: default_daily_cap(),
            flood_abort_secs: default_flood_abort(),
            max_autoverify_per_add: default_max_autoverify(),
        }
    }
}

fn default_join_delay() -> u64 {
    12
}
fn default_batch_size() -> usize {
    6
}
fn default_batch_cooldown() -> u64 {
    25 * 60
}
fn default_check_limit() -> usize {
    30
}
fn default_status_interval() -> usize {
    5
}
fn default_hourly_cap() -> usize {
    8
}
fn default_daily_cap() -> usize {
    40
}
fn default_flood_abort() -> u64 {
    600
}
fn default_max_autoverify() -> usize {
    6
}

/// Smallest and largest per-channel history window a scan accepts.
pub const CHECK_LIMIT_RANGE: std::ops::RangeInclusive<usize> = 10..=1000;

impl FloodSettings {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("flood.batch_size must be >= 1");
        }
        if self.status_interval == 0 {
            anyhow::bail!("flood.status_interval must be >= 1");
        }
        if self.daily_join_cap == 0 {
            anyhow::bail!("flood.daily_join_cap must be >= 1");
        }
        if self.hourly_join_cap > self.daily_join_cap {
            anyhow::bail!(
                "flood.hourly_join_cap ({}) must not exceed flood.daily_join_cap ({})",
                self.hourly_join_cap,
                self.daily_join_cap
            );
        }
        if !CHECK_LIMIT_RANGE.contains(&self.check_limit) {
            anyhow::bail!(
                "flood.check_limit must be in [{}, {}]",
                CHECK_LIMIT_RANGE.start(),
                CHECK_LIMIT_RANGE.end()
            );
        }
        Ok(())
    }
}

impl Config {
    /// All defaults. Used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.flood.validate()?;

    Ok(config)
}
