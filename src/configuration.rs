use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_LISTEN: &str = "0.0.0.0:35971";
const DEFAULT_STORE_PATH: &str = "agenda_db.json";

/// Platforms a fetcher exists for.
pub const KNOWN_PLATFORMS: &[&str] = &["telegram"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub platforms: BTreeMap<String, PlatformConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

/// Polling options of one platform.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Fetch all channels concurrently instead of one after another.
    #[serde(default)]
    pub parallel: bool,
    /// Seconds to sleep between two polling cycles.
    pub frequency: u64,
    /// Seconds to wait between two channels when not parallel.
    #[serde(default)]
    pub pause_between_sync_channels: u64,
    pub channels: Vec<String>,
}

impl PlatformConfig {
    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency)
    }

    pub fn pause_between_sync_channels(&self) -> Duration {
        Duration::from_secs(self.pause_between_sync_channels)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("YAML config reading error at {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(raw).context("YAML config unmarshal error")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.platforms.is_empty() {
            bail!("at least one platform must be configured");
        }

        for (platform, entry) in self.platforms.iter_mut() {
            if !KNOWN_PLATFORMS.contains(&platform.as_str()) {
                bail!(
                    "Unknown platform: {}. Known platforms are: {:?}",
                    platform,
                    KNOWN_PLATFORMS
                );
            }
            if entry.frequency == 0 {
                bail!("platform {}: frequency must be positive", platform);
            }

            for channel in entry.channels.iter_mut() {
                *channel = channel.trim().to_string();
            }
            let mut seen = HashSet::new();
            entry
                .channels
                .retain(|c| !c.is_empty() && seen.insert(c.clone()));
            if entry.channels.is_empty() {
                bail!("platform {}: no channels configured", platform);
            }
        }

        Ok(())
    }
}
