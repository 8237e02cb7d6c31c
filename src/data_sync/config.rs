use crate::constants::{
    DEFAULT_ARBITRAGE_CACHE_CAPACITY, DEFAULT_CHANNEL_BUFFER_SIZE, DEFAULT_RATE_LIMIT_INTERVAL_MS, DEFAULT_REQUESTS_PER_INTERVAL,
    DEFAULT_STALENESS_THRESHOLD_SECS, DEFAULT_SWAP_HISTORY_CAPACITY,
};
use crate::utils::{FeedConfigLoader, FeedConfigLoaderSync, LoadConfigError, load_from_file, load_from_file_sync};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the price feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Age in seconds after which a cached ancestor price is re-read
    pub staleness_threshold_secs: u64,
    /// Transactions remembered per endpoint by the arbitrage detector
    pub arbitrage_cache_capacity: usize,
    /// Swap records kept per token
    pub swap_history_capacity: usize,
    /// Outbound calls allowed per endpoint in each interval
    pub requests_per_interval: u32,
    /// Token bucket interval in milliseconds, 0 disables limiting
    pub rate_limit_interval_ms: u64,
    /// Buffer size of the per-pool log channels and event broadcasts
    pub channel_buffer_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: DEFAULT_STALENESS_THRESHOLD_SECS,
            arbitrage_cache_capacity: DEFAULT_ARBITRAGE_CACHE_CAPACITY,
            swap_history_capacity: DEFAULT_SWAP_HISTORY_CAPACITY,
            requests_per_interval: DEFAULT_REQUESTS_PER_INTERVAL,
            rate_limit_interval_ms: DEFAULT_RATE_LIMIT_INTERVAL_MS,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
        }
    }
}

fn env_override<T: FromStr>(name: &str, target: &mut T) -> eyre::Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(name) {
        *target = raw.parse().map_err(|e| eyre::eyre!("Invalid {}: {}", name, e))?;
    }
    Ok(())
}

impl FeedConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> eyre::Result<Self> {
        let mut config = Self::default();

        env_override("FEED_STALENESS_THRESHOLD_SECS", &mut config.staleness_threshold_secs)?;
        env_override("FEED_ARBITRAGE_CACHE_CAPACITY", &mut config.arbitrage_cache_capacity)?;
        env_override("FEED_SWAP_HISTORY_CAPACITY", &mut config.swap_history_capacity)?;
        env_override("FEED_REQUESTS_PER_INTERVAL", &mut config.requests_per_interval)?;
        env_override("FEED_RATE_LIMIT_INTERVAL_MS", &mut config.rate_limit_interval_ms)?;
        env_override("FEED_CHANNEL_BUFFER_SIZE", &mut config.channel_buffer_size)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.arbitrage_cache_capacity == 0 {
            eyre::bail!("arbitrage_cache_capacity must be positive");
        }
        if self.swap_history_capacity == 0 {
            eyre::bail!("swap_history_capacity must be positive");
        }
        if self.requests_per_interval == 0 {
            eyre::bail!("requests_per_interval must be positive");
        }
        if self.channel_buffer_size == 0 {
            eyre::bail!("channel_buffer_size must be positive");
        }
        Ok(())
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_interval_ms)
    }
}

#[derive(Debug, Deserialize)]
struct FeedConfigFile {
    #[serde(default)]
    feed: FeedConfig,
}

impl TryFrom<FeedConfigFile> for FeedConfig {
    type Error = LoadConfigError;

    fn try_from(file: FeedConfigFile) -> Result<Self, Self::Error> {
        file.feed.validate().map_err(|e| LoadConfigError::ConfigError(e.to_string()))?;
        Ok(file.feed)
    }
}

#[async_trait]
impl FeedConfigLoader for FeedConfig {
    type SectionType = FeedConfig;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let file: FeedConfigFile = load_from_file(file_name).await?;
        file.try_into()
    }
}

impl FeedConfigLoaderSync for FeedConfig {
    type SectionType = FeedConfig;

    fn load_section_from_file_sync(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let file: FeedConfigFile = load_from_file_sync(file_name)?;
        file.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_config;

    #[test]
    fn test_default_config() {
        let config = FeedConfig::default();
        assert_eq!(config.staleness_threshold_secs, 30);
        assert_eq!(config.arbitrage_cache_capacity, 30);
        assert_eq!(config.swap_history_capacity, 1000);
        assert_eq!(config.requests_per_interval, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations() {
        let config = FeedConfig::default();
        assert_eq!(config.staleness_threshold(), Duration::from_secs(30));
        assert_eq!(config.rate_limit_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_feed_section() {
        let raw = r#"
            [feed]
            staleness_threshold_secs = 10
            arbitrage_cache_capacity = 5
        "#;
        let file: FeedConfigFile = parse_config(raw).unwrap();
        let config = FeedConfig::try_from(file).unwrap();
        assert_eq!(config.staleness_threshold_secs, 10);
        assert_eq!(config.arbitrage_cache_capacity, 5);
        // unspecified keys keep their defaults
        assert_eq!(config.swap_history_capacity, 1000);
    }

    #[test]
    fn test_invalid_section_is_rejected() {
        let raw = "[feed]\narbitrage_cache_capacity = 0\n";
        let file: FeedConfigFile = parse_config(raw).unwrap();
        assert!(matches!(FeedConfig::try_from(file), Err(LoadConfigError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let path = std::env::temp_dir().join("hertz_feed_config_test.toml");
        tokio::fs::write(&path, "[feed]\nrequests_per_interval = 8\n").await.unwrap();

        let config = FeedConfig::load_section_from_file(path.to_string_lossy().to_string()).await.unwrap();
        assert_eq!(config.requests_per_interval, 8);

        let config = FeedConfig::load_section_from_file_sync(path.to_string_lossy().to_string()).unwrap();
        assert_eq!(config.requests_per_interval, 8);
        let _ = std::fs::remove_file(path);
    }
}
