use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use anyhow::Result;

pub const HCELINK_PORT: u16 = 24110;
pub const DEFAULT_CONFIG_FILE: &str = "hcelink.toml";

/// Tunables of the chunked transfer engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransferConfig {
    pub max_chunk_size: usize,
    pub chunk_delay_ms: u64,
    /// Zero disables retrying
    pub retry_timeout_ms: u64,
    pub max_attempts: u32,
    pub transfer_timeout_ms: u64,
    /// Characters of message text shown in status events
    pub display_limit: usize,
    pub reconnect_interval_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 2048,
            chunk_delay_ms: 50,
            retry_timeout_ms: 5000,
            max_attempts: 3,
            transfer_timeout_ms: 30_000,
            display_limit: 64,
            reconnect_interval_ms: 250,
        }
    }
}

impl TransferConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn retry_timeout(&self) -> Option<Duration> {
        (self.retry_timeout_ms > 0).then(|| Duration::from_millis(self.retry_timeout_ms))
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Clamp values that would stall the engine
    pub fn sanitized(mut self) -> Self {
        if self.max_chunk_size == 0 {
            tracing::warn!("max_chunk_size of 0 is invalid, using 1");
            self.max_chunk_size = 1;
        }
        if self.max_attempts == 0 {
            tracing::warn!("max_attempts of 0 is invalid, using 1");
            self.max_attempts = 1;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub listen_address: String,
    pub target_address: String,
    /// Content served by GET_DATA and the NDEF data file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged_content: Option<String>,
    pub transfer: TransferConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_address: format!("127.0.0.1:{}", HCELINK_PORT),
            target_address: format!("127.0.0.1:{}", HCELINK_PORT),
            staged_content: None,
            transfer: TransferConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn load_or_create(config_path: Option<&str>) -> Result<Self> {
        let config_file = config_path.unwrap_or(DEFAULT_CONFIG_FILE);

        if Path::new(config_file).exists() {
            let content = std::fs::read_to_string(config_file)?;
            let config: BridgeConfig = toml::from_str(&content)?;
            tracing::debug!("Loaded config from {}", config_file);
            Ok(config)
        } else {
            let config = Self::default();
            config.save(config_file)?;
            tracing::info!("Created default config: {}", config_file);
            Ok(config)
        }
    }

    pub fn save(&self, config_path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}
