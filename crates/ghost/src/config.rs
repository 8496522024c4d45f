use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::net::DEFAULT_PORT;
use crate::sync::DEFAULT_UPDATE_RATE;

pub const DEFAULT_GHOST_BUFFER_MS: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GhostConfig {
    pub address: String,
    pub port: u16,
    pub color: [u8; 3],
    pub name: String,
    /// Levels that end the session when loaded.
    pub terminal_levels: Vec<String>,
    /// How far behind a ghost's estimated clock it is displayed, trading latency for smoothness.
    pub ghost_buffer_ms: u32,
    pub update_rate: u32,
    pub connect_timeout_ms: u64,
}

impl Default for GhostConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_owned(),
            port: DEFAULT_PORT,
            color: [255, 255, 255],
            name: "Ghost".to_owned(),
            terminal_levels: vec!["TitleScreen".to_owned(), "EndScreen".to_owned()],
            ghost_buffer_ms: DEFAULT_GHOST_BUFFER_MS,
            update_rate: DEFAULT_UPDATE_RATE,
            connect_timeout_ms: 2000,
        }
    }
}

impl GhostConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_rate == 0 {
            return Err(ConfigError::Invalid("update_rate must be positive".to_owned()));
        }
        if self.address.is_empty() {
            return Err(ConfigError::Invalid("address must not be empty".to_owned()));
        }
        Ok(())
    }

    pub fn is_terminal_level(&self, level: &str) -> bool {
        self.terminal_levels.iter().any(|l| l == level)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
