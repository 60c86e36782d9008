//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::constants::{FRAME_QUEUE_CAPACITY, HOLD_REPEAT_INTERVAL_MS};
use crate::error::{Error, Result};

/// Tunables for the duplication pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded frame queue capacity per destination, in frames
    #[serde(default = "default_queue_capacity")]
    pub frame_queue_capacity: usize,

    /// Fixed stream buffer size in frames; `None` lets the backend choose
    #[serde(default)]
    pub stream_buffer_size: Option<u32>,

    /// Interval between held-volume repeat ticks, in milliseconds
    #[serde(default = "default_hold_repeat_ms")]
    pub hold_repeat_ms: u64,
}

fn default_queue_capacity() -> usize {
    FRAME_QUEUE_CAPACITY
}

fn default_hold_repeat_ms() -> u64 {
    HOLD_REPEAT_INTERVAL_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: FRAME_QUEUE_CAPACITY,
            stream_buffer_size: None,
            hold_repeat_ms: HOLD_REPEAT_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML configuration string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> Result<()> {
        if self.frame_queue_capacity == 0 {
            return Err(Error::Config(
                "frame_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.hold_repeat_ms == 0 {
            return Err(Error::Config(
                "hold_repeat_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.frame_queue_capacity, FRAME_QUEUE_CAPACITY);
        assert_eq!(config.hold_repeat_ms, HOLD_REPEAT_INTERVAL_MS);
        assert!(config.stream_buffer_size.is_none());
    }

    #[test]
    fn test_parses_partial_toml() {
        let config = EngineConfig::from_toml_str("frame_queue_capacity = 8\n").unwrap();
        assert_eq!(config.frame_queue_capacity, 8);
        assert_eq!(config.hold_repeat_ms, HOLD_REPEAT_INTERVAL_MS);
    }

    #[test]
    fn test_parses_stream_buffer_size() {
        let config = EngineConfig::from_toml_str("stream_buffer_size = 480\n").unwrap();
        assert_eq!(config.stream_buffer_size, Some(480));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let result = EngineConfig::from_toml_str("frame_queue_capacity = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_repeat_interval() {
        let result = EngineConfig::from_toml_str("hold_repeat_ms = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(EngineConfig::from_toml_str("frame_queue_capacity = \"lots\"").is_err());
    }
}
