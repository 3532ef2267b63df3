use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::core::note::MAX_CHANNEL;
use crate::error::{AccompanistError, AccompanistResult};

/// Construction-time settings for the accompanist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccompanistConfig {
    /// Number of accompanying voices the oracle produces
    pub voices: usize,
    /// Tempo in beats per minute
    pub bpm: u32,
    /// Metric subdivision of a quarter note (4 gives sixteenths)
    pub ticks_per_quarter: u32,
    /// MIDI channel for the accompaniment (0-15)
    pub channel: u8,
    /// Strike probability above which a raw model output attacks a note
    pub strike_threshold: f32,
    /// Consecutive transient oracle failures before the accompaniment is cut
    pub max_consecutive_failures: u32,
}

impl Default for AccompanistConfig {
    fn default() -> Self {
        Self {
            voices: 3,
            bpm: 100,
            ticks_per_quarter: 4,
            channel: 0,
            strike_threshold: 0.5,
            max_consecutive_failures: 3,
        }
    }
}

impl AccompanistConfig {
    pub fn validate(&self) -> AccompanistResult<()> {
        let invalid = |msg: String| -> AccompanistResult<()> { Err(AccompanistError::InvalidConfig(msg)) };
        if self.voices == 0 {
            return invalid("voices must be at least 1".to_string());
        }
        if self.bpm == 0 {
            return invalid("bpm must be at least 1".to_string());
        }
        if self.ticks_per_quarter == 0 {
            return invalid("ticks_per_quarter must be at least 1".to_string());
        }
        if self.channel > MAX_CHANNEL {
            return invalid(format!("channel {} is outside 0..=15", self.channel));
        }
        if !(0.0..=1.0).contains(&self.strike_threshold) {
            return invalid(format!("strike_threshold {} is outside [0, 1]", self.strike_threshold));
        }
        if self.max_consecutive_failures == 0 {
            return invalid("max_consecutive_failures must be at least 1".to_string());
        }
        Ok(())
    }

    /// Length of one tick in milliseconds, before integer rounding
    pub fn tick_ms(&self) -> f64 {
        60_000.0 / f64::from(self.bpm) / f64::from(self.ticks_per_quarter)
    }

    /// `<config dir>/accompanist/config.json`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("accompanist").join("config.json"))
    }

    /// Save configuration as pretty JSON, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        let mut file = File::create(path).context("Failed to create config file")?;
        file.write_all(json.as_bytes()).context("Failed to write config data")?;

        Ok(())
    }

    /// Load and validate configuration from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open config file {}", path.display()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).context("Failed to read config file")?;

        let config: Self = serde_json::from_str(&contents).context("Failed to parse config data")?;
        config.validate()?;

        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            log::info!("[CONFIG] {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AccompanistConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_ms(), 150.0);
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            AccompanistConfig { voices: 0, ..Default::default() },
            AccompanistConfig { bpm: 0, ..Default::default() },
            AccompanistConfig { ticks_per_quarter: 0, ..Default::default() },
            AccompanistConfig { channel: 16, ..Default::default() },
            AccompanistConfig { strike_threshold: 1.5, ..Default::default() },
            AccompanistConfig { max_consecutive_failures: 0, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(AccompanistError::InvalidConfig(_))), "{config:?}");
        }
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AccompanistConfig { bpm: 120, voices: 2, ..Default::default() };
        config.save_to_file(&path).unwrap();
        assert_eq!(AccompanistConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: AccompanistConfig = serde_json::from_str(r#"{ "bpm": 90 }"#).unwrap();
        assert_eq!(config.bpm, 90);
        assert_eq!(config.voices, 3);
    }

    #[test]
    fn invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "channel": 40 }"#).unwrap();
        assert!(AccompanistConfig::load_from_file(&path).is_err());
        assert_eq!(
            AccompanistConfig::load_or_default(&dir.path().join("absent.json")).unwrap(),
            AccompanistConfig::default()
        );
    }
}
