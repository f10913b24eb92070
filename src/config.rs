//! Bank configuration: sample rate, block size and normalization policy.
//!
//! Every field has a default, so a JSON file only needs the keys it changes.

use crate::error::ConfigError;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Capture sample rate (Hz)
    pub sample_rate: u32,
    /// Samples per analysis block (N)
    pub block_size: usize,
    /// Per-step decay of the normalization reference when no new peak arrives
    pub decay: f32,
    /// Lower bound for the normalization reference
    pub normalization_floor: f32,
    /// Consecutive capture failures before the capture thread pauses streaming
    pub max_capture_failures: u32,
    /// Run the wideband two-band sensor on every block
    pub wideband: bool,
    /// Per-subscriber snapshot queue length
    pub snapshot_capacity: usize,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 512,
            decay: 0.99,
            normalization_floor: 1e-6,
            max_capture_failures: 5,
            wideband: true,
            snapshot_capacity: 64,
        }
    }
}

impl BankConfig {
    /// Load from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        info!("Loaded bank config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be positive".into()));
        }
        if !(self.decay > 0.0 && self.decay < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "decay must be in (0, 1), got {}",
                self.decay
            )));
        }
        if self.normalization_floor.is_nan() || self.normalization_floor <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "normalization_floor must be positive, got {}",
                self.normalization_floor
            )));
        }
        if self.max_capture_failures == 0 {
            return Err(ConfigError::Invalid(
                "max_capture_failures must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Wall-clock duration of one block: block_size / sample_rate.
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }
}
