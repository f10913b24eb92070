//! Adaptive smoother built on a single Goertzel detector.
//!
//! # Recursion
//!
//! A block is cut into `iterations` slices. Each slice yields an "area"
//! `amplitude^power`, where amplitude is the detector's on-bin estimate
//! (2·|X|/N). The areas are followed by an asymmetric one-pole: `alpha` is
//! the step toward a rising area, `beta` toward a falling one. The level
//! after the last slice is the block's area.
//!
//! Across blocks, the estimate only tracks areas at or above `trust`
//! (moving by `alpha`); below it the estimate decays by `(1 − beta)`.

use crate::error::DspError;
use crate::goertzel::Goertzel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasParams {
    /// Step toward a rising or trusted value, 0.0–1.0
    pub alpha: f32,
    /// Step toward a falling value and per-block decay when untrusted, 0.0–1.0
    pub beta: f32,
    /// Number of slices per block
    pub iterations: usize,
    /// Exponent applied to the slice amplitude
    pub power: f32,
    /// Minimum block area that updates the estimate
    pub trust: f32,
}

impl BasParams {
    pub fn validate(&self) -> Result<(), DspError> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(DspError::InvalidParameter(format!(
                "alpha must be in [0, 1], got {}",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(DspError::InvalidParameter(format!(
                "beta must be in [0, 1], got {}",
                self.beta
            )));
        }
        if self.iterations == 0 {
            return Err(DspError::InvalidParameter("iterations must be at least 1".into()));
        }
        if self.power.is_nan() || self.power <= 0.0 {
            return Err(DspError::InvalidParameter(format!(
                "power must be positive, got {}",
                self.power
            )));
        }
        if self.trust.is_nan() || self.trust < 0.0 {
            return Err(DspError::InvalidParameter(format!(
                "trust must be non-negative, got {}",
                self.trust
            )));
        }
        Ok(())
    }
}

impl Default for BasParams {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            beta: 0.2,
            iterations: 4,
            power: 1.0,
            trust: 0.01,
        }
    }
}

pub struct Bas {
    params: BasParams,
    analyzer: Goertzel,
    estimate: Option<f32>,
}

impl Bas {
    pub fn new(params: BasParams, frequency: f32, sample_rate: u32) -> Result<Self, DspError> {
        params.validate()?;
        Ok(Self {
            params,
            analyzer: Goertzel::new(frequency, sample_rate)?,
            estimate: None,
        })
    }

    /// Replace the hyperparameters, keeping the detector and current estimate.
    pub fn set(&mut self, params: BasParams) -> Result<(), DspError> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    /// Re-tune the owned detector.
    pub fn tune(&mut self, frequency: f32) -> Result<(), DspError> {
        self.analyzer.set(frequency)
    }

    pub fn params(&self) -> &BasParams {
        &self.params
    }

    pub fn frequency(&self) -> f32 {
        self.analyzer.frequency()
    }

    pub fn estimate(&self) -> Option<f32> {
        self.estimate
    }

    pub fn reset(&mut self) {
        self.analyzer.clear();
        self.estimate = None;
    }

    /// Smoothed slice area for one block.
    pub fn nth_area(&mut self, samples: &[f32], alpha: f32, beta: f32) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let slices = self.params.iterations.min(samples.len());
        let slice_len = samples.len().div_ceil(slices);

        let mut level: Option<f32> = None;
        for slice in samples.chunks(slice_len) {
            self.analyzer.execute_block(slice);
            let area = (self.analyzer.amplitude(slice.len()) as f32).powf(self.params.power);
            level = Some(match level {
                None => area,
                Some(l) => {
                    let step = if area > l { alpha } else { beta };
                    l + step * (area - l)
                }
            });
        }
        self.analyzer.clear();
        level.unwrap_or(0.0)
    }

    /// Update and return the block-to-block estimate.
    pub fn execute(&mut self, samples: &[f32]) -> f32 {
        let BasParams {
            alpha, beta, trust, ..
        } = self.params;
        let area = self.nth_area(samples, alpha, beta);

        let next = if area >= trust {
            match self.estimate {
                None => area,
                Some(e) => e + alpha * (area - e),
            }
        } else {
            self.estimate.unwrap_or(0.0) * (1.0 - beta)
        };
        self.estimate = Some(next);
        next
    }
}
