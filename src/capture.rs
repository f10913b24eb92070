//! Capture adapter seam and the simulated tone source.

use crate::error::CaptureError;
use log::{debug, info};
use std::f64::consts::PI;

/// Blocking source of fixed-size mono sample blocks.
///
/// The bank's capture thread owns the source, so implementations must be
/// `Send`. `read_block` is expected to return within roughly one block period.
pub trait CaptureSource: Send {
    /// Names of the sources this adapter can switch to.
    fn enumerate_sources(&mut self) -> Result<Vec<String>, CaptureError>;

    /// Switch to the named source. Fails with `InvalidSource` for an unknown name.
    fn select_source(&mut self, name: &str) -> Result<(), CaptureError>;

    /// Called before the first read after streaming starts or resumes.
    /// Sources that keep capturing while the bank is stopped drop that
    /// backlog here, so the next block is current input.
    fn resume(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Fill `frame` completely with the next samples.
    fn read_block(&mut self, frame: &mut [f32]) -> Result<(), CaptureError>;
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn enumerate_sources(&mut self) -> Result<Vec<String>, CaptureError> {
        (**self).enumerate_sources()
    }

    fn select_source(&mut self, name: &str) -> Result<(), CaptureError> {
        (**self).select_source(name)
    }

    fn resume(&mut self) -> Result<(), CaptureError> {
        (**self).resume()
    }

    fn read_block(&mut self, frame: &mut [f32]) -> Result<(), CaptureError> {
        (**self).read_block(frame)
    }
}

/// A named mix of sine tones.
#[derive(Debug, Clone)]
pub struct TonePreset {
    pub name: String,
    /// (frequency Hz, amplitude)
    pub tones: Vec<(f64, f64)>,
}

impl TonePreset {
    pub fn new(name: impl Into<String>, tones: &[(f64, f64)]) -> Self {
        Self {
            name: name.into(),
            tones: tones.to_vec(),
        }
    }
}

/// Synthetic capture source generating sine mixes without any hardware.
///
/// Generation is driven by a monotonic sample counter, so consecutive blocks
/// are phase-continuous regardless of how fast they are read.
pub struct SimulatedSource {
    sample_rate: u32,
    presets: Vec<TonePreset>,
    current: usize,
    sample_counter: u64,
}

impl SimulatedSource {
    /// Built-in presets: `silence`, `sine-440`, `sine-1000`, `dual-440-1000`.
    /// Starts on `sine-1000`.
    pub fn new(sample_rate: u32) -> Self {
        let presets = vec![
            TonePreset::new("silence", &[]),
            TonePreset::new("sine-440", &[(440.0, 0.8)]),
            TonePreset::new("sine-1000", &[(1000.0, 1.0)]),
            TonePreset::new("dual-440-1000", &[(440.0, 0.5), (1000.0, 0.5)]),
        ];
        Self {
            sample_rate,
            presets,
            current: 2,
            sample_counter: 0,
        }
    }

    /// Add a preset (replacing one with the same name) and make it current.
    pub fn with_preset(mut self, preset: TonePreset) -> Self {
        match self.presets.iter().position(|p| p.name == preset.name) {
            Some(i) => {
                self.presets[i] = preset;
                self.current = i;
            }
            None => {
                self.presets.push(preset);
                self.current = self.presets.len() - 1;
            }
        }
        self
    }

    pub fn current(&self) -> &TonePreset {
        &self.presets[self.current]
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_at(&self, index: u64) -> f32 {
        let t = index as f64 / self.sample_rate as f64;
        self.current()
            .tones
            .iter()
            .map(|&(freq, amp)| amp * (2.0 * PI * freq * t).sin())
            .sum::<f64>() as f32
    }
}

impl CaptureSource for SimulatedSource {
    fn enumerate_sources(&mut self) -> Result<Vec<String>, CaptureError> {
        Ok(self.presets.iter().map(|p| p.name.clone()).collect())
    }

    fn select_source(&mut self, name: &str) -> Result<(), CaptureError> {
        let index = self
            .presets
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| CaptureError::InvalidSource(name.to_string()))?;
        self.current = index;
        info!("Simulated source: {}", name);
        Ok(())
    }

    fn read_block(&mut self, frame: &mut [f32]) -> Result<(), CaptureError> {
        let start = self.sample_counter;
        for (i, sample) in frame.iter_mut().enumerate() {
            *sample = self.sample_at(start + i as u64);
        }
        if start == 0 {
            debug!("Simulated source producing {}-sample blocks", frame.len());
        }
        self.sample_counter += frame.len() as u64;
        Ok(())
    }
}
