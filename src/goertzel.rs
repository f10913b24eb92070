//! Single-bin Goertzel detector.
//!
//! Much cheaper than an FFT when only a handful of frequencies matter: every
//! sample costs one multiply-add against a fixed coefficient, and the bin
//! magnitude falls out of the last two registers at the end of the block.

use crate::error::DspError;
use std::f64::consts::PI;

/// Recursive detector tuned to one target frequency.
///
/// Feed samples with [`update`](Self::update) and read the bin with
/// [`execute`](Self::execute), or do both at once with
/// [`execute_block`](Self::execute_block). Registers must be cleared between
/// independent blocks, otherwise energy from the previous block leaks into the
/// next estimate; `execute_block` does this itself.
#[derive(Debug, Clone)]
pub struct Goertzel {
    frequency: f32,
    sample_rate: u32,
    /// Feedback coefficient, 2·cos θ
    iir: f64,
    fir_cos: f64,
    fir_sin: f64,
    s0: f64,
    s1: f64,
    s2: f64,
}

impl Goertzel {
    /// Build a detector for `frequency`. Fails unless 0 ≤ frequency < sample_rate/2.
    pub fn new(frequency: f32, sample_rate: u32) -> Result<Self, DspError> {
        if sample_rate == 0 {
            return Err(DspError::InvalidSampleRate);
        }
        let mut detector = Self {
            frequency: 0.0,
            sample_rate,
            iir: 2.0,
            fir_cos: 1.0,
            fir_sin: 0.0,
            s0: 0.0,
            s1: 0.0,
            s2: 0.0,
        };
        detector.set(frequency)?;
        Ok(detector)
    }

    /// Re-tune to a new frequency. Registers are cleared; on error the
    /// detector keeps its previous tuning.
    pub fn set(&mut self, frequency: f32) -> Result<(), DspError> {
        if !frequency.is_finite() || frequency < 0.0 {
            return Err(DspError::InvalidFrequency(frequency));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if frequency >= nyquist {
            return Err(DspError::AboveNyquist { frequency, nyquist });
        }

        let theta = 2.0 * PI * frequency as f64 / self.sample_rate as f64;
        self.frequency = frequency;
        self.iir = 2.0 * theta.cos();
        self.fir_cos = theta.cos();
        self.fir_sin = theta.sin();
        self.clear();
        Ok(())
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn clear(&mut self) {
        self.s0 = 0.0;
        self.s1 = 0.0;
        self.s2 = 0.0;
    }

    /// One step of s[n] = x[n] + 2·cos θ·s[n-1] − s[n-2]
    #[inline]
    pub fn update(&mut self, sample: f32) {
        self.s0 = sample as f64 + self.iir * self.s1 - self.s2;
        self.s2 = self.s1;
        self.s1 = self.s0;
    }

    /// Bin magnitude for the samples fed since the last clear.
    #[inline]
    pub fn execute(&self) -> f64 {
        let power = self.s1 * self.s1 + self.s2 * self.s2 - self.iir * self.s1 * self.s2;
        power.max(0.0).sqrt()
    }

    /// Clear, feed the whole block, return the magnitude.
    pub fn execute_block(&mut self, samples: &[f32]) -> f64 {
        self.clear();
        for &sample in samples {
            self.update(sample);
        }
        self.execute()
    }

    /// Real and imaginary parts of the bin for the samples fed so far.
    pub fn components(&self) -> (f64, f64) {
        (self.s1 - self.fir_cos * self.s2, self.fir_sin * self.s2)
    }

    /// Bin phase in radians, in (−π, π].
    pub fn phase(&self) -> f64 {
        let (re, im) = self.components();
        im.atan2(re)
    }

    /// Peak amplitude estimate of an on-bin tone over a block of `block_len`
    /// samples: 2·|X| / N.
    pub fn amplitude(&self, block_len: usize) -> f64 {
        if block_len == 0 {
            return 0.0;
        }
        2.0 * self.execute() / block_len as f64
    }
}
