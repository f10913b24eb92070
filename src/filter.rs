//! Direct-form FIR/IIR filter primitives and a second-order-sections cascade.

use crate::error::DspError;
use std::ops::Index;

static SILENT: f32 = 0.0;

/// Fixed-capacity circular history. `line[0]` is the most recent sample,
/// `line[k]` the sample pushed k steps earlier.
#[derive(Debug, Clone)]
pub struct DelayLine {
    memory: Vec<f32>,
    index: usize,
}

impl DelayLine {
    pub fn new(capacity: usize) -> Self {
        Self {
            memory: vec![0.0; capacity],
            index: 0,
        }
    }

    pub fn push(&mut self, sample: f32) {
        if self.memory.is_empty() {
            return;
        }
        self.memory[self.index] = sample;
        self.index = (self.index + 1) % self.memory.len();
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn clear(&mut self) {
        self.memory.fill(0.0);
        self.index = 0;
    }

    /// Σ coefficients[k]·self[k]
    fn weighted_sum(&self, coefficients: &[f32]) -> f32 {
        coefficients
            .iter()
            .enumerate()
            .map(|(k, c)| c * self[k])
            .sum()
    }
}

impl Index<usize> for DelayLine {
    type Output = f32;

    /// Out-of-range ages wrap around the line; an empty line reads as zero.
    fn index(&self, age: usize) -> &f32 {
        let len = self.memory.len();
        if len == 0 {
            return &SILENT;
        }
        &self.memory[(len + self.index - (age % len) - 1) % len]
    }
}

/// Direct-form I filter:
///
/// y[n] = Σ fir[k]·x[n−k] − Σ iir[k]·y[n−1−k]
///
/// The leading feedback coefficient (a0 = 1) is implied, so `iir` holds
/// a1, a2, … in order.
#[derive(Debug, Clone)]
pub struct Filter {
    fir: Vec<f32>,
    iir: Vec<f32>,
    fir_mem: DelayLine,
    iir_mem: DelayLine,
}

impl Filter {
    pub fn new(fir: Vec<f32>, iir: Vec<f32>) -> Result<Self, DspError> {
        if fir.is_empty() {
            return Err(DspError::EmptyFilter);
        }
        let fir_mem = DelayLine::new(fir.len());
        let iir_mem = DelayLine::new(iir.len());
        Ok(Self {
            fir,
            iir,
            fir_mem,
            iir_mem,
        })
    }

    /// One biquad section from `[b0, b1, b2]` and `[a1, a2]`.
    pub fn biquad(b: [f32; 3], a: [f32; 2]) -> Self {
        Self {
            fir: b.to_vec(),
            iir: a.to_vec(),
            fir_mem: DelayLine::new(3),
            iir_mem: DelayLine::new(2),
        }
    }

    pub fn execute(&mut self, sample: f32) -> f32 {
        self.fir_mem.push(sample);
        let feed_forward = self.fir_mem.weighted_sum(&self.fir);
        let feedback = self.iir_mem.weighted_sum(&self.iir);
        let output = feed_forward - feedback;
        self.iir_mem.push(output);
        output
    }

    pub fn clear(&mut self) {
        self.fir_mem.clear();
        self.iir_mem.clear();
    }
}

/// Cascade of biquad sections applied in construction order.
///
/// Sections are never reordered: cascaded biquads are only equivalent in
/// exact arithmetic.
#[derive(Debug, Clone)]
pub struct Sos {
    sections: Vec<Filter>,
}

impl Sos {
    pub fn new(coefficients: &[([f32; 3], [f32; 2])]) -> Self {
        Self {
            sections: coefficients
                .iter()
                .map(|&(b, a)| Filter::biquad(b, a))
                .collect(),
        }
    }

    pub fn order(&self) -> usize {
        self.sections.len()
    }

    pub fn execute(&mut self, sample: f32) -> f32 {
        self.sections
            .iter_mut()
            .fold(sample, |acc, section| section.execute(acc))
    }

    pub fn clear(&mut self) {
        for section in &mut self.sections {
            section.clear();
        }
    }
}
