//! Wideband amplitude sensor: compares block energy below and above a
//! quarter-band split.

use crate::filter::Sos;

/// `[b, a] = ellip(4, 0.5, 20, 0.25); sos = tf2sos(b, a)`
///
/// 4th-order elliptic low-pass, 0.5 dB passband ripple, 20 dB stopband,
/// cutoff at a quarter of the Nyquist frequency.
pub const QUARTER_BAND_LOWPASS: [([f32; 3], [f32; 2]); 2] = [
    ([0.120960, -0.019523, 0.120960], [-1.152464, 0.462928]),
    ([1.000000, -1.234695, 1.000000], [-1.322280, 0.902983]),
];

/// Mean-square energy of each side of the split for one block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BandEnergy {
    pub lower: f32,
    pub upper: f32,
}

impl BandEnergy {
    /// (lower − upper) / (lower + upper), in [−1, 1]. Zero only when both
    /// bands are exactly silent; the ratio is independent of signal level.
    pub fn contrast(&self) -> f32 {
        let total = self.lower + self.upper;
        if total <= f32::MIN_POSITIVE {
            return 0.0;
        }
        ((self.lower - self.upper) / total).clamp(-1.0, 1.0)
    }
}

/// Only the low-pass cascade carries state from one block to the next.
#[derive(Debug, Clone)]
pub struct Wbas {
    lowpass: Sos,
}

impl Wbas {
    pub fn new() -> Self {
        Self::with_sections(&QUARTER_BAND_LOWPASS)
    }

    /// Use a different low-pass design for the lower band.
    pub fn with_sections(sections: &[([f32; 3], [f32; 2])]) -> Self {
        Self {
            lowpass: Sos::new(sections),
        }
    }

    /// Split the block and measure both bands. The upper band is the
    /// whole band minus the filtered lower band.
    pub fn bands(&mut self, samples: &[f32]) -> BandEnergy {
        if samples.is_empty() {
            return BandEnergy::default();
        }
        let mut lower_sum = 0.0f32;
        let mut upper_sum = 0.0f32;
        for &sample in samples {
            let lower = self.lowpass.execute(sample);
            let upper = sample - lower;
            lower_sum += lower * lower;
            upper_sum += upper * upper;
        }
        let n = samples.len() as f32;
        BandEnergy {
            lower: lower_sum / n,
            upper: upper_sum / n,
        }
    }

    /// Presence/strength score for one block, see [`BandEnergy::contrast`].
    pub fn execute(&mut self, samples: &[f32]) -> f32 {
        self.bands(samples).contrast()
    }

    pub fn clear(&mut self) {
        self.lowpass.clear();
    }
}

impl Default for Wbas {
    fn default() -> Self {
        Self::new()
    }
}
