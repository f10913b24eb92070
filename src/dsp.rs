//! Shared block statistics and test signal generators.

/// Mean of the squared samples. Zero for an empty block.
pub fn mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    sum / samples.len() as f32
}

/// Root mean square of an audio buffer.
pub fn compute_rms(samples: &[f32]) -> f32 {
    mean_square(samples).sqrt()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_full_scale_sine() {
        let s = test_helpers::sine_wave(1000.0, 1.0, 48000, 4800);
        let rms = compute_rms(&s);
        assert!((rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3, "rms={}", rms);
    }

    #[test]
    fn test_empty_block_is_silent() {
        assert_eq!(mean_square(&[]), 0.0);
    }
}
