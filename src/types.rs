//! Shared value types: frequency keys, bank state, snapshots and the session clock.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Map key for a target frequency. `f32` has no total order, so keys are
/// wrapped; iteration over the bank's maps is ascending in frequency.
pub type FrequencyKey = OrderedFloat<f32>;

// ─── Bank status ────────────────────────────────────────────────────────────

/// Lifecycle of an initialized bank. The uninitialized state is the bank
/// not existing (before `initialize` or after `cleanup`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankState {
    /// Capture thread parked on the stopped flag
    Idle,
    /// Capture thread reading and analyzing blocks
    Streaming,
}

// ─── Published analysis ─────────────────────────────────────────────────────

/// One analyzed cycle, pushed to subscribers after the values are published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Capture cycle index, starting at 1
    pub cycle: u64,
    /// Microseconds since the bank was initialized
    pub timestamp_us: u64,
    /// (frequency Hz, normalized magnitude), ascending by frequency
    pub magnitudes: Vec<(f32, f32)>,
    /// Wideband contrast for the block, when enabled
    pub wideband: Option<f32>,
    /// RMS of the raw input block
    pub input_rms: f32,
}

impl Snapshot {
    pub fn magnitude(&self, frequency: f32) -> Option<f32> {
        self.magnitudes
            .iter()
            .find(|(f, _)| *f == frequency)
            .map(|&(_, m)| m)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:<6} t={:>10}µs  rms={:.3}",
            self.cycle, self.timestamp_us, self.input_rms
        )?;
        if let Some(w) = self.wideband {
            write!(f, "  wb={:+.2}", w)?;
        }
        for (freq, mag) in &self.magnitudes {
            write!(f, "  {:.1}Hz={:.3}", freq, mag)?;
        }
        Ok(())
    }
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the capture session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_lookup_and_display() {
        let snap = Snapshot {
            cycle: 3,
            timestamp_us: 32_000,
            magnitudes: vec![(440.0, 0.5), (1000.0, 1.0)],
            wideband: Some(0.8),
            input_rms: 0.7,
        };
        assert_eq!(snap.magnitude(1000.0), Some(1.0));
        assert_eq!(snap.magnitude(500.0), None);
        let line = snap.to_string();
        assert!(line.contains("1000.0Hz=1.000"), "{}", line);
        assert!(line.contains("wb=+0.80"), "{}", line);
    }

    #[test]
    fn test_frequency_keys_order() {
        let mut keys = vec![FrequencyKey::from(1000.0), FrequencyKey::from(440.0)];
        keys.sort();
        assert_eq!(keys[0].into_inner(), 440.0);
    }
}
