//! End-to-end tests for the analyzer bank.
//!
//! These drive the real capture thread:
//!   CaptureSource → frame → Goertzel detectors → published values / Snapshot channel
//!
//! The simulated source produces phase-continuous tones, so every test can
//! check detector output against a known input.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use goertzel_bank::bank::AnalyzerBank;
use goertzel_bank::capture::{CaptureSource, SimulatedSource, TonePreset};
use goertzel_bank::config::BankConfig;
use goertzel_bank::error::{BankError, CaptureError, DspError};
use goertzel_bank::goertzel::Goertzel;
use goertzel_bank::types::BankState;

// ─── Helpers ───────────────────────────────────────────────────────────────

const TIMEOUT: Duration = Duration::from_secs(3);

/// Generate a sine block at the given frequency.
fn sine(freq: f64, amp: f64, sr: u32, n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| (amp * (2.0 * std::f64::consts::PI * freq * i as f64 / sr as f64).sin()) as f32)
        .collect()
}

/// Poll `cond` until it holds or the timeout expires.
fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn simulated_bank(config: BankConfig) -> AnalyzerBank {
    let source = SimulatedSource::new(config.sample_rate);
    AnalyzerBank::initialize(config, source).unwrap()
}

/// Source whose reads always fail, as an unplugged device would.
struct UnpluggedSource;

impl CaptureSource for UnpluggedSource {
    fn enumerate_sources(&mut self) -> Result<Vec<String>, CaptureError> {
        Ok(vec!["usb-mic".into()])
    }

    fn select_source(&mut self, _name: &str) -> Result<(), CaptureError> {
        Ok(())
    }

    fn read_block(&mut self, _frame: &mut [f32]) -> Result<(), CaptureError> {
        Err(CaptureError::Stream("device unplugged".into()))
    }
}

/// Device that keeps capturing while the bank is stopped. Until `resume`
/// drops the backlog, reads return the stale level 0.9; afterwards 0.1.
struct BufferingSource {
    stale: Arc<AtomicBool>,
    resumes: Arc<AtomicUsize>,
}

impl CaptureSource for BufferingSource {
    fn enumerate_sources(&mut self) -> Result<Vec<String>, CaptureError> {
        Ok(vec!["line-in".into()])
    }

    fn select_source(&mut self, _name: &str) -> Result<(), CaptureError> {
        Ok(())
    }

    fn resume(&mut self) -> Result<(), CaptureError> {
        self.stale.store(false, Ordering::SeqCst);
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_block(&mut self, frame: &mut [f32]) -> Result<(), CaptureError> {
        let level = if self.stale.load(Ordering::SeqCst) { 0.9 } else { 0.1 };
        frame.fill(level);
        Ok(())
    }
}

// ─── Detector properties ───────────────────────────────────────────────────

#[test]
fn test_detector_magnitude_grows_with_amplitude() {
    let mut g = Goertzel::new(1000.0, 48000).unwrap();
    let mags: Vec<f64> = [0.1, 0.5, 1.0]
        .iter()
        .map(|&a| g.execute_block(&sine(1000.0, a, 48000, 512)))
        .collect();
    assert!(mags[0] < mags[1] && mags[1] < mags[2], "{:?}", mags);
}

#[test]
fn test_detector_rejects_nyquist() {
    assert!(matches!(
        Goertzel::new(24000.0, 48000),
        Err(DspError::AboveNyquist { .. })
    ));
    assert!(Goertzel::new(23999.0, 48000).is_ok());
}

// ─── Bank lifecycle ────────────────────────────────────────────────────────

#[test]
fn test_bank_starts_idle() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(1000.0).unwrap();
    assert_eq!(bank.state(), BankState::Idle);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(bank.cycles(), 0);
    assert_eq!(bank.query_frequency(1000.0), Some(0.0));
    assert_eq!(bank.query_wideband(), None);
    bank.cleanup();
}

#[test]
fn test_streaming_publishes_normalized_magnitudes() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(1000.0).unwrap();
    bank.create_analyzer(5000.0).unwrap();
    bank.start();
    assert!(bank.is_streaming());

    assert!(wait_until(|| bank.cycles() >= 10));
    let on_target = bank.query_frequency(1000.0).unwrap();
    let off_target = bank.query_frequency(5000.0).unwrap();
    assert!(on_target > 0.9, "1 kHz read {}", on_target);
    assert!(off_target < 0.1, "5 kHz read {}", off_target);
    assert!(bank.query_wideband().unwrap() > 0.5);
    bank.cleanup();
}

#[test]
fn test_ten_block_stream_converges() {
    // 48 kHz, 512-sample blocks, 1 kHz tone at full scale
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(1000.0).unwrap();
    let rx = bank.subscribe();
    bank.start();

    let mut values = Vec::new();
    while values.len() < 10 {
        let snap = rx.recv_timeout(TIMEOUT).unwrap();
        values.push(snap.magnitude(1000.0).unwrap());
    }
    bank.stop();

    let peak = values.iter().cloned().fold(0.0f32, f32::max);
    for (i, &v) in values.iter().enumerate().skip(2) {
        assert!(v > 0.9 * peak, "block {}: {} vs peak {}", i + 1, v, peak);
    }
    bank.cleanup();
}

#[test]
fn test_stop_halts_cycles() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(440.0).unwrap();
    bank.start();
    assert!(wait_until(|| bank.cycles() >= 3));

    bank.stop();
    let frozen = bank.cycles();
    let value = bank.query_frequency(440.0);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(bank.cycles(), frozen);
    assert_eq!(bank.query_frequency(440.0), value);
    assert_eq!(bank.state(), BankState::Idle);

    bank.start();
    assert!(wait_until(|| bank.cycles() > frozen));
    bank.cleanup();
}

// ─── Analyzer membership ───────────────────────────────────────────────────

#[test]
fn test_create_is_idempotent() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(1000.0).unwrap();
    bank.create_analyzer(1000.0).unwrap();
    assert_eq!(bank.frequencies(), vec![1000.0]);
    bank.cleanup();
}

#[test]
fn test_create_destroy_query_round_trip() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(2000.0).unwrap();
    bank.create_analyzer(500.0).unwrap();
    assert_eq!(bank.frequencies(), vec![500.0, 2000.0]);

    bank.destroy_analyzer(2000.0);
    assert_eq!(bank.query_frequency(2000.0), None);
    assert_eq!(bank.frequencies(), vec![500.0]);

    // destroying an absent frequency is a no-op
    bank.destroy_analyzer(3000.0);
    assert_eq!(bank.frequencies(), vec![500.0]);
    bank.cleanup();
}

#[test]
fn test_invalid_frequency_registers_nothing() {
    let bank = simulated_bank(BankConfig::default());
    let err = bank.create_analyzer(30000.0).unwrap_err();
    assert!(matches!(err, BankError::Detector(DspError::AboveNyquist { .. })));
    assert!(bank.create_analyzer(-5.0).is_err());
    assert!(bank.frequencies().is_empty());
    assert_eq!(bank.query_frequency(30000.0), None);
    bank.cleanup();
}

#[test]
fn test_membership_changes_keep_streaming_state() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(1000.0).unwrap();
    assert!(!bank.is_streaming());

    bank.start();
    bank.create_analyzer(440.0).unwrap();
    bank.destroy_analyzer(440.0);
    assert!(bank.is_streaming());
    bank.cleanup();
}

#[test]
fn test_concurrent_destroy_while_streaming() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(1000.0).unwrap();
    bank.start();
    assert!(wait_until(|| bank.cycles() >= 2));

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..25 {
                bank.create_analyzer(2000.0).unwrap();
                thread::sleep(Duration::from_millis(1));
                bank.destroy_analyzer(2000.0);
            }
        });
        s.spawn(|| {
            for _ in 0..200 {
                // Either absent or a finite published value, never torn.
                if let Some(v) = bank.query_frequency(2000.0) {
                    assert!(v.is_finite());
                }
                assert!(bank.query_frequency(1000.0).is_some());
            }
        });
    });

    assert_eq!(bank.query_frequency(2000.0), None);
    assert_eq!(bank.frequencies(), vec![1000.0]);
    assert!(bank.is_streaming());
    let before = bank.cycles();
    assert!(wait_until(|| bank.cycles() > before));
    bank.cleanup();
}

// ─── Sources ───────────────────────────────────────────────────────────────

#[test]
fn test_query_sources_lists_presets() {
    let config = BankConfig::default();
    let source = SimulatedSource::new(config.sample_rate)
        .with_preset(TonePreset::new("sine-3000", &[(3000.0, 0.5)]));
    let bank = AnalyzerBank::initialize(config, source).unwrap();
    let sources = bank.query_sources().unwrap();
    assert!(sources.contains(&"silence".to_string()));
    assert!(sources.contains(&"sine-3000".to_string()));
    bank.cleanup();
}

#[test]
fn test_set_source_switches_signal() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(1000.0).unwrap();
    bank.start();
    assert!(wait_until(|| bank.query_frequency(1000.0).unwrap_or(0.0) > 0.9));

    assert!(bank.set_source("silence").unwrap());
    assert!(bank.is_streaming());
    let now = bank.cycles();
    assert!(wait_until(|| bank.cycles() > now + 2));
    assert_eq!(bank.query_frequency(1000.0), Some(0.0));
    assert_eq!(bank.query_wideband(), Some(0.0));
    bank.cleanup();
}

#[test]
fn test_unknown_source_is_ignored() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(1000.0).unwrap();
    bank.start();
    assert!(!bank.set_source("no-such-device").unwrap());
    assert!(bank.is_streaming());
    assert!(wait_until(|| bank.query_frequency(1000.0).unwrap_or(0.0) > 0.9));
    bank.cleanup();
}

#[test]
fn test_repeated_capture_failures_pause_streaming() {
    let config = BankConfig {
        max_capture_failures: 3,
        ..Default::default()
    };
    let bank = AnalyzerBank::initialize(config, UnpluggedSource).unwrap();
    bank.create_analyzer(1000.0).unwrap();
    bank.start();

    assert!(wait_until(|| !bank.is_streaming()));
    assert_eq!(bank.cycles(), 0);
    assert_eq!(
        bank.last_capture_error(),
        Some(CaptureError::Stream("device unplugged".into()))
    );
    assert_eq!(bank.query_frequency(1000.0), Some(0.0));

    // start() retries with a fresh failure budget
    bank.start();
    assert!(bank.is_streaming());
    assert!(wait_until(|| !bank.is_streaming()));
    bank.cleanup();
}

#[test]
fn test_backlog_dropped_on_every_start() {
    let stale = Arc::new(AtomicBool::new(true));
    let resumes = Arc::new(AtomicUsize::new(0));
    let source = BufferingSource {
        stale: Arc::clone(&stale),
        resumes: Arc::clone(&resumes),
    };
    let bank = AnalyzerBank::initialize(BankConfig::default(), source).unwrap();
    bank.create_analyzer(1000.0).unwrap();
    let rx = bank.subscribe();

    thread::sleep(Duration::from_millis(30));
    bank.start();
    let first = rx.recv_timeout(TIMEOUT).unwrap();
    assert!((first.input_rms - 0.1).abs() < 1e-4, "rms={}", first.input_rms);
    bank.stop();
    assert_eq!(resumes.load(Ordering::SeqCst), 1);

    // audio piles up again while stopped
    stale.store(true, Ordering::SeqCst);
    while rx.try_recv().is_ok() {}
    bank.start();
    let next = rx.recv_timeout(TIMEOUT).unwrap();
    assert!((next.input_rms - 0.1).abs() < 1e-4, "rms={}", next.input_rms);
    assert_eq!(resumes.load(Ordering::SeqCst), 2);
    bank.cleanup();
}

// ─── Subscriptions & shutdown ──────────────────────────────────────────────

#[test]
fn test_snapshots_follow_cycles() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(440.0).unwrap();
    bank.create_analyzer(1000.0).unwrap();
    let rx = bank.subscribe();
    bank.start();

    let first = rx.recv_timeout(TIMEOUT).unwrap();
    let second = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(first.cycle, 1);
    assert_eq!(second.cycle, 2);
    assert!(second.timestamp_us >= first.timestamp_us);
    let freqs: Vec<f32> = second.magnitudes.iter().map(|&(f, _)| f).collect();
    assert_eq!(freqs, vec![440.0, 1000.0]);
    assert!((second.input_rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.05);
    bank.cleanup();
}

#[test]
fn test_cleanup_closes_subscriptions() {
    let bank = simulated_bank(BankConfig::default());
    bank.create_analyzer(1000.0).unwrap();
    let rx = bank.subscribe();
    bank.start();
    assert!(wait_until(|| bank.cycles() >= 2));
    bank.cleanup();

    // every queued snapshot drains, then the channel reports disconnection
    let drained = rx.iter().count();
    assert!(drained >= 2);
}

#[test]
fn test_drop_joins_capture_thread() {
    let rx = {
        let bank = simulated_bank(BankConfig::default());
        bank.create_analyzer(1000.0).unwrap();
        let rx = bank.subscribe();
        bank.start();
        assert!(wait_until(|| bank.cycles() >= 1));
        rx
    };
    assert!(rx.iter().count() >= 1);
}

#[test]
fn test_invalid_config_rejected() {
    let config = BankConfig {
        block_size: 0,
        ..Default::default()
    };
    let result = AnalyzerBank::initialize(config, SimulatedSource::new(48000));
    assert!(matches!(result, Err(BankError::Config(_))));
}
