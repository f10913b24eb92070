//! Analyzer bank: the live frame, the per-frequency detectors and the
//! capture thread that feeds them.
//!
//! # Locking
//!
//! - `control` + `wake`: the stopped/finished flags. The capture thread parks
//!   on the condvar while stopped.
//! - `processing`: held by the capture thread for one read-and-analyze cycle,
//!   and by control calls that change detector membership or the source.
//! - `published`: the values handed to readers. Only the capture cycle writes
//!   values; membership changes happen under `processing` too, so the key sets
//!   of the detector map and the published map always match outside it.
//!
//! `stop()` sets the flag and then takes `processing` once, which serializes
//! it with any cycle already in flight. The capture thread takes `processing`
//! before re-checking the flag, so no cycle starts after `stop()` returns.

use crate::capture::CaptureSource;
use crate::config::BankConfig;
use crate::dsp::compute_rms;
use crate::error::{BankError, CaptureError};
use crate::goertzel::Goertzel;
use crate::throttle::Throttle;
use crate::types::{BankState, FrequencyKey, SessionClock, Snapshot};
use crate::wbas::Wbas;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Peak-tracking gain reference.
///
/// Each magnitude either becomes the new reference (if it exceeds it) or the
/// reference decays by `decay`. The published value is magnitude / reference.
#[derive(Debug, Clone)]
pub struct Normalizer {
    reference: f32,
    decay: f32,
    floor: f32,
}

impl Normalizer {
    pub fn new(decay: f32, floor: f32) -> Self {
        Self {
            reference: 1.0,
            decay,
            floor,
        }
    }

    pub fn reference(&self) -> f32 {
        self.reference
    }

    pub fn apply(&mut self, magnitude: f32) -> f32 {
        self.reference = if magnitude > self.reference {
            magnitude
        } else {
            (self.reference * self.decay).max(self.floor)
        };
        magnitude / self.reference
    }
}

struct Control {
    stopped: bool,
    finished: bool,
}

#[derive(Default)]
struct Published {
    magnitudes: BTreeMap<FrequencyKey, f32>,
    wideband: Option<f32>,
    last_error: Option<CaptureError>,
}

/// Everything a capture cycle touches. Guarded by the processing mutex.
struct Pipeline {
    source: Box<dyn CaptureSource>,
    sources: Vec<String>,
    frame: Vec<f32>,
    analyzers: BTreeMap<FrequencyKey, Goertzel>,
    normalizer: Normalizer,
    wideband: Option<Wbas>,
    consecutive_failures: u32,
}

impl Pipeline {
    /// Read one block and analyze it. On success the published values are
    /// replaced and the snapshot for this cycle is returned. `resume` marks
    /// the first cycle after the capture thread was parked.
    fn run_cycle(
        &mut self,
        published: &RwLock<Published>,
        resume: bool,
    ) -> Result<CycleOutput, CaptureError> {
        if resume {
            self.source.resume()?;
        }
        self.source.read_block(&mut self.frame)?;
        self.consecutive_failures = 0;

        let mut magnitudes = Vec::with_capacity(self.analyzers.len());
        for (key, analyzer) in self.analyzers.iter_mut() {
            let raw = analyzer.execute_block(&self.frame) as f32;
            magnitudes.push((*key, self.normalizer.apply(raw)));
        }
        let wideband = self.wideband.as_mut().map(|w| w.execute(&self.frame));

        let mut out = published.write();
        for &(key, value) in &magnitudes {
            out.magnitudes.insert(key, value);
        }
        out.wideband = wideband;
        out.last_error = None;
        drop(out);

        Ok(CycleOutput {
            magnitudes: magnitudes
                .into_iter()
                .map(|(k, v)| (k.into_inner(), v))
                .collect(),
            wideband,
            input_rms: compute_rms(&self.frame),
        })
    }
}

struct CycleOutput {
    magnitudes: Vec<(f32, f32)>,
    wideband: Option<f32>,
    input_rms: f32,
}

struct Shared {
    config: BankConfig,
    control: Mutex<Control>,
    wake: Condvar,
    processing: Mutex<Pipeline>,
    published: RwLock<Published>,
    subscribers: Mutex<Vec<Sender<Snapshot>>>,
    cycles: AtomicU64,
    clock: SessionClock,
}

impl Shared {
    fn set_stopped(&self, stopped: bool) -> bool {
        let mut control = self.control.lock();
        let was_stopped = control.stopped;
        control.stopped = stopped;
        self.wake.notify_all();
        was_stopped
    }

    fn is_stopped(&self) -> bool {
        self.control.lock().stopped
    }

    fn broadcast(&self, snapshot: Snapshot) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Bank of Goertzel detectors fed by a dedicated capture thread.
///
/// Created idle. [`start`](Self::start) begins streaming, [`stop`](Self::stop)
/// parks the capture thread, [`cleanup`](Self::cleanup) joins it and releases
/// the source; dropping the bank does the same.
pub struct AnalyzerBank {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AnalyzerBank {
    /// Validate the config, enumerate the source once and spawn the capture
    /// thread in the stopped state.
    pub fn initialize(
        config: BankConfig,
        source: impl CaptureSource + 'static,
    ) -> Result<Self, BankError> {
        config.validate()?;
        let mut source: Box<dyn CaptureSource> = Box::new(source);
        let sources = source.enumerate_sources()?;

        let pipeline = Pipeline {
            source,
            sources,
            frame: vec![0.0; config.block_size],
            analyzers: BTreeMap::new(),
            normalizer: Normalizer::new(config.decay, config.normalization_floor),
            wideband: config.wideband.then(Wbas::new),
            consecutive_failures: 0,
        };

        let shared = Arc::new(Shared {
            config,
            control: Mutex::new(Control {
                stopped: true,
                finished: false,
            }),
            wake: Condvar::new(),
            processing: Mutex::new(pipeline),
            published: RwLock::new(Published::default()),
            subscribers: Mutex::new(Vec::new()),
            cycles: AtomicU64::new(0),
            clock: SessionClock::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("goertzel-capture".into())
            .spawn(move || capture_loop(&worker_shared))
            .map_err(|e| BankError::Thread(e.to_string()))?;

        info!(
            "Analyzer bank initialized: {}Hz, {}-sample blocks ({:.1} cycles/s)",
            shared.config.sample_rate,
            shared.config.block_size,
            shared.config.sample_rate as f64 / shared.config.block_size as f64
        );

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub fn config(&self) -> &BankConfig {
        &self.shared.config
    }

    pub fn start(&self) {
        self.shared.processing.lock().consecutive_failures = 0;
        if self.shared.set_stopped(false) {
            debug!("Streaming started");
        }
    }

    /// Park the capture thread. Returns once any in-flight cycle has finished.
    pub fn stop(&self) {
        let was_stopped = self.shared.set_stopped(true);
        drop(self.shared.processing.lock());
        if !was_stopped {
            debug!("Streaming stopped");
        }
    }

    pub fn is_streaming(&self) -> bool {
        !self.shared.is_stopped()
    }

    pub fn state(&self) -> BankState {
        if self.is_streaming() {
            BankState::Streaming
        } else {
            BankState::Idle
        }
    }

    /// Run `f` on the pipeline with streaming stopped, then resume streaming
    /// if it was running before.
    fn paused<R>(&self, f: impl FnOnce(&mut Pipeline, &RwLock<Published>) -> R) -> R {
        let was_streaming = self.is_streaming();
        self.stop();
        let result = {
            let mut pipeline = self.shared.processing.lock();
            f(&mut pipeline, &self.shared.published)
        };
        if was_streaming {
            self.shared.set_stopped(false);
        }
        result
    }

    /// Register a detector for `frequency`. Registering an existing frequency
    /// is a no-op; an invalid frequency registers nothing.
    pub fn create_analyzer(&self, frequency: f32) -> Result<(), BankError> {
        let sample_rate = self.shared.config.sample_rate;
        self.paused(|pipeline, published| {
            let key = FrequencyKey::from(frequency);
            if pipeline.analyzers.contains_key(&key) {
                return Ok(());
            }
            let analyzer = Goertzel::new(frequency, sample_rate)?;
            pipeline.analyzers.insert(key, analyzer);
            published.write().magnitudes.insert(key, 0.0);
            debug!("Analyzer created at {:.2} Hz", frequency);
            Ok(())
        })
    }

    pub fn destroy_analyzer(&self, frequency: f32) {
        self.paused(|pipeline, published| {
            let key = FrequencyKey::from(frequency);
            if pipeline.analyzers.remove(&key).is_some() {
                published.write().magnitudes.remove(&key);
                debug!("Analyzer destroyed at {:.2} Hz", frequency);
            }
        })
    }

    /// Last published value for `frequency`, or `None` if it is not registered.
    pub fn query_frequency(&self, frequency: f32) -> Option<f32> {
        self.shared
            .published
            .read()
            .magnitudes
            .get(&FrequencyKey::from(frequency))
            .copied()
    }

    /// Last wideband contrast, `None` when the sensor is disabled or no block
    /// has been analyzed yet.
    pub fn query_wideband(&self) -> Option<f32> {
        self.shared.published.read().wideband
    }

    /// Registered frequencies, ascending.
    pub fn frequencies(&self) -> Vec<f32> {
        self.shared
            .published
            .read()
            .magnitudes
            .keys()
            .map(|k| k.into_inner())
            .collect()
    }

    /// Enumerate sources again and remember the list for `set_source`.
    pub fn query_sources(&self) -> Result<Vec<String>, BankError> {
        let mut pipeline = self.shared.processing.lock();
        let sources = pipeline.source.enumerate_sources()?;
        pipeline.sources = sources.clone();
        Ok(sources)
    }

    /// Switch the capture source. Names missing from the last enumeration are
    /// ignored and `Ok(false)` is returned.
    pub fn set_source(&self, name: &str) -> Result<bool, BankError> {
        let known = self
            .shared
            .processing
            .lock()
            .sources
            .iter()
            .any(|s| s == name);
        if !known {
            warn!("Ignoring unknown capture source {:?}", name);
            return Ok(false);
        }
        self.paused(|pipeline, _| pipeline.source.select_source(name))?;
        info!("Capture source set to {:?}", name);
        Ok(true)
    }

    /// Receive a snapshot after every analyzed cycle. Snapshots are dropped
    /// while the receiver's queue is full.
    pub fn subscribe(&self) -> Receiver<Snapshot> {
        let (tx, rx) = bounded(self.shared.config.snapshot_capacity.max(1));
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Number of analyzed cycles so far.
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Acquire)
    }

    /// Most recent capture failure, cleared by the next successful cycle.
    pub fn last_capture_error(&self) -> Option<CaptureError> {
        self.shared.published.read().last_error.clone()
    }

    /// Join the capture thread, then release detectors and the source.
    pub fn cleanup(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut control = self.shared.control.lock();
            control.finished = true;
            self.shared.wake.notify_all();
        }
        if worker.join().is_err() {
            error!("Capture thread panicked");
        }
        let mut pipeline = self.shared.processing.lock();
        pipeline.analyzers.clear();
        self.shared.published.write().magnitudes.clear();
        self.shared.subscribers.lock().clear();
        info!(
            "Analyzer bank shut down after {} cycles",
            self.shared.cycles.load(Ordering::Acquire)
        );
    }
}

impl Drop for AnalyzerBank {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn capture_loop(shared: &Shared) {
    let mut throttle = Throttle::new(shared.config.cycle_period());
    info!("Capture thread running");
    // The source must drop input buffered while the bank was stopped.
    let mut parked = true;

    loop {
        {
            let mut control = shared.control.lock();
            if control.stopped && !control.finished {
                throttle.reset();
                parked = true;
            }
            while control.stopped && !control.finished {
                shared.wake.wait(&mut control);
            }
            if control.finished {
                break;
            }
        }

        throttle.wait();

        let mut pipeline = shared.processing.lock();
        // stop() may have landed while we slept; it is waiting on this lock.
        if shared.is_stopped() {
            parked = true;
            continue;
        }

        match pipeline.run_cycle(&shared.published, parked) {
            Ok(output) => {
                parked = false;
                let cycle = shared.cycles.fetch_add(1, Ordering::AcqRel) + 1;
                drop(pipeline);
                trace!("cycle {}: {:?}", cycle, output.magnitudes);
                if cycle % 1000 == 0 {
                    debug!("Capture thread: {} cycles processed", cycle);
                }
                shared.broadcast(Snapshot {
                    cycle,
                    timestamp_us: shared.clock.now_us(),
                    magnitudes: output.magnitudes,
                    wideband: output.wideband,
                    input_rms: output.input_rms,
                });
            }
            Err(e) => {
                pipeline.consecutive_failures += 1;
                let failures = pipeline.consecutive_failures;
                shared.published.write().last_error = Some(e.clone());
                drop(pipeline);
                warn!(
                    "Capture failed ({}/{}): {}",
                    failures, shared.config.max_capture_failures, e
                );
                if failures >= shared.config.max_capture_failures {
                    error!("Pausing capture after {} consecutive failures", failures);
                    shared.set_stopped(true);
                }
            }
        }
    }

    info!("Capture thread exiting");
}
