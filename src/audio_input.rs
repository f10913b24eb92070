use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::capture::CaptureSource;
use crate::error::CaptureError;

/// How often a blocked reader wakes to look for a stream fault.
const FAULT_POLL: Duration = Duration::from_millis(100);

/// Last error raised by the stream callback, kept until a reader takes it.
type FaultSlot = Arc<Mutex<Option<String>>>;

/// Reader side of the callback queue: turns variable-size callback chunks
/// into whole blocks.
struct Feed {
    samples_rx: Receiver<Vec<f32>>,
    fault: FaultSlot,
    pending: Vec<f32>,
}

impl Feed {
    /// Drop everything queued so far. Faults are kept.
    fn drain(&mut self) -> usize {
        let mut dropped = self.pending.len();
        self.pending.clear();
        while let Ok(chunk) = self.samples_rx.try_recv() {
            dropped += chunk.len();
        }
        dropped
    }

    fn fill(&mut self, frame: &mut [f32]) -> Result<(), CaptureError> {
        while self.pending.len() < frame.len() {
            if let Some(e) = self.fault.lock().take() {
                return Err(CaptureError::Stream(e));
            }
            match self.samples_rx.recv_timeout(FAULT_POLL) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Disconnected),
            }
        }
        let n = frame.len();
        frame.copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(())
    }
}

/// Live input stream owned by a dedicated thread.
///
/// `cpal::Stream` is not `Send` on every platform, so the stream is built,
/// played and dropped on its own thread; this handle only holds channels.
struct StreamHandle {
    feed: Feed,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl StreamHandle {
    fn open(device_name: Option<String>, preferred_rate: u32) -> Result<Self, CaptureError> {
        // try_send in the callback prevents blocking the audio thread on backpressure
        let (samples_tx, samples_rx) = bounded::<Vec<f32>>(64);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<u32, CaptureError>>(1);
        let fault: FaultSlot = Arc::new(Mutex::new(None));
        let callback_fault = Arc::clone(&fault);

        let thread = thread::Builder::new()
            .name("cpal-stream".into())
            .spawn(move || {
                let name = device_name.as_deref();
                let stream = match start_stream(name, preferred_rate, samples_tx, callback_fault) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Park until the handle is dropped or asks us to stop.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| CaptureError::Disconnected)??;

        Ok(Self {
            feed: Feed {
                samples_rx,
                fault,
                pending: Vec::new(),
            },
            stop_tx,
            thread: Some(thread),
            sample_rate,
        })
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Live audio capture via cpal, downmixed to mono f32.
///
/// The device keeps running while the bank is stopped; audio captured in that
/// time is discarded on [`resume`](CaptureSource::resume).
pub struct CpalSource {
    preferred_rate: u32,
    stream: Option<StreamHandle>,
}

impl CpalSource {
    /// Open the default input device. `preferred_rate` should match the
    /// bank's configured sample rate.
    pub fn open_default(preferred_rate: u32) -> Result<Self, CaptureError> {
        let stream = StreamHandle::open(None, preferred_rate)?;
        Ok(Self {
            preferred_rate,
            stream: Some(stream),
        })
    }

    /// Sample rate of the running stream, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.stream.as_ref().map(|s| s.sample_rate)
    }
}

impl CaptureSource for CpalSource {
    fn enumerate_sources(&mut self) -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| CaptureError::Enumeration(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn select_source(&mut self, name: &str) -> Result<(), CaptureError> {
        // Tear the old stream down first: some backends refuse a second
        // open of the same device.
        self.stream = None;
        self.stream = Some(StreamHandle::open(Some(name.to_string()), self.preferred_rate)?);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::Disconnected)?;
        let dropped = stream.feed.drain();
        if dropped > 0 {
            debug!("Dropped {} samples captured while stopped", dropped);
        }
        Ok(())
    }

    fn read_block(&mut self, frame: &mut [f32]) -> Result<(), CaptureError> {
        self.stream
            .as_mut()
            .ok_or(CaptureError::Disconnected)?
            .feed
            .fill(frame)
    }
}

fn find_device(name: Option<&str>) -> Result<Device, CaptureError> {
    let host = cpal::default_host();
    match name {
        None => host.default_input_device().ok_or(CaptureError::NoDevice),
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::Enumeration(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::InvalidSource(name.to_string())),
    }
}

/// Build and play the input stream on the calling thread.
fn start_stream(
    name: Option<&str>,
    preferred_rate: u32,
    tx: Sender<Vec<f32>>,
    fault: FaultSlot,
) -> Result<(Stream, u32), CaptureError> {
    let device = find_device(name)?;
    info!(
        "Audio input: {}",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Config(e.to_string()))?;

    // Prefer the configured rate when any supported range covers it (with the
    // same channel count); fall back to the device default otherwise.
    let preferred = cpal::SampleRate(preferred_rate);
    let matching = device.supported_input_configs().ok().and_then(|configs| {
        configs
            .filter(|c| {
                c.channels() == supported.channels()
                    && c.min_sample_rate() <= preferred
                    && c.max_sample_rate() >= preferred
            })
            .max_by_key(|c| c.max_sample_rate())
            .map(|c| c.with_sample_rate(preferred))
    });
    let chosen = matching.unwrap_or(supported);
    let sample_rate = chosen.sample_rate().0;
    let format = chosen.sample_format();
    let config: StreamConfig = chosen.into();

    if sample_rate != preferred_rate {
        warn!(
            "Device runs at {}Hz, analysis assumes {}Hz; detector tuning will be off",
            sample_rate, preferred_rate
        );
    }
    info!(
        "Capture config: {}Hz  {} ch  {:?}",
        sample_rate, config.channels, format
    );

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, tx, fault)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, tx, fault)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, tx, fault)?,
        SampleFormat::I32 => build_stream::<i32>(&device, &config, tx, fault)?,
        fmt => {
            return Err(CaptureError::Config(format!(
                "Unsupported sample format {fmt:?}"
            )))
        }
    };
    stream
        .play()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;
    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    tx: Sender<Vec<f32>>,
    fault: FaultSlot,
) -> Result<Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let _ = tx.try_send(mix_mono(data, channels));
            },
            move |e: cpal::StreamError| {
                error!("Audio stream error: {e}");
                *fault.lock() = Some(e.to_string());
            },
            None,
        )
        .map_err(|e| CaptureError::Stream(e.to_string()))
}

/// Average interleaved frames down to one channel.
fn mix_mono<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|&s| s.to_sample::<f32>()).collect();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_mono_averages_frames() {
        let stereo = [1.0f32, 0.0, 0.5, 0.5];
        assert_eq!(mix_mono(&stereo, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn test_mix_mono_converts_integer_formats() {
        let mono = mix_mono(&[i16::MAX, 0], 1);
        assert!((mono[0] - 1.0).abs() < 1e-4);
        assert_eq!(mono[1], 0.0);
        // u16 midpoint is silence
        let unsigned = mix_mono(&[32768u16], 1);
        assert!(unsigned[0].abs() < 1e-4);
    }

    fn feed() -> (Feed, Sender<Vec<f32>>) {
        let (tx, rx) = bounded(64);
        let feed = Feed {
            samples_rx: rx,
            fault: Arc::new(Mutex::new(None)),
            pending: Vec::new(),
        };
        (feed, tx)
    }

    #[test]
    fn test_feed_assembles_blocks_across_chunks() {
        let (mut feed, tx) = feed();
        tx.send(vec![1.0, 2.0, 3.0]).unwrap();
        tx.send(vec![4.0, 5.0]).unwrap();
        let mut frame = [0.0f32; 4];
        feed.fill(&mut frame).unwrap();
        assert_eq!(frame, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(feed.pending, vec![5.0]);
    }

    #[test]
    fn test_drain_discards_backlog() {
        let (mut feed, tx) = feed();
        for i in 0..10 {
            tx.send(vec![i as f32; 4]).unwrap();
        }
        let mut frame = [0.0f32; 2];
        feed.fill(&mut frame).unwrap();
        assert_eq!(feed.drain(), 38);

        // the next block comes from audio queued after the drain
        tx.send(vec![99.0; 2]).unwrap();
        feed.fill(&mut frame).unwrap();
        assert_eq!(frame, [99.0, 99.0]);
    }

    #[test]
    fn test_fault_survives_drain_and_full_queue() {
        let (mut feed, tx) = feed();
        while tx.try_send(vec![0.0; 8]).is_ok() {}
        *feed.fault.lock() = Some("device lost".into());
        feed.drain();
        let mut frame = [0.0f32; 4];
        assert_eq!(
            feed.fill(&mut frame).unwrap_err(),
            CaptureError::Stream("device lost".into())
        );
        assert!(feed.fault.lock().is_none());
    }

    #[test]
    fn test_closed_queue_is_disconnected() {
        let (mut feed, tx) = feed();
        drop(tx);
        let mut frame = [0.0f32; 4];
        assert_eq!(feed.fill(&mut frame).unwrap_err(), CaptureError::Disconnected);
    }
}
