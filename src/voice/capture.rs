//! Audio capture from microphone
//!
//! The cpal stream lives on a dedicated thread (cpal streams aren't `Send`)
//! and hands fixed-size frames to the async side through a bounded channel.
//! A full channel means the consumer lagged; the frame is dropped and counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per frame delivered to the recognizer
pub const DEFAULT_FRAME_SIZE: usize = 2048;

/// Frames buffered between the device callback and the reader
const QUEUE_DEPTH: usize = 32;

/// A fixed-length buffer of signed 16-bit mono samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Wrap raw samples
    #[must_use]
    pub const fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// A frame of digital silence
    #[must_use]
    pub fn silence(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// RMS energy normalized to `[0.0, 1.0]`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f32 = self
            .samples
            .iter()
            .map(|&s| {
                let v = f32::from(s) / 32768.0;
                v * v
            })
            .sum();
        (sum_squares / self.samples.len() as f32).sqrt()
    }
}

/// Provider of exclusive capture handles
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Acquire the input stream
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceBusy`] if a handle is already open, or
    /// [`Error::Device`] if the device cannot be opened
    async fn open(&self) -> Result<Box<dyn AudioInput>>;
}

/// An open capture handle
#[async_trait]
pub trait AudioInput: Send {
    /// Wait for the next frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on a hardware or driver fault
    async fn read(&mut self) -> Result<AudioFrame>;

    /// Release the device. Safe to call more than once.
    async fn close(&mut self);
}

/// Guards the single-open-handle rule for one capture device
#[derive(Debug, Clone, Default)]
pub struct DeviceLock {
    in_use: Arc<AtomicBool>,
}

impl DeviceLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceBusy`] while another lease is held
    pub fn acquire(&self) -> Result<DeviceLease> {
        self.in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::DeviceBusy)?;

        Ok(DeviceLease {
            in_use: Arc::clone(&self.in_use),
            held: true,
        })
    }

    /// Check whether a lease is currently held
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }
}

/// Exclusive hold on a capture device, released on drop
#[derive(Debug)]
pub struct DeviceLease {
    in_use: Arc<AtomicBool>,
    held: bool,
}

impl DeviceLease {
    /// Give the device back
    pub fn release(&mut self) {
        if self.held {
            self.held = false;
            self.in_use.store(false, Ordering::Release);
        }
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Splits an arbitrary stream of samples into fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples, calling `emit` for every completed frame
    pub fn push<I, F>(&mut self, samples: I, mut emit: F)
    where
        I: IntoIterator<Item = i16>,
        F: FnMut(AudioFrame),
    {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                emit(AudioFrame::new(full));
            }
        }
    }

    /// Samples waiting for a frame to fill
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Events flowing from the device thread to the reader
#[derive(Debug)]
enum CaptureEvent {
    Frame(AudioFrame),
    Fault,
}

/// State shared between the cpal callbacks and the reader
#[derive(Debug, Default)]
struct CaptureShared {
    dropped_frames: AtomicU64,
    fault: Mutex<Option<String>>,
}

impl CaptureShared {
    fn record_fault(&self, message: String) {
        if let Ok(mut slot) = self.fault.lock() {
            slot.get_or_insert(message);
        }
    }

    fn take_fault(&self) -> Option<String> {
        self.fault.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Default system microphone via cpal
pub struct MicrophoneSource {
    sample_rate: u32,
    frame_size: usize,
    lock: DeviceLock,
}

impl MicrophoneSource {
    /// Create a source for the default input device
    #[must_use]
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate,
            frame_size,
            lock: DeviceLock::new(),
        }
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    async fn open(&self) -> Result<Box<dyn AudioInput>> {
        let lease = self.lock.acquire()?;

        let (events_tx, events_rx) = mpsc::channel(QUEUE_DEPTH);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let shared = Arc::new(CaptureShared::default());

        let sample_rate = self.sample_rate;
        let frame_size = self.frame_size;
        let thread_shared = Arc::clone(&shared);

        // The lease travels with the stream so the device is only free once
        // the stream has been dropped
        let thread = std::thread::Builder::new()
            .name("apollo-capture".to_string())
            .spawn(move || {
                run_capture_thread(
                    sample_rate,
                    frame_size,
                    &events_tx,
                    &thread_shared,
                    ready_tx,
                    stop_rx,
                );
                drop(lease);
            })
            .map_err(|e| Error::Device(format!("failed to spawn capture thread: {e}")))?;

        if let Err(e) = await_ready(ready_rx).await {
            join_capture_thread(thread).await;
            return Err(e);
        }

        tracing::debug!(sample_rate, frame_size, "audio capture started");

        Ok(Box::new(MicrophoneInput {
            events: events_rx,
            shared,
            stop: Some(stop_tx),
            thread: Some(thread),
        }))
    }
}

/// Wait for the capture thread to report that its stream is playing
async fn await_ready(ready: oneshot::Receiver<Result<()>>) -> Result<()> {
    ready
        .await
        .map_err(|_| Error::Device("capture thread exited during startup".to_string()))?
}

/// Wait for a capture thread to finish without blocking the runtime
async fn join_capture_thread(thread: JoinHandle<()>) {
    match tokio::task::spawn_blocking(move || thread.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => tracing::warn!("capture thread panicked"),
        Err(e) => tracing::warn!(error = %e, "failed to join capture thread"),
    }
}

/// Open handle on the default microphone
struct MicrophoneInput {
    events: mpsc::Receiver<CaptureEvent>,
    shared: Arc<CaptureShared>,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

#[async_trait]
impl AudioInput for MicrophoneInput {
    async fn read(&mut self) -> Result<AudioFrame> {
        if self.stop.is_none() {
            return Err(Error::Device("capture handle is closed".to_string()));
        }

        if let Some(message) = self.shared.take_fault() {
            return Err(Error::Device(message));
        }

        match self.events.recv().await {
            Some(CaptureEvent::Frame(frame)) => Ok(frame),
            Some(CaptureEvent::Fault) => Err(Error::Device(
                self.shared
                    .take_fault()
                    .unwrap_or_else(|| "input stream failed".to_string()),
            )),
            None => Err(Error::Device("capture stream closed".to_string())),
        }
    }

    async fn close(&mut self) {
        // Dropping the sender wakes the device thread
        if self.stop.take().is_none() {
            return;
        }

        if let Some(thread) = self.thread.take() {
            join_capture_thread(thread).await;
        }

        let dropped = self.shared.dropped_frames.load(Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, "capture overflow, frames were dropped");
        }

        tracing::debug!("audio capture stopped");
    }
}

/// Own the cpal stream until the handle is closed or dropped
fn run_capture_thread(
    sample_rate: u32,
    frame_size: usize,
    events: &mpsc::Sender<CaptureEvent>,
    shared: &Arc<CaptureShared>,
    ready: oneshot::Sender<Result<()>>,
    stop: oneshot::Receiver<()>,
) {
    let stream = match open_input_stream(sample_rate, frame_size, events, shared) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(Error::Device(e.to_string())));
        return;
    }

    let _ = ready.send(Ok(()));

    // Blocks until the handle drops its sender
    let _ = stop.blocking_recv();
    drop(stream);
}

/// Build a mono input stream on the default device
fn open_input_stream(
    sample_rate: u32,
    frame_size: usize,
    events: &mpsc::Sender<CaptureEvent>,
    shared: &Arc<CaptureShared>,
) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Device("no input device available".to_string()))?;

    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .collect();

    let range = ranges
        .iter()
        .find(|c| c.sample_format() == SampleFormat::I16)
        .or_else(|| ranges.iter().find(|c| c.sample_format() == SampleFormat::F32))
        .cloned()
        .ok_or_else(|| Error::Device("no suitable audio config found".to_string()))?;

    let supported = range.with_sample_rate(SampleRate(sample_rate));
    let format = supported.sample_format();
    let config = supported.config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        ?format,
        "audio capture initialized"
    );

    match format {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, frame_size, events, shared, |s| s),
        _ => build_stream::<f32>(&device, &config, frame_size, events, shared, f32_to_i16),
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    frame_size: usize,
    events: &mpsc::Sender<CaptureEvent>,
    shared: &Arc<CaptureShared>,
    convert: fn(T) -> i16,
) -> Result<Stream>
where
    T: SizedSample + 'static,
{
    let mut assembler = FrameAssembler::new(frame_size);
    let data_events = events.clone();
    let data_shared = Arc::clone(shared);

    let error_events = events.clone();
    let error_shared = Arc::clone(shared);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                assembler.push(data.iter().map(|&s| convert(s)), |frame| {
                    if let Err(TrySendError::Full(_)) =
                        data_events.try_send(CaptureEvent::Frame(frame))
                    {
                        data_shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    }
                });
            },
            move |err| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    tracing::error!("audio input device no longer available");
                    error_shared.record_fault("input device no longer available".to_string());
                    let _ = error_events.try_send(CaptureEvent::Fault);
                }
                other => {
                    // Driver hiccups (xruns and the like) lose audio but keep the stream alive
                    tracing::warn!(error = %other, "audio capture error");
                    error_shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
                }
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))
}

/// Convert f32 `[-1.0, 1.0]` to i16
#[allow(clippy::cast_possible_truncation)]
fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Encode i16 samples as WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Recognition(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Recognition(e.to_string()))?;
        }

        writer
            .finalize()
            .map_err(|e| Error::Recognition(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
