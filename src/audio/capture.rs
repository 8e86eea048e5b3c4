//! Audio capture from input devices
//!
//! A capture device is modeled as a looping rolling buffer of mono samples
//! that the hardware keeps overwriting, plus a write cursor telling how far
//! it has got. Consumers poll the cursor and copy out what is new; anything
//! older than one buffer length is gone.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::device::{get_device_by_id, list_input_devices};
use crate::error::AudioError;

/// A running capture device with a rolling mono buffer
pub trait CaptureSource: Send {
    /// Length of the rolling buffer in samples
    fn buffer_len(&self) -> usize;

    /// Index one past the most recently written sample, modulo `buffer_len`
    fn write_cursor(&self) -> usize;

    /// Copy `out.len()` samples starting at `start`, wrapping at the end of
    /// the rolling buffer
    fn read(&self, out: &mut [f32], start: usize);

    /// Release the device. Further reads return stale data.
    fn stop(&mut self);
}

/// Opens capture devices
pub trait CaptureBackend {
    /// Identifiers of the available capture devices, default first
    fn list_devices(&self) -> Vec<String>;

    /// Start looping capture into a rolling buffer of `buffer_secs` seconds
    fn start(
        &self,
        device_id: &str,
        buffer_secs: u32,
        sample_rate: u32,
    ) -> Result<Box<dyn CaptureSource>, AudioError>;
}

/// Block until `source` reports its first samples or `timeout` elapses.
///
/// The cursor sits at zero until the device starts delivering.
pub fn wait_for_start(source: &dyn CaptureSource, timeout: Duration) -> Result<(), AudioError> {
    let started = Instant::now();
    while source.write_cursor() == 0 {
        if started.elapsed() >= timeout {
            return Err(AudioError::StartupTimeout(timeout));
        }
        thread::sleep(Duration::from_millis(5));
    }
    Ok(())
}

/// Rolling mono buffer shared between the device callback and readers
pub struct RollingBuffer {
    samples: Mutex<Vec<f32>>,
    cursor: AtomicUsize,
    samples_written: AtomicU64,
}

impl RollingBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            samples: Mutex::new(vec![0.0; len.max(1)]),
            cursor: AtomicUsize::new(0),
            samples_written: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Total samples ever written
    pub fn samples_written(&self) -> u64 {
        self.samples_written.load(Ordering::Relaxed)
    }

    /// Append interleaved frames, averaging channels down to mono
    pub fn push_interleaved<T>(&self, data: &[T], channels: usize)
    where
        T: Sample,
        f32: FromSample<T>,
    {
        let channels = channels.max(1);
        let mut samples = self.samples.lock();
        let len = samples.len();
        let mut pos = self.cursor.load(Ordering::Relaxed);
        let mut frames = 0u64;

        for frame in data.chunks(channels) {
            let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
            samples[pos] = sum / frame.len() as f32;
            pos = (pos + 1) % len;
            frames += 1;
        }

        self.cursor.store(pos, Ordering::Release);
        self.samples_written.fetch_add(frames, Ordering::Relaxed);
    }

    /// Append mono samples
    pub fn push(&self, data: &[f32]) {
        self.push_interleaved(data, 1);
    }

    /// Copy out with wraparound
    pub fn read(&self, out: &mut [f32], start: usize) {
        let samples = self.samples.lock();
        let len = samples.len();
        let mut pos = start % len;
        let mut done = 0;
        while done < out.len() {
            let n = (len - pos).min(out.len() - done);
            out[done..done + n].copy_from_slice(&samples[pos..pos + n]);
            pos = (pos + n) % len;
            done += n;
        }
    }
}

/// cpal-backed capture backend
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCaptureBackend;

impl CaptureBackend for CpalCaptureBackend {
    fn list_devices(&self) -> Vec<String> {
        let mut devices = list_input_devices();
        // Stable sort keeps host order among the rest
        devices.sort_by_key(|d| !d.is_default);
        devices.into_iter().map(|d| d.id).collect()
    }

    fn start(
        &self,
        device_id: &str,
        buffer_secs: u32,
        sample_rate: u32,
    ) -> Result<Box<dyn CaptureSource>, AudioError> {
        let capture = CpalCapture::start(device_id, buffer_secs, sample_rate)?;
        Ok(Box::new(capture))
    }
}

/// Capture from one cpal input device.
///
/// The cpal stream lives on its own thread because streams are not `Send`
/// on every platform.
pub struct CpalCapture {
    device_id: String,
    buffer: Arc<RollingBuffer>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl CpalCapture {
    /// How long to wait for the stream thread to report that it is playing
    const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn start(device_id: &str, buffer_secs: u32, sample_rate: u32) -> Result<Self, AudioError> {
        let device = get_device_by_id(device_id)?;
        let default_config = device.default_input_config()?;
        let sample_format = default_config.sample_format();

        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::new(RollingBuffer::new(
            sample_rate as usize * buffer_secs.max(1) as usize,
        ));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let channels = config.channels;
        let thread_buffer = buffer.clone();
        let thread_running = running.clone();

        let handle = thread::Builder::new()
            .name("capture-device".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_input::<f32>(&cpal_device, &config, thread_buffer, error_tx)
                    }
                    cpal::SampleFormat::I16 => {
                        build_input::<i16>(&cpal_device, &config, thread_buffer, error_tx)
                    }
                    cpal::SampleFormat::U16 => {
                        build_input::<u16>(&cpal_device, &config, thread_buffer, error_tx)
                    }
                    other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive while running
                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut capture = Self {
            device_id: device_id.to_string(),
            buffer,
            running,
            thread_handle: Some(handle),
            error_rx,
        };

        match ready_rx.recv_timeout(Self::OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                tracing::info!(
                    "Capture started on {} ({}Hz, {} channel(s) downmixed to mono)",
                    capture.device_id,
                    sample_rate,
                    channels
                );
                Ok(capture)
            }
            Ok(Err(e)) => {
                capture.stop_stream();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                // Stream thread may be stuck inside the host; abandon it
                capture.running.store(false, Ordering::SeqCst);
                capture.thread_handle.take();
                Err(AudioError::StartupTimeout(Self::OPEN_TIMEOUT))
            }
            Err(RecvTimeoutError::Disconnected) => {
                capture.stop_stream();
                Err(AudioError::StreamError("capture thread exited".to_string()))
            }
        }
    }

    /// Check for stream errors reported by the device callback
    fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }

    fn stop_stream(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!(
                "Capture stopped on {} after {} samples",
                self.device_id,
                self.buffer.samples_written()
            );
        }
    }
}

impl CaptureSource for CpalCapture {
    fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    fn write_cursor(&self) -> usize {
        self.buffer.cursor()
    }

    fn read(&self, out: &mut [f32], start: usize) {
        if let Some(e) = self.check_errors() {
            tracing::warn!("Capture stream error on {}: {}", self.device_id, e);
        }
        self.buffer.read(out, start);
    }

    fn stop(&mut self) {
        self.stop_stream();
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    buffer: Arc<RollingBuffer>,
    error_tx: crossbeam_channel::Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                buffer.push_interleaved(data, channels);
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::CpalError(e.to_string()))
}
