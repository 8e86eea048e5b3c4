//! Audio playback to an output device
//!
//! The output callback pulls from the shared playback ring at the
//! hardware's cadence. It never waits for network data: when the ring runs
//! dry it plays whatever the ring holds.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::SharedPlaybackRing;
use crate::audio::device::{get_default_output_device, get_device_by_id, AudioDevice};
use crate::error::AudioError;

/// Playback of one mono ring to an output device
pub struct AudioPlayback {
    device_name: String,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    ring: SharedPlaybackRing,
    sample_rate: u32,
}

impl AudioPlayback {
    /// How long to wait for the stream thread to report that it is playing
    const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

    /// Prepare playback on `device_id`, or the default output device
    pub fn new(
        device_id: Option<&str>,
        sample_rate: u32,
        ring: SharedPlaybackRing,
    ) -> Result<Self, AudioError> {
        let device = open_output(device_id)?;
        Ok(Self {
            device_name: device.name,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            ring,
            sample_rate,
        })
    }

    /// Start the output stream
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_device_by_id(&format!("output:{}", self.device_name))?;
        let default_config = device.default_output_config()?;
        let sample_format = default_config.sample_format();
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let ring = self.ring.clone();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("playback-device".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_output_f32(&cpal_device, &config, ring, error_tx)
                    }
                    cpal::SampleFormat::I16 => {
                        build_output::<i16>(&cpal_device, &config, ring, error_tx)
                    }
                    cpal::SampleFormat::U16 => {
                        build_output::<u16>(&cpal_device, &config, ring, error_tx)
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

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(Self::OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                self.thread_handle = Some(handle);
                tracing::info!("Playback started on {} ({}Hz)", self.device_name, self.sample_rate);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.running.store(false, Ordering::SeqCst);
                Err(AudioError::StartupTimeout(Self::OPEN_TIMEOUT))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.running.store(false, Ordering::SeqCst);
                Err(AudioError::StreamError("playback thread exited".to_string()))
            }
        }
    }

    /// Stop the output stream
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Playback stopped on {}", self.device_name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Check for errors reported by the output callback
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_output(device_id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match device_id {
        Some(id) if id.starts_with("output:") => get_device_by_id(id),
        Some(name) => get_device_by_id(&format!("output:{}", name)),
        None => get_default_output_device(),
    }
}

fn build_output_f32(
    device: &cpal::Device,
    config: &StreamConfig,
    ring: SharedPlaybackRing,
    error_tx: crossbeam_channel::Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                ring.fill_interleaved(data, channels);
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::CpalError(e.to_string()))
}

/// Output for integer sample formats. Fills a float scratch buffer first;
/// the scratch grows only if the host hands over a larger buffer than before.
fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    ring: SharedPlaybackRing,
    error_tx: crossbeam_channel::Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = vec![0.0; 8192];
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let scratch = &mut scratch[..data.len()];
                ring.fill_interleaved(scratch, channels);
                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = <T as Sample>::from_sample(src);
                }
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::CpalError(e.to_string()))
}
