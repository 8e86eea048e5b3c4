//! Voice session lifecycle
//!
//! A [`VoiceSession`] owns everything one voice conversation needs: the
//! socket, the playback ring, the receive thread and (when a microphone is
//! available) the capture pump thread. Dropping or stopping the session
//! clears the shared running flag and waits, with a deadline, for both
//! threads to leave.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::buffer::{create_shared_ring, SharedPlaybackRing};
use crate::audio::capture::{wait_for_start, CaptureBackend, CaptureSource};
use crate::config::{AppConfig, AudioConfig};
use crate::error::{AudioError, Result};
use crate::network::receiver::{ReceiveLoop, ReceiverStats};
use crate::network::sender::{CapturePump, SenderStats};
use crate::network::udp::DatagramTransport;
use crate::worker::Worker;

/// One running voice session
pub struct VoiceSession {
    config: AppConfig,
    transport: Arc<DatagramTransport>,
    ring: SharedPlaybackRing,
    running: Arc<AtomicBool>,
    receiver: Option<Worker>,
    pump: Option<Worker>,
    capture_device: Option<String>,
    receiver_stats: Arc<ReceiverStats>,
    sender_stats: Option<Arc<SenderStats>>,
}

impl VoiceSession {
    /// Bind the socket, start receiving, and start capture if possible.
    ///
    /// Capture problems never fail the session: they are logged and the
    /// session runs receive-only.
    pub fn start(config: AppConfig, backend: &dyn CaptureBackend) -> Result<Self> {
        config.validate()?;

        let ring = create_shared_ring(config.audio.ring_capacity());
        let transport = Arc::new(DatagramTransport::bind(&config.network)?);
        let running = Arc::new(AtomicBool::new(true));

        let receive = ReceiveLoop::new(transport.clone(), ring.clone(), running.clone());
        let receiver_stats = receive.stats();
        let receiver = Worker::spawn("voice-recv", move || receive.run())?;

        let mut session = Self {
            config,
            transport,
            ring,
            running,
            receiver: Some(receiver),
            pump: None,
            capture_device: None,
            receiver_stats,
            sender_stats: None,
        };

        if session.config.audio.use_microphone {
            match open_capture(&session.config.audio, backend) {
                Ok((device_id, source)) => session.start_pump(device_id, source)?,
                Err(e) => tracing::warn!("Microphone capture disabled: {}", e),
            }
        } else {
            tracing::info!("Microphone capture disabled by configuration");
        }

        tracing::info!(
            "Voice session started: {} samples/frame, {} sample playback window",
            session.config.audio.frame_size(),
            session.ring.capacity()
        );
        Ok(session)
    }

    fn start_pump(&mut self, device_id: String, source: Box<dyn CaptureSource>) -> Result<()> {
        let pump = CapturePump::new(source, self.config.audio.frame_size(), self.transport.clone())?;
        self.sender_stats = Some(pump.stats());

        let running = self.running.clone();
        let interval = self.config.audio.frame_interval();
        self.pump = Some(Worker::spawn("capture-pump", move || pump.run(running, interval))?);
        self.capture_device = Some(device_id);
        Ok(())
    }

    /// The playback ring, for the output callback or for injecting audio
    pub fn ring(&self) -> SharedPlaybackRing {
        self.ring.clone()
    }

    /// Fill an interleaved output buffer from the playback ring
    pub fn fill_output(&self, out: &mut [f32], channels: usize) {
        self.ring.fill_interleaved(out, channels);
    }

    /// Redirect outgoing audio. An unparsable address is rejected and the
    /// current endpoint is kept.
    pub fn set_remote_endpoint(&self, address: &str, port: u16) -> Result<SocketAddr> {
        Ok(self.transport.set_remote_endpoint(address, port)?)
    }

    pub fn remote_endpoint(&self) -> SocketAddr {
        self.transport.remote()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    pub fn capture_enabled(&self) -> bool {
        self.pump.is_some()
    }

    /// Identifier of the capture device in use
    pub fn capture_device(&self) -> Option<&str> {
        self.capture_device.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        let transport = self.transport.stats();
        let (frames_sent, send_failures) = match &self.sender_stats {
            Some(stats) => (
                stats.frames_sent.load(Ordering::Relaxed),
                stats.send_failures.load(Ordering::Relaxed),
            ),
            None => (0, 0),
        };

        SessionStats {
            capture_enabled: self.capture_enabled(),
            frames_sent,
            send_failures,
            bytes_sent: transport.bytes_sent,
            packets_received: self.receiver_stats.packets_accepted.load(Ordering::Relaxed),
            invalid_packets: self.receiver_stats.invalid_packets.load(Ordering::Relaxed),
            recv_errors: self.receiver_stats.recv_errors.load(Ordering::Relaxed),
            ring_available: self.ring.available(),
            ring_fill: self.ring.fill_level(),
            ring_overflows: self.ring.overflow_count(),
            samples_dropped: self.ring.samples_dropped(),
            ring_underruns: self.ring.underrun_count(),
        }
    }

    /// Stop the session and wait (bounded) for its threads
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.receiver.is_none() && self.pump.is_none() {
            return;
        }

        self.running.store(false, Ordering::SeqCst);
        let timeout = self.config.network.join_timeout();

        if let Some(receiver) = self.receiver.take() {
            receiver.join_timeout(timeout);
        }
        // The pump stops the capture device as it exits
        if let Some(pump) = self.pump.take() {
            pump.join_timeout(timeout);
        }

        tracing::info!("Voice session stopped");
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pick a device, start it, and wait for its first samples
fn open_capture(
    audio: &AudioConfig,
    backend: &dyn CaptureBackend,
) -> std::result::Result<(String, Box<dyn CaptureSource>), AudioError> {
    let device_id = match &audio.mic_device {
        Some(id) => id.clone(),
        None => backend
            .list_devices()
            .into_iter()
            .next()
            .ok_or(AudioError::NoCaptureDevices)?,
    };

    let mut source = backend.start(&device_id, audio.capture_buffer_secs, audio.sample_rate)?;
    if let Err(e) = wait_for_start(source.as_ref(), audio.mic_start_timeout()) {
        source.stop();
        return Err(e);
    }

    tracing::info!("Microphone started: {}", device_id);
    Ok((device_id, source))
}

/// Snapshot of session counters
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub capture_enabled: bool,
    pub frames_sent: u64,
    pub send_failures: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub invalid_packets: u64,
    pub recv_errors: u64,
    pub ring_available: usize,
    pub ring_fill: f32,
    pub ring_overflows: u64,
    pub samples_dropped: u64,
    pub ring_underruns: u64,
}
