//! Capture pump: capture device -> PCM16 frames -> transport
//!
//! Each [`CapturePump::poll`] looks at how far the capture device has
//! written since the last poll and ships every complete frame. Partial
//! frames wait for the next poll. If the pump falls more than one device
//! buffer behind, the overwritten samples are lost for good.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::capture::CaptureSource;
use crate::codec::Pcm16Encoder;
use crate::error::CodecError;
use crate::network::udp::FrameSink;

/// Counters shared with whoever reports statistics
#[derive(Debug, Default)]
pub struct SenderStats {
    pub frames_sent: AtomicU64,
    pub send_failures: AtomicU64,
}

/// Polls a capture source and transmits complete frames
pub struct CapturePump<S: FrameSink> {
    source: Box<dyn CaptureSource>,
    encoder: Pcm16Encoder,
    sink: Arc<S>,
    /// Next sample to consume in the device's rolling buffer
    position: usize,
    /// Scratch frame reused across polls
    frame: Vec<f32>,
    stats: Arc<SenderStats>,
}

impl<S: FrameSink> CapturePump<S> {
    /// Create a pump sending frames of `frame_size` samples.
    ///
    /// Consumption starts at the device's current write cursor, so audio
    /// captured before the pump existed is not sent.
    pub fn new(source: Box<dyn CaptureSource>, frame_size: usize, sink: Arc<S>) -> Result<Self, CodecError> {
        let encoder = Pcm16Encoder::new(frame_size)?;
        let position = source.write_cursor();
        Ok(Self {
            source,
            encoder,
            sink,
            position,
            frame: vec![0.0; frame_size],
            stats: Arc::new(SenderStats::default()),
        })
    }

    /// Ship every complete frame available since the last poll.
    ///
    /// Returns the number of frames processed, including ones whose send
    /// failed.
    pub fn poll(&mut self) -> usize {
        let buffer_len = self.source.buffer_len();
        let frame_size = self.frame.len();
        if buffer_len == 0 {
            return 0;
        }

        let cursor = self.source.write_cursor();
        let mut pending = if cursor >= self.position {
            cursor - self.position
        } else {
            cursor + buffer_len - self.position
        };

        let mut processed = 0;
        while pending >= frame_size {
            self.source.read(&mut self.frame, self.position);

            match self.encoder.encode(&self.frame) {
                Ok(payload) => match self.sink.send_frame(&payload) {
                    Ok(_) => {
                        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Failed to send voice frame: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Encoding failed: {}", e);
                }
            }

            self.position = (self.position + frame_size) % buffer_len;
            pending -= frame_size;
            processed += 1;
        }

        processed
    }

    /// Poll every `interval` until `running` is cleared
    pub fn run(mut self, running: Arc<AtomicBool>, interval: Duration) {
        tracing::debug!("Capture pump started ({} samples/frame)", self.frame.len());

        let mut next_tick = Instant::now();
        while running.load(Ordering::Relaxed) {
            self.poll();

            next_tick += interval;
            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            } else {
                // Fell behind; do not try to catch up tick by tick
                next_tick = now;
            }
        }

        tracing::debug!("Capture pump stopped");
    }

    /// Samples per frame
    pub fn frame_size(&self) -> usize {
        self.frame.len()
    }

    /// Current consumption position in the device buffer
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn stats(&self) -> Arc<SenderStats> {
        self.stats.clone()
    }
}

impl<S: FrameSink> Drop for CapturePump<S> {
    fn drop(&mut self) {
        self.source.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::RollingBuffer;
    use crate::codec::Pcm16Decoder;
    use crate::error::NetworkError;
    use parking_lot::Mutex;

    /// Capture source driven by the test
    struct ScriptedSource {
        buffer: Arc<RollingBuffer>,
        stopped: Arc<AtomicBool>,
    }

    impl CaptureSource for ScriptedSource {
        fn buffer_len(&self) -> usize {
            self.buffer.len()
        }
        fn write_cursor(&self) -> usize {
            self.buffer.cursor()
        }
        fn read(&self, out: &mut [f32], start: usize) {
            self.buffer.read(out, start);
        }
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    /// Records payloads; fails the sends whose index is listed
    #[derive(Default)]
    struct RecordingSink {
        payloads: Mutex<Vec<Vec<u8>>>,
        fail_on: Vec<usize>,
        attempts: AtomicU64,
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&self, payload: &[u8]) -> Result<usize, NetworkError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) as usize;
            if self.fail_on.contains(&attempt) {
                return Err(NetworkError::SendFailed("injected".to_string()));
            }
            self.payloads.lock().push(payload.to_vec());
            Ok(payload.len())
        }
    }

    fn scripted(len: usize) -> (Box<dyn CaptureSource>, Arc<RollingBuffer>, Arc<AtomicBool>) {
        let buffer = Arc::new(RollingBuffer::new(len));
        let stopped = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource {
            buffer: buffer.clone(),
            stopped: stopped.clone(),
        };
        (Box::new(source), buffer, stopped)
    }

    fn decode_all(sink: &RecordingSink) -> Vec<f32> {
        let mut decoder = Pcm16Decoder::new();
        sink.payloads
            .lock()
            .iter()
            .flat_map(|p| decoder.decode(p).unwrap())
            .collect()
    }

    fn ramp(start: usize, count: usize) -> Vec<f32> {
        (start..start + count).map(|i| i as f32 / 1000.0).collect()
    }

    #[test]
    fn test_only_complete_frames_are_sent() {
        let (source, buffer, _) = scripted(64);
        let sink = Arc::new(RecordingSink::default());
        let mut pump = CapturePump::new(source, 8, sink.clone()).unwrap();

        buffer.push(&ramp(0, 20));
        assert_eq!(pump.poll(), 2);
        assert_eq!(pump.position(), 16);

        // Four leftover samples plus four more complete the third frame
        buffer.push(&ramp(20, 4));
        assert_eq!(pump.poll(), 1);

        let payloads = sink.payloads.lock();
        assert_eq!(payloads.len(), 3);
        assert!(payloads.iter().all(|p| p.len() == 16));
    }

    #[test]
    fn test_wraparound_neither_skips_nor_duplicates() {
        let (source, buffer, _) = scripted(10);
        let sink = Arc::new(RecordingSink::default());
        let mut pump = CapturePump::new(source, 4, sink.clone()).unwrap();

        let mut expected = Vec::new();
        let mut next = 0;
        // Backlog stays under one device buffer, so nothing is overwritten
        for chunk in [6usize, 3, 5, 7, 2, 5] {
            buffer.push(&ramp(next, chunk));
            next += chunk;
            pump.poll();
        }
        // 28 samples written, 7 full frames consumed
        expected.extend(ramp(0, 28));

        let sent = decode_all(&sink);
        assert_eq!(sent.len(), 28);
        for (a, b) in sent.iter().zip(expected.iter()) {
            assert!((a - b).abs() <= 1.0 / 32767.0 + f32::EPSILON);
        }
        assert_eq!(pump.position(), 28 % 10);
    }

    #[test]
    fn test_backlog_beyond_buffer_loses_only_overwritten_samples() {
        let (source, buffer, _) = scripted(10);
        let sink = Arc::new(RecordingSink::default());
        let mut pump = CapturePump::new(source, 4, sink.clone()).unwrap();

        // 17 samples into a 10 sample buffer: 0..7 are overwritten
        buffer.push(&ramp(0, 17));
        assert_eq!(pump.poll(), 1);
        assert_eq!(pump.position(), 4);

        buffer.push(&ramp(17, 5));
        assert_eq!(pump.poll(), 2);
        assert!(pump.position() < 10);
        assert_eq!(pump.position(), 2);

        let payloads = sink.payloads.lock().clone();
        assert!(payloads.iter().all(|p| p.len() == 8));

        // What went out is what the buffer still held, in order
        let sent = decode_all(&sink);
        let expected = ramp(10, 12);
        assert_eq!(sent.len(), expected.len());
        for (a, b) in sent.iter().zip(expected.iter()) {
            assert!((a - b).abs() <= 1.0 / 32767.0 + f32::EPSILON);
        }
    }

    #[test]
    fn test_send_failure_does_not_stop_pipeline() {
        let (source, buffer, _) = scripted(64);
        let sink = Arc::new(RecordingSink {
            fail_on: vec![1],
            ..Default::default()
        });
        let mut pump = CapturePump::new(source, 4, sink.clone()).unwrap();
        let stats = pump.stats();

        buffer.push(&ramp(0, 12));
        assert_eq!(pump.poll(), 3);

        assert_eq!(sink.payloads.lock().len(), 2);
        assert_eq!(stats.frames_sent.load(Ordering::Relaxed), 2);
        assert_eq!(stats.send_failures.load(Ordering::Relaxed), 1);

        buffer.push(&ramp(12, 4));
        assert_eq!(pump.poll(), 1);
        assert_eq!(stats.frames_sent.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_starts_at_current_cursor() {
        let (source, buffer, _) = scripted(32);
        buffer.push(&ramp(0, 10));

        let sink = Arc::new(RecordingSink::default());
        let mut pump = CapturePump::new(source, 4, sink.clone()).unwrap();
        assert_eq!(pump.position(), 10);
        assert_eq!(pump.poll(), 0);
    }

    #[test]
    fn test_drop_stops_source() {
        let (source, _, stopped) = scripted(32);
        let pump = CapturePump::new(source, 4, Arc::new(RecordingSink::default())).unwrap();
        drop(pump);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_exits_when_flag_cleared() {
        let (source, buffer, _) = scripted(4800);
        let sink = Arc::new(RecordingSink::default());
        let pump = CapturePump::new(source, 480, sink.clone()).unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let flag = running.clone();
        let handle = thread::spawn(move || pump.run(flag, Duration::from_millis(5)));

        buffer.push(&vec![0.25; 960]);
        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.payloads.lock().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(sink.payloads.lock().len(), 2);
    }
}
