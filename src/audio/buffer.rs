//! Playback ring buffer for received audio
//!
//! A fixed-capacity circular buffer of mono samples with one writer (the
//! receive loop) and one reader (the real-time output callback). Both sides
//! share a single mutex; every critical section is a bounded copy with no
//! allocation or I/O, so the output callback never waits on the network.
//!
//! Overflow: when a write would exceed the unread capacity, the read cursor
//! is pushed forward and the oldest unread samples are lost.
//!
//! Drain: once the reader has consumed every unread sample, the next write
//! moves the write cursor to the read cursor before copying, so new audio
//! plays immediately. Apart from [`PlaybackRing::reset`], this is the only
//! time the write cursor moves without a sample being written.
//!
//! Underrun: a read of more samples than are unread still returns the
//! requested count, replaying whatever the slots currently hold (silence
//! before the first write).

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct RingState {
    samples: Box<[f32]>,
    write_pos: usize,
    read_pos: usize,
    /// Unread samples between read_pos and write_pos
    available: usize,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.samples.len()
    }

    fn copy_in(&mut self, samples: &[f32]) {
        let capacity = self.capacity();
        let mut done = 0;
        while done < samples.len() {
            let n = (capacity - self.write_pos).min(samples.len() - done);
            self.samples[self.write_pos..self.write_pos + n]
                .copy_from_slice(&samples[done..done + n]);
            self.write_pos = (self.write_pos + n) % capacity;
            done += n;
        }
    }

    fn copy_out(&mut self, out: &mut [f32]) {
        let capacity = self.capacity();
        let mut done = 0;
        while done < out.len() {
            let n = (capacity - self.read_pos).min(out.len() - done);
            out[done..done + n].copy_from_slice(&self.samples[self.read_pos..self.read_pos + n]);
            self.read_pos = (self.read_pos + n) % capacity;
            done += n;
        }
    }

    /// Account for `count` samples leaving the read side.
    /// Returns true on underrun.
    fn consume(&mut self, count: usize) -> bool {
        if count > self.available {
            self.available = 0;
            true
        } else {
            self.available -= count;
            false
        }
    }
}

/// Fixed-capacity mono playback ring
pub struct PlaybackRing {
    state: Mutex<RingState>,
    capacity: usize,
    overflow_count: AtomicU64,
    underrun_count: AtomicU64,
    samples_dropped: AtomicU64,
}

impl PlaybackRing {
    /// Create a ring holding `capacity` samples, initially silent.
    ///
    /// A zero capacity is raised to one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(RingState {
                samples: vec![0.0; capacity].into_boxed_slice(),
                write_pos: 0,
                read_pos: 0,
                available: 0,
            }),
            capacity,
            overflow_count: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
        }
    }

    /// Create a ring sized for `window_secs` of audio at `sample_rate`
    pub fn with_window(sample_rate: u32, window_secs: u32) -> Self {
        Self::new(sample_rate as usize * window_secs as usize)
    }

    /// Write samples at the write cursor.
    ///
    /// Never blocks. Returns the number of unread samples sacrificed to make
    /// room (zero when nothing overflowed). A write longer than the capacity
    /// keeps only its last `capacity` samples.
    pub fn write(&self, samples: &[f32]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let truncated = samples.len().saturating_sub(self.capacity);
        let samples = &samples[truncated..];

        let dropped = {
            let mut state = self.state.lock();

            // Reader has drained everything: resume right where it is reading
            if state.available == 0 {
                state.write_pos = state.read_pos;
            }

            let overflow = (state.available + samples.len()).saturating_sub(self.capacity);
            if overflow > 0 {
                state.read_pos = (state.read_pos + overflow) % self.capacity;
                state.available -= overflow;
            }

            state.copy_in(samples);
            state.available += samples.len();
            overflow
        };

        let dropped = dropped + truncated;
        if dropped > 0 {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            self.samples_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        dropped
    }

    /// Fill `out` from the read cursor, advancing it by `out.len()`.
    ///
    /// Never blocks; on underrun the stale slot contents are returned.
    pub fn read_into(&self, out: &mut [f32]) {
        if out.is_empty() {
            return;
        }

        let underrun = {
            let mut state = self.state.lock();
            state.copy_out(out);
            state.consume(out.len())
        };

        if underrun {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read `count` samples into a new vector.
    ///
    /// Allocates outside the lock; the output callback should use
    /// [`read_into`](Self::read_into) or
    /// [`fill_interleaved`](Self::fill_interleaved) instead.
    pub fn read(&self, count: usize) -> Vec<f32> {
        let mut out = vec![0.0; count];
        self.read_into(&mut out);
        out
    }

    /// Fill an interleaved output buffer, duplicating each mono sample
    /// across all `channels`.
    ///
    /// Consumes `out.len() / channels` samples. A trailing partial frame is
    /// zeroed.
    pub fn fill_interleaved(&self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            out.fill(0.0);
            return;
        }

        let frames = out.len() / channels;
        let (whole, tail) = out.split_at_mut(frames * channels);
        tail.fill(0.0);
        if frames == 0 {
            return;
        }

        let underrun = {
            let mut state = self.state.lock();
            let capacity = state.capacity();
            for frame in whole.chunks_exact_mut(channels) {
                let sample = state.samples[state.read_pos];
                state.read_pos = (state.read_pos + 1) % capacity;
                frame.fill(sample);
            }
            state.consume(frames)
        };

        if underrun {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Unread samples currently buffered
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Unread fraction of the capacity
    pub fn fill_level(&self) -> f32 {
        self.available() as f32 / self.capacity as f32
    }

    /// Number of writes that sacrificed unread samples
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Number of reads that ran past the written data
    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Total unread samples discarded by overflow
    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    /// Silence the ring and rewind both cursors
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.samples.fill(0.0);
        state.write_pos = 0;
        state.read_pos = 0;
        state.available = 0;
    }
}

/// Thread-safe handle to a playback ring
pub type SharedPlaybackRing = Arc<PlaybackRing>;

/// Create a new shared playback ring
pub fn create_shared_ring(capacity: usize) -> SharedPlaybackRing {
    Arc::new(PlaybackRing::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_ring_starts_silent() {
        let ring = PlaybackRing::new(8);
        assert_eq!(ring.read(4), vec![0.0; 4]);
        assert_eq!(ring.underrun_count(), 1);
    }

    #[test]
    fn test_write_then_read_in_order() {
        let ring = PlaybackRing::new(8);
        ring.write(&[1.0, 2.0, 3.0]);
        ring.write(&[4.0, 5.0]);

        assert_eq!(ring.available(), 5);
        assert_eq!(ring.read(5), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.underrun_count(), 0);
    }

    #[test]
    fn test_exact_capacity_write_is_kept_whole() {
        let ring = PlaybackRing::new(4);
        assert_eq!(ring.write(&[1.0, 2.0, 3.0, 4.0]), 0);
        assert_eq!(ring.read(4), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ring.overflow_count(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let ring = PlaybackRing::new(4);
        ring.write(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ring.write(&[5.0, 6.0]), 2);

        assert_eq!(ring.available(), 4);
        assert_eq!(ring.read(4), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(ring.overflow_count(), 1);
        assert_eq!(ring.samples_dropped(), 2);
    }

    #[test]
    fn test_write_larger_than_capacity_keeps_tail() {
        let ring = PlaybackRing::new(3);
        assert_eq!(ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0]), 2);
        assert_eq!(ring.read(3), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_wraparound() {
        let ring = PlaybackRing::new(4);
        ring.write(&[1.0, 2.0, 3.0]);
        assert_eq!(ring.read(2), vec![1.0, 2.0]);

        // write_pos = 3, wraps to 0 and 1
        ring.write(&[4.0, 5.0, 6.0]);
        assert_eq!(ring.read(4), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_underrun_replays_stale_slots() {
        let ring = PlaybackRing::new(4);
        ring.write(&[1.0, 2.0]);

        // Two fresh samples, then whatever sits in slots 2 and 3
        assert_eq!(ring.read(4), vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(ring.underrun_count(), 1);

        // Read cursor is back at slot 0: stale data replays
        assert_eq!(ring.read(2), vec![1.0, 2.0]);
        assert_eq!(ring.underrun_count(), 2);
    }

    #[test]
    fn test_write_after_drain_is_played_next() {
        let ring = PlaybackRing::new(8);
        ring.write(&[1.0, 2.0]);
        ring.read(5); // overshoots the writer by three slots

        ring.write(&[7.0, 8.0]);
        assert_eq!(ring.read(2), vec![7.0, 8.0]);
    }

    #[test]
    fn test_fill_interleaved_duplicates_channels() {
        let ring = PlaybackRing::new(8);
        ring.write(&[0.1, 0.2, 0.3]);

        let mut out = [9.0f32; 7];
        ring.fill_interleaved(&mut out, 2);

        assert_eq!(out, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.0]);
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.underrun_count(), 0);
    }

    #[test]
    fn test_fill_interleaved_zero_channels() {
        let ring = PlaybackRing::new(4);
        ring.write(&[0.5]);
        let mut out = [1.0f32; 4];
        ring.fill_interleaved(&mut out, 0);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(ring.available(), 1);
    }

    #[test]
    fn test_reset() {
        let ring = PlaybackRing::new(4);
        ring.write(&[1.0, 2.0, 3.0]);
        ring.reset();
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.read(3), vec![0.0; 3]);
    }

    #[test]
    fn test_with_window_capacity() {
        let ring = PlaybackRing::with_window(48000, 2);
        assert_eq!(ring.capacity(), 96000);
        assert_eq!(PlaybackRing::new(0).capacity(), 1);
    }

    #[test]
    fn test_concurrent_writer_and_reader_never_block() {
        let ring = create_shared_ring(256);
        let writer_ring = ring.clone();

        let writer = thread::spawn(move || {
            let frame = [0.5f32; 64];
            for _ in 0..2000 {
                writer_ring.write(&frame);
            }
        });

        let mut out = [0.0f32; 96];
        for _ in 0..2000 {
            ring.fill_interleaved(&mut out, 2);
            // Only 0.5 or initial silence can ever be observed
            assert!(out.iter().all(|&s| s == 0.5 || s == 0.0));
        }

        writer.join().unwrap();
        assert!(ring.available() <= ring.capacity());
    }

    proptest! {
        #[test]
        fn prop_writes_within_capacity_read_back_in_order(
            capacity in 1usize..512,
            chunks in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 0..64), 0..16),
        ) {
            let ring = PlaybackRing::new(capacity);
            let mut expected = Vec::new();
            for chunk in &chunks {
                if expected.len() + chunk.len() > capacity {
                    break;
                }
                ring.write(chunk);
                expected.extend_from_slice(chunk);
            }

            prop_assert_eq!(ring.read(expected.len()), expected);
            prop_assert_eq!(ring.overflow_count(), 0);
        }
    }
}
