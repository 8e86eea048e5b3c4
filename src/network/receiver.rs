//! Receive loop: transport -> PCM16 decode -> playback ring
//!
//! Runs on its own thread for the whole session. The socket read timeout is
//! the only cancellation point: after every timeout the loop re-checks the
//! running flag. Nothing short of clearing that flag ends the loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::SharedPlaybackRing;
use crate::codec::Pcm16Decoder;
use crate::constants::MAX_DATAGRAM_SIZE;
use crate::network::udp::{DatagramTransport, RecvOutcome};

/// Receive-side counters
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub packets_accepted: AtomicU64,
    pub invalid_packets: AtomicU64,
    pub recv_errors: AtomicU64,
    pub samples_received: AtomicU64,
}

/// Feeds received voice frames into the playback ring
pub struct ReceiveLoop {
    transport: Arc<DatagramTransport>,
    ring: SharedPlaybackRing,
    running: Arc<AtomicBool>,
    decoder: Pcm16Decoder,
    stats: Arc<ReceiverStats>,
}

impl ReceiveLoop {
    pub fn new(
        transport: Arc<DatagramTransport>,
        ring: SharedPlaybackRing,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            ring,
            running,
            decoder: Pcm16Decoder::new(),
            stats: Arc::new(ReceiverStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    /// Run until the running flag is cleared (blocking)
    pub fn run(mut self) {
        tracing::info!("Receive loop started");

        let mut datagram = vec![0u8; MAX_DATAGRAM_SIZE];
        // Decoded samples; the allocation survives across packets
        let mut samples: Vec<f32> = Vec::with_capacity(MAX_DATAGRAM_SIZE / 2);

        while self.running.load(Ordering::Relaxed) {
            let (len, from) = match self.transport.recv(&mut datagram) {
                Ok(RecvOutcome::Datagram { len, from }) => (len, from),
                Ok(RecvOutcome::TimedOut) => continue,
                Err(e) => {
                    self.stats.recv_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Receive error: {}", e);
                    continue;
                }
            };

            match self.decoder.decode_into(&datagram[..len], &mut samples) {
                Ok(count) => {
                    let dropped = self.ring.write(&samples);
                    if dropped > 0 {
                        tracing::debug!("Playback ring overflow, dropped {} samples", dropped);
                    }
                    self.stats.packets_accepted.fetch_add(1, Ordering::Relaxed);
                    self.stats.samples_received.fetch_add(count as u64, Ordering::Relaxed);
                    tracing::trace!("Received {} samples from {}", count, from);
                }
                Err(e) => {
                    self.stats.invalid_packets.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Discarding malformed packet from {}: {}", from, e);
                }
            }
        }

        tracing::info!("Receive loop stopped");
    }
}
