//! # LAN Voice Chat
//!
//! Point-to-point voice chat over UDP using raw PCM16 mono frames.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             LOCAL PEER                               │
//! │                                                                      │
//! │  ┌────────────┐   ┌───────────────┐   ┌────────────┐                 │
//! │  │ Microphone │──▶│ Capture Pump  │──▶│   PCM16    │                 │
//! │  │  (cpal)    │   │ (pump thread) │   │  Encoder   │                 │
//! │  └────────────┘   └───────────────┘   └─────┬──────┘                 │
//! │                                             │                        │
//! │                                             ▼                        │
//! │  ┌───────────────────────────────────────────────────────────────┐   │
//! │  │        Datagram Transport (network::udp) - Single Socket      │   │
//! │  │        Payload: [i16 LE sample]*N, no header                  │   │
//! │  └───────────────────────────────────────────────────────────────┘   │
//! │                                             ▲                        │
//! │  ┌────────────┐   ┌───────────────┐   ┌─────┴──────┐                 │
//! │  │  Speaker   │◀──│ Playback Ring │◀──│ Receive    │                 │
//! │  │  (cpal)    │   │ (mutex guard) │   │ Loop+PCM16 │                 │
//! │  └────────────┘   └───────────────┘   │  Decoder   │                 │
//! │                                       └────────────┘                 │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                │ UDP (port 50005)
//!                                ▼
//!                           REMOTE PEER
//! ```
//!
//! Three execution contexts share state: the capture pump thread (send
//! only), the receive thread (sole ring writer) and the real-time output
//! callback (sole ring reader). Everything is owned by a
//! [`session::VoiceSession`].

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod worker;

pub use error::{Error, Result};
pub use session::{SessionStats, VoiceSession};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for capture and playback
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default frame duration in milliseconds
    pub const DEFAULT_FRAME_MS: u32 = 20;

    /// Default UDP port, used for both directions
    pub const DEFAULT_VOICE_PORT: u16 = 50005;

    /// Default remote address
    pub const DEFAULT_REMOTE_ADDRESS: &str = "127.0.0.1";

    /// Default playback ring window in seconds
    pub const DEFAULT_PLAYBACK_WINDOW_SECS: u32 = 2;

    /// Default rolling capture buffer length in seconds
    pub const DEFAULT_CAPTURE_BUFFER_SECS: u32 = 1;

    /// Default socket receive timeout; doubles as the cancellation check
    /// interval, so it stays below the join timeout
    pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 200;

    /// Upper bound for the receive timeout so teardown stays responsive
    pub const MAX_RECV_TIMEOUT_MS: u64 = 1000;

    /// Default bounded wait for worker threads at teardown
    pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 500;

    /// Default deadline for a microphone to start producing samples
    pub const DEFAULT_MIC_START_TIMEOUT_MS: u64 = 3000;

    /// Largest payload a single UDP datagram can carry over IPv4
    pub const MAX_PACKET_SIZE: usize = 65507;

    /// Receive buffer size, large enough for any datagram
    pub const MAX_DATAGRAM_SIZE: usize = 65536;

    /// Full-scale value used for float <-> PCM16 conversion
    pub const PCM16_SCALE: f32 = 32767.0;
}
