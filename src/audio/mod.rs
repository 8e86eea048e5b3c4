//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

pub use buffer::{create_shared_ring, PlaybackRing, SharedPlaybackRing};
pub use capture::{CaptureBackend, CaptureSource, CpalCaptureBackend};
pub use device::{list_input_devices, list_output_devices, AudioDeviceInfo};
pub use playback::AudioPlayback;
