//! Configuration for the voice chat application
//!
//! Loaded from a TOML file; every field has a default so a partial file (or
//! none at all) is valid.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, NetworkError, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub logging: LoggingConfig,
}

/// UDP transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address to bind
    pub bind_address: String,
    /// Local UDP port (0 picks an ephemeral port)
    pub local_port: u16,
    /// Peer IP address
    pub remote_address: String,
    /// Peer UDP port
    pub remote_port: u16,
    /// Socket receive timeout; also the shutdown check interval
    pub recv_timeout_ms: u64,
    /// Bounded wait for worker threads at teardown
    pub join_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            local_port: DEFAULT_VOICE_PORT,
            remote_address: DEFAULT_REMOTE_ADDRESS.to_string(),
            remote_port: DEFAULT_VOICE_PORT,
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
        }
    }
}

impl NetworkConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Local socket address to bind
    pub fn bind_endpoint(&self) -> std::result::Result<SocketAddr, NetworkError> {
        resolve_endpoint(&self.bind_address, self.local_port)
    }

    /// Peer socket address
    pub fn remote_endpoint(&self) -> std::result::Result<SocketAddr, NetworkError> {
        resolve_endpoint(&self.remote_address, self.remote_port)
    }
}

/// Capture and playback configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate for capture, wire and playback
    pub sample_rate: u32,
    /// Frame duration in milliseconds
    pub frame_ms: u32,
    /// Playback ring length in seconds
    pub playback_window_secs: u32,
    /// Capture rolling buffer length in seconds
    pub capture_buffer_secs: u32,
    /// Send microphone audio
    pub use_microphone: bool,
    /// Capture device id; first enumerated device when unset
    pub mic_device: Option<String>,
    /// Deadline for the microphone to deliver its first samples
    pub mic_start_timeout_ms: u64,
    /// Output device name; host default when unset
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_ms: DEFAULT_FRAME_MS,
            playback_window_secs: DEFAULT_PLAYBACK_WINDOW_SECS,
            capture_buffer_secs: DEFAULT_CAPTURE_BUFFER_SECS,
            use_microphone: true,
            mic_device: None,
            mic_start_timeout_ms: DEFAULT_MIC_START_TIMEOUT_MS,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Samples per frame
    pub fn frame_size(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }

    /// Frame duration
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }

    /// Playback ring capacity in samples
    pub fn ring_capacity(&self) -> usize {
        self.playback_window_secs as usize * self.sample_rate as usize
    }

    /// Capture rolling buffer length in samples
    pub fn capture_buffer_len(&self) -> usize {
        self.capture_buffer_secs as usize * self.sample_rate as usize
    }

    pub fn mic_start_timeout(&self) -> Duration {
        Duration::from_millis(self.mic_start_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else from the platform config directory,
    /// else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                tracing::debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Platform config file location, e.g. `~/.config/lan-voice-chat/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "lan-voice-chat").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        let bind = self
            .network
            .bind_endpoint()
            .map_err(|e| Error::Config(e.to_string()))?;
        let remote = self
            .network
            .remote_endpoint()
            .map_err(|e| Error::Config(e.to_string()))?;
        if bind.is_ipv4() != remote.is_ipv4() {
            return Err(Error::Config(format!(
                "remote {} and bind address {} are different IP families",
                remote, bind
            )));
        }

        if self.network.recv_timeout_ms == 0 || self.network.recv_timeout_ms > MAX_RECV_TIMEOUT_MS {
            return Err(Error::Config(format!(
                "recv_timeout_ms must be between 1 and {}, got {}",
                MAX_RECV_TIMEOUT_MS, self.network.recv_timeout_ms
            )));
        }

        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be non-zero".to_string()));
        }
        if audio.frame_size() == 0 {
            return Err(Error::Config(format!(
                "frame_ms {} yields no samples at {}Hz",
                audio.frame_ms, audio.sample_rate
            )));
        }
        if audio.frame_size() * 2 > MAX_PACKET_SIZE {
            return Err(Error::Config(format!(
                "frame of {} samples does not fit in one datagram",
                audio.frame_size()
            )));
        }
        if audio.ring_capacity() < audio.frame_size() {
            return Err(Error::Config(
                "playback window must hold at least one frame".to_string(),
            ));
        }
        if audio.capture_buffer_secs == 0 {
            return Err(Error::Config("capture_buffer_secs must be non-zero".to_string()));
        }
        // The pump never sees a backlog of a whole capture buffer
        if audio.frame_size() >= audio.capture_buffer_len() {
            return Err(Error::Config(format!(
                "frame of {} samples must be shorter than the {} sample capture buffer",
                audio.frame_size(),
                audio.capture_buffer_len()
            )));
        }

        Ok(())
    }
}

/// Parse an IP literal and port into a socket address
pub fn resolve_endpoint(address: &str, port: u16) -> std::result::Result<SocketAddr, NetworkError> {
    address
        .trim()
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .map_err(|_| NetworkError::InvalidAddress(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.local_port, 50005);
        assert_eq!(config.network.remote_port, 50005);
        assert_eq!(config.audio.frame_size(), 960);
        assert_eq!(config.audio.ring_capacity(), 96000);
        assert!(config.audio.use_microphone);
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [network]
            remote_address = "10.0.0.7"
            remote_port = 6000

            [audio]
            frame_ms = 10
            use_microphone = false
            "#,
        )
        .unwrap();

        assert_eq!(
            config.network.remote_endpoint().unwrap(),
            "10.0.0.7:6000".parse().unwrap()
        );
        assert_eq!(config.network.local_port, 50005);
        assert_eq!(config.audio.frame_size(), 480);
        assert!(!config.audio.use_microphone);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_bad_address() {
        let result = AppConfig::from_toml("[network]\nremote_address = \"not-an-ip\"\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_long_recv_timeout() {
        let mut config = AppConfig::default();
        config.network.recv_timeout_ms = 5000;
        assert!(config.validate().is_err());

        config.network.recv_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_frame() {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 8000;
        config.audio.frame_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_window_smaller_than_frame() {
        let mut config = AppConfig::default();
        config.audio.playback_window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_frame_as_long_as_capture_buffer() {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 16000;
        config.audio.frame_ms = 1000;
        config.audio.capture_buffer_secs = 1;
        assert_eq!(config.audio.frame_size(), config.audio.capture_buffer_len());
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.audio.capture_buffer_secs = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_mixed_address_families() {
        let mut config = AppConfig::default();
        config.network.remote_address = "::1".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.network.bind_address = "::".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip_keeps_values() {
        let mut config = AppConfig::default();
        config.audio.mic_device = Some("input:USB Mic".to_string());
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.audio.mic_device.as_deref(), Some("input:USB Mic"));
    }

    #[test]
    fn test_resolve_endpoint_ipv6() {
        let addr = resolve_endpoint("::1", 50005).unwrap();
        assert!(addr.is_ipv6());
        assert!(resolve_endpoint("example.com", 1).is_err());
    }
}
