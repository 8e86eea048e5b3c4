//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Description of an audio device as seen by the host
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    /// Stable identifier: `input:<name>` or `output:<name>`
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Get default input config
    pub fn default_input_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_input_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }

    /// Get default output config
    pub fn default_output_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_output_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }
}

/// List input devices in host enumeration order
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    list_devices(true)
}

/// List output devices in host enumeration order
pub fn list_output_devices() -> Vec<AudioDeviceInfo> {
    list_devices(false)
}

fn list_devices(is_input: bool) -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_name = if is_input {
        host.default_input_device()
    } else {
        host.default_output_device()
    }
    .and_then(|d| d.name().ok());

    let enumerated = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    };

    let enumerated = match enumerated {
        Ok(iter) => iter,
        Err(e) => {
            tracing::warn!("Failed to enumerate audio devices: {}", e);
            return devices;
        }
    };

    for device in enumerated {
        if let Ok(name) = device.name() {
            let (sample_rates, channels) = get_device_capabilities(&device, is_input);
            devices.push(AudioDeviceInfo {
                id: device_id(&name, is_input),
                is_default: default_name.as_ref() == Some(&name),
                name,
                is_input,
                sample_rates,
                channels,
            });
        }
    }

    devices
}

fn device_id(name: &str, is_input: bool) -> String {
    if is_input {
        format!("input:{}", name)
    } else {
        format!("output:{}", name)
    }
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    for config in &configs {
        for rate_val in [8000u32, 16000, 22050, 44100, 48000, 96000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }

        let ch = config.channels();
        if !channels.contains(&ch) {
            channels.push(ch);
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();

    (sample_rates, channels)
}

/// Get a device by its ID.
///
/// Bare names without an `input:`/`output:` prefix are treated as input
/// devices.
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let (is_input, name) = if let Some(name) = id.strip_prefix("input:") {
        (true, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (false, name)
    } else {
        (true, id)
    };

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(AudioDevice::from_cpal(device, is_input));
            }
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Get default output device
pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false))
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}
