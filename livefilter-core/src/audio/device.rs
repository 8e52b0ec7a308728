//! Input and output device enumeration for the duplex engine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about one audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Device name reported by the OS. Doubles as the device id.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
    /// Most channels any supported config offers.
    pub max_channels: u16,
    /// Whether some f32 config covers 48 kHz.
    pub supports_48k: bool,
    /// Heuristic flag for inputs that capture system output. Routing one of
    /// these into the speakers feeds back.
    pub is_loopback_like: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "blackhole",
];

/// Best-effort heuristic for loopback/system-output capture devices.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// List capture devices. Returns an empty `Vec` if enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    list(DeviceDirection::Input)
}

/// List playback devices. Returns an empty `Vec` if enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    list(DeviceDirection::Output)
}

#[cfg(feature = "audio-cpal")]
fn list(direction: DeviceDirection) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};
    use cpal::SampleFormat;

    use super::SAMPLE_RATE;

    let host = cpal::default_host();
    let (default_name, devices) = match direction {
        DeviceDirection::Input => (
            host.default_input_device().and_then(|d| d.name().ok()),
            host.input_devices().map(|d| d.collect::<Vec<_>>()),
        ),
        DeviceDirection::Output => (
            host.default_output_device().and_then(|d| d.name().ok()),
            host.output_devices().map(|d| d.collect::<Vec<_>>()),
        ),
    };

    let devices = match devices {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!("failed to enumerate {direction:?} devices: {e}");
            return vec![];
        }
    };

    let mut list = devices
        .into_iter()
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("{direction:?} Device {}", idx + 1));
            let ranges: Vec<_> = match direction {
                DeviceDirection::Input => device
                    .supported_input_configs()
                    .map(|r| r.collect())
                    .unwrap_or_default(),
                DeviceDirection::Output => device
                    .supported_output_configs()
                    .map(|r| r.collect())
                    .unwrap_or_default(),
            };
            let max_channels = ranges.iter().map(|r| r.channels()).max().unwrap_or(0);
            let supports_48k = ranges.iter().any(|r| {
                r.sample_format() == SampleFormat::F32
                    && r.min_sample_rate().0 <= SAMPLE_RATE
                    && SAMPLE_RATE <= r.max_sample_rate().0
            });
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback_like: direction == DeviceDirection::Input
                    && is_loopback_like_name(&name),
                name,
                direction,
                max_channels,
                supports_48k,
            }
        })
        .collect::<Vec<_>>();

    list.sort_by_key(|d| (!d.is_default, !d.supports_48k, d.name.to_ascii_lowercase()));
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}
