//! Audio device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Name that selects the host's default device
pub const DEFAULT_DEVICE: &str = "Default";

/// Device description exposed to the control API
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// Direction of a device lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

impl DeviceKind {
    fn prefix(self) -> &'static str {
        match self {
            DeviceKind::Input => "input:",
            DeviceKind::Output => "output:",
        }
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Ok(name) = device.name() {
                devices.push(AudioDeviceInfo {
                    id: format!("{}{}", DeviceKind::Input.prefix(), name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                });
            }
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                devices.push(AudioDeviceInfo {
                    id: format!("{}{}", DeviceKind::Output.prefix(), name),
                    is_default: default_output_name.as_ref() == Some(&name),
                    name,
                    is_input: false,
                    is_output: true,
                });
            }
        }
    }

    devices
}

/// Whether a configured device name means "use the default"
pub fn is_default_selection(selection: &str) -> bool {
    selection.is_empty() || selection.eq_ignore_ascii_case(DEFAULT_DEVICE)
}

/// Resolve a configured device selection (`"Default"`, a name, or a
/// prefixed id from [`list_devices`])
pub fn find_device(kind: DeviceKind, selection: &str) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    if is_default_selection(selection) {
        let device = match kind {
            DeviceKind::Input => host.default_input_device(),
            DeviceKind::Output => host.default_output_device(),
        };
        return device.ok_or_else(|| AudioError::DeviceNotFound(format!("no default {:?} device", kind)));
    }

    let name = selection.strip_prefix(kind.prefix()).unwrap_or(selection);
    let devices = match kind {
        DeviceKind::Input => host.input_devices(),
        DeviceKind::Output => host.output_devices(),
    }
    .map_err(|e| AudioError::CpalError(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(selection.to_string()))
}
