//! Audio device data models.
//!
//! Defines the capture device snapshot, the two capabilities the polling
//! loop needs from the platform (listing devices and reading/writing their
//! volume), and the error types every platform failure is converted into.

use thiserror::Error;

/// Friendly name substituted when the platform cannot resolve one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// A capture endpoint as seen by one enumeration snapshot.
///
/// The handle is only valid for the tick that produced it and is dropped
/// (releasing the platform object) together with the snapshot.
#[derive(Debug, Clone)]
pub struct Device<H> {
    /// Human-readable device name, the identity key across ticks
    pub name: String,

    /// Live platform handle for the current tick
    pub handle: H,
}

impl<H> Device<H> {
    /// Create a device snapshot entry.
    pub fn new(name: impl Into<String>, handle: H) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    /// True if `filter` is empty or is a case-sensitive substring of the name.
    pub fn matches(&self, filter: &str) -> bool {
        filter.is_empty() || self.name.contains(filter)
    }
}

/// Enumerates active capture endpoints.
pub trait DeviceDirectory {
    /// Platform handle type carried by each device.
    type Handle;

    /// List all capture endpoints in the active state.
    ///
    /// Devices whose name cannot be resolved are reported as
    /// [`UNKNOWN_DEVICE_NAME`] rather than failing the whole call.
    fn list_active_capture_devices(&self) -> Result<Vec<Device<Self::Handle>>, AudioError>;
}

/// Reads and writes the scalar master volume of a device.
///
/// Implementations hold no per-device state between calls.
pub trait VolumeControl {
    /// Platform handle type accepted by this controller.
    type Handle;

    /// Current scalar volume (0.0 to 1.0).
    fn get_volume(&self, device: &Self::Handle) -> Result<f32, AudioError>;

    /// Set the scalar volume. Out-of-range levels are rejected by the backend.
    fn set_volume(&self, device: &Self::Handle, level: f32) -> Result<(), AudioError>;
}

/// A platform failure reduced to its code and text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("0x{code:08X}: {message}")]
pub struct PlatformError {
    /// Raw HRESULT / Win32 code
    pub code: i32,

    /// Platform-provided description
    pub message: String,
}

impl PlatformError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for PlatformError {
    fn from(err: windows::core::Error) -> Self {
        Self {
            code: err.code().0,
            message: err.message(),
        }
    }
}

/// Audio error types.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AudioError {
    #[error("COM initialization failed: {0}")]
    ComInitFailed(PlatformError),

    #[error("Failed to enumerate devices: {0}")]
    EnumerationFailed(PlatformError),

    #[error("Volume control not available for device: {0}")]
    VolumeNotAvailable(PlatformError),

    #[error("Failed to read volume: {0}")]
    VolumeReadFailed(PlatformError),

    #[error("Failed to set volume: {0}")]
    SetVolumeFailed(PlatformError),

    #[error("Device no longer present: {name}")]
    DeviceGone { name: String },
}

impl AudioError {
    /// Platform code carried by the error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            AudioError::ComInitFailed(e)
            | AudioError::EnumerationFailed(e)
            | AudioError::VolumeNotAvailable(e)
            | AudioError::VolumeReadFailed(e)
            | AudioError::SetVolumeFailed(e) => Some(e.code),
            AudioError::DeviceGone { .. } => None,
        }
    }
}

/// Scalar volume as a rounded percentage (0-100).
pub fn volume_percent(level: f32) -> u8 {
    (level.clamp(0.0, 1.0) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_is_case_sensitive_substring() {
        let device = Device::new("USB Microphone (Yeti)", ());
        assert!(device.matches(""));
        assert!(device.matches("USB"));
        assert!(device.matches("Yeti"));
        assert!(!device.matches("usb"));
        assert!(!device.matches("Headset"));
    }

    #[test]
    fn test_platform_error_formats_code_as_hex() {
        let err = AudioError::SetVolumeFailed(PlatformError::new(0x8007_0057_u32 as i32, "The parameter is incorrect."));
        assert_eq!(
            err.to_string(),
            "Failed to set volume: 0x80070057: The parameter is incorrect."
        );
        assert_eq!(err.code(), Some(0x8007_0057_u32 as i32));
    }

    #[test]
    fn test_volume_percent() {
        assert_eq!(volume_percent(0.4), 40);
        assert_eq!(volume_percent(1.0), 100);
        assert_eq!(volume_percent(0.996), 100);
        assert_eq!(volume_percent(-1.0), 0);
    }
}
