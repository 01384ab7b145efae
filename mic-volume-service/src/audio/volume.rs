//! Volume control using IAudioEndpointVolume.
//!
//! The endpoint volume interface is activated for a single operation and
//! released when the wrapper goes out of scope.

use super::device::{AudioError, VolumeControl};
use windows::Win32::Media::Audio::{Endpoints::IAudioEndpointVolume, IMMDevice};
use windows::Win32::System::Com::CLSCTX_ALL;

/// Scoped `IAudioEndpointVolume` for one device.
pub struct EndpointVolume {
    endpoint_volume: IAudioEndpointVolume,
}

impl EndpointVolume {
    /// Activate the volume interface on the given device.
    pub fn activate(device: &IMMDevice) -> Result<Self, AudioError> {
        unsafe {
            let endpoint_volume: IAudioEndpointVolume = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| AudioError::VolumeNotAvailable(e.into()))?;

            Ok(Self { endpoint_volume })
        }
    }

    /// Get the current volume level (0.0 to 1.0).
    pub fn level(&self) -> Result<f32, AudioError> {
        unsafe {
            self.endpoint_volume
                .GetMasterVolumeLevelScalar()
                .map_err(|e| AudioError::VolumeReadFailed(e.into()))
        }
    }

    /// Set the volume level. The endpoint rejects values outside 0.0..=1.0.
    pub fn set_level(&self, level: f32) -> Result<(), AudioError> {
        unsafe {
            self.endpoint_volume
                .SetMasterVolumeLevelScalar(level, std::ptr::null())
                .map_err(|e| AudioError::SetVolumeFailed(e.into()))
        }
    }
}

/// Stateless [`VolumeControl`] over the Core Audio endpoint volume API.
#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointVolumeControl;

impl VolumeControl for EndpointVolumeControl {
    type Handle = IMMDevice;

    fn get_volume(&self, device: &IMMDevice) -> Result<f32, AudioError> {
        EndpointVolume::activate(device)?.level()
    }

    fn set_volume(&self, device: &IMMDevice, level: f32) -> Result<(), AudioError> {
        EndpointVolume::activate(device)?.set_level(level)
    }
}
