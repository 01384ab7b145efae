//! Device enumeration using Windows MMDevice API.
//!
//! Provides COM initialization and the capture endpoint directory used by
//! the polling loop.

use super::device::{AudioError, Device, DeviceDirectory, PlatformError, UNKNOWN_DEVICE_NAME};
use windows::Win32::Devices::Properties::DEVPKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::{
    eCapture, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_APARTMENTTHREADED, STGM,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

/// COM initialization guard that uninitializes COM on drop.
///
/// Must be created and dropped on the same thread.
pub struct ComGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ComGuard {
    /// Initialize COM for the current thread.
    pub fn new() -> Result<Self, AudioError> {
        unsafe {
            CoInitializeEx(None, COINIT_APARTMENTTHREADED)
                .ok()
                .map_err(|e| AudioError::ComInitFailed(e.into()))?;
        }
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

/// Capture endpoint directory backed by `IMMDeviceEnumerator`.
///
/// A fresh enumerator is created for every listing so that nothing is
/// retained between ticks. Owns the thread's COM initialization, so it must
/// outlive every `IMMDevice` it hands out.
pub struct WasapiDirectory {
    _com: ComGuard,
}

impl WasapiDirectory {
    /// Initialize COM on the calling thread and create the directory.
    pub fn new() -> Result<Self, AudioError> {
        Ok(Self {
            _com: ComGuard::new()?,
        })
    }

    fn enumerator() -> Result<IMMDeviceEnumerator, AudioError> {
        unsafe {
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| AudioError::EnumerationFailed(e.into()))
        }
    }

    /// Get the friendly name of a device from its property store.
    fn device_name(device: &IMMDevice) -> Option<String> {
        unsafe {
            let props: IPropertyStore = device.OpenPropertyStore(STGM(0)).ok()?;

            // Convert DEVPROPKEY to PROPERTYKEY
            let key = PROPERTYKEY {
                fmtid: DEVPKEY_Device_FriendlyName.fmtid,
                pid: DEVPKEY_Device_FriendlyName.pid,
            };

            let prop = props.GetValue(&key).ok()?;
            let name = prop.to_string();
            if name.is_empty() {
                None
            } else {
                Some(name)
            }
        }
    }
}

impl DeviceDirectory for WasapiDirectory {
    type Handle = IMMDevice;

    fn list_active_capture_devices(&self) -> Result<Vec<Device<IMMDevice>>, AudioError> {
        let enumerator = Self::enumerator()?;

        unsafe {
            let collection = enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .map_err(|e| AudioError::EnumerationFailed(e.into()))?;

            let count = collection
                .GetCount()
                .map_err(|e| AudioError::EnumerationFailed(e.into()))?;

            let mut devices = Vec::with_capacity(count as usize);

            for i in 0..count {
                // A device that vanished between GetCount and Item is skipped.
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::debug!(index = i, error = %PlatformError::from(e), "skipping endpoint");
                        continue;
                    }
                };

                let name = Self::device_name(&device)
                    .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());

                devices.push(Device::new(name, device));
            }

            Ok(devices)
        }
    }
}
