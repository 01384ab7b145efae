//! In-memory audio backend.
//!
//! Implements both [`DeviceDirectory`] and [`VolumeControl`] over a shared
//! table of simulated capture devices, with failure injection and call
//! accounting. Clones share the same table, so a test can keep one clone to
//! play the "external actor" while the polling thread owns another.

use super::device::{AudioError, Device, DeviceDirectory, PlatformError, VolumeControl};
use parking_lot::Mutex;
use std::sync::Arc;

/// E_INVALIDARG, returned for out-of-range volume writes.
pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;

/// E_FAIL, returned for injected failures.
pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;

/// Default volume of a newly plugged simulated device.
pub const DEFAULT_VOLUME: f32 = 0.5;

/// Handle to a simulated device, valid until the device is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryHandle(u64);

#[derive(Debug)]
struct SimulatedDevice {
    id: u64,
    name: String,
    volume: f32,
    fail_reads: bool,
    fail_writes: bool,
    reads: usize,
    writes: usize,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    devices: Vec<SimulatedDevice>,
    fail_enumeration: bool,
    enumerations: usize,
}

impl Inner {
    fn by_id(&mut self, handle: &MemoryHandle) -> Result<&mut SimulatedDevice, AudioError> {
        self.devices
            .iter_mut()
            .find(|d| d.id == handle.0)
            .ok_or_else(|| AudioError::DeviceGone {
                name: format!("#{}", handle.0),
            })
    }

    fn by_name(&mut self, name: &str) -> Option<&mut SimulatedDevice> {
        self.devices.iter_mut().find(|d| d.name == name)
    }
}

/// Shared in-memory device table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAudio {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`InMemoryAudio::add_device`].
    pub fn with_device(self, name: &str, volume: f32) -> Self {
        self.add_device(name, volume);
        self
    }

    /// Plug in a device at the given volume.
    pub fn add_device(&self, name: &str, volume: f32) -> MemoryHandle {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.devices.push(SimulatedDevice {
            id,
            name: name.to_string(),
            volume,
            fail_reads: false,
            fail_writes: false,
            reads: 0,
            writes: 0,
        });
        MemoryHandle(id)
    }

    /// Unplug every device with this name.
    pub fn remove_device(&self, name: &str) {
        self.inner.lock().devices.retain(|d| d.name != name);
    }

    /// Change a device's volume as another process would, bypassing the
    /// accounting.
    pub fn set_external_volume(&self, name: &str, volume: f32) {
        if let Some(device) = self.inner.lock().by_name(name) {
            device.volume = volume;
        }
    }

    /// Current volume of the named device.
    pub fn volume_of(&self, name: &str) -> Option<f32> {
        self.inner.lock().by_name(name).map(|d| d.volume)
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.inner.lock().fail_enumeration = fail;
    }

    pub fn fail_reads(&self, name: &str, fail: bool) {
        if let Some(device) = self.inner.lock().by_name(name) {
            device.fail_reads = fail;
        }
    }

    pub fn fail_writes(&self, name: &str, fail: bool) {
        if let Some(device) = self.inner.lock().by_name(name) {
            device.fail_writes = fail;
        }
    }

    /// Number of volume reads issued against the named device.
    pub fn read_count(&self, name: &str) -> usize {
        self.inner.lock().by_name(name).map_or(0, |d| d.reads)
    }

    /// Number of volume writes issued against the named device.
    pub fn write_count(&self, name: &str) -> usize {
        self.inner.lock().by_name(name).map_or(0, |d| d.writes)
    }

    /// Number of listing calls, successful or not.
    pub fn enumeration_count(&self) -> usize {
        self.inner.lock().enumerations
    }
}

impl DeviceDirectory for InMemoryAudio {
    type Handle = MemoryHandle;

    fn list_active_capture_devices(&self) -> Result<Vec<Device<MemoryHandle>>, AudioError> {
        let mut inner = self.inner.lock();
        inner.enumerations += 1;

        if inner.fail_enumeration {
            return Err(AudioError::EnumerationFailed(PlatformError::new(
                E_FAIL,
                "simulated enumeration failure",
            )));
        }

        Ok(inner
            .devices
            .iter()
            .map(|d| Device::new(d.name.clone(), MemoryHandle(d.id)))
            .collect())
    }
}

impl VolumeControl for InMemoryAudio {
    type Handle = MemoryHandle;

    fn get_volume(&self, device: &MemoryHandle) -> Result<f32, AudioError> {
        let mut inner = self.inner.lock();
        let device = inner.by_id(device)?;
        device.reads += 1;

        if device.fail_reads {
            return Err(AudioError::VolumeNotAvailable(PlatformError::new(
                E_FAIL,
                "simulated activation failure",
            )));
        }
        Ok(device.volume)
    }

    fn set_volume(&self, device: &MemoryHandle, level: f32) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        let device = inner.by_id(device)?;
        device.writes += 1;

        if device.fail_writes {
            return Err(AudioError::SetVolumeFailed(PlatformError::new(
                E_FAIL,
                "simulated write failure",
            )));
        }
        if !(0.0..=1.0).contains(&level) {
            return Err(AudioError::SetVolumeFailed(PlatformError::new(
                E_INVALIDARG,
                "volume out of range",
            )));
        }

        device.volume = level;
        Ok(())
    }
}
