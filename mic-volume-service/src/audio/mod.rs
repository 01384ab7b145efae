//! Audio module for Windows Core Audio API interactions.
//!
//! This module provides capture device enumeration and volume control,
//! plus an in-memory backend with the same capabilities.

pub mod device;
#[cfg(windows)]
pub mod enumerator;
pub mod memory;
#[cfg(windows)]
pub mod volume;

pub use device::{
    volume_percent, AudioError, Device, DeviceDirectory, PlatformError, VolumeControl,
    UNKNOWN_DEVICE_NAME,
};
#[cfg(windows)]
pub use enumerator::{ComGuard, WasapiDirectory};
pub use memory::{InMemoryAudio, MemoryHandle};
#[cfg(windows)]
pub use volume::{EndpointVolume, EndpointVolumeControl};
