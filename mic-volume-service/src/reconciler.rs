//! Volume reconciliation.
//!
//! One pass over a device snapshot: read each matching device's volume,
//! compare it with what was last seen for that name, log meaningful
//! changes, and push the device back to 100% when it drifted.
//!
//! The pass is idempotent. A device already at the target costs one read
//! and produces no output, so steady-state ticks are quiet.

use crate::audio::{volume_percent, Device, DeviceDirectory, VolumeControl};
use crate::logging::LogSink;
use std::collections::HashMap;

/// Volume every matching device is driven to.
pub const TARGET_VOLUME: f32 = 1.0;

/// Smallest delta treated as a real change; absorbs driver rounding.
pub const VOLUME_TOLERANCE: f32 = 0.01;

/// Last observed or written volume per device name.
///
/// Entries are never evicted: a device that disappears keeps its entry, so
/// the table grows with the number of distinct names ever seen.
#[derive(Debug, Default, Clone)]
pub struct VolumeState {
    volumes: HashMap<String, f32>,
}

impl VolumeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.volumes.get(name).copied()
    }

    pub fn record(&mut self, name: &str, volume: f32) {
        match self.volumes.get_mut(name) {
            Some(entry) => *entry = volume,
            None => {
                self.volumes.insert(name.to_string(), volume);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

/// True if `a` and `b` differ by more than [`VOLUME_TOLERANCE`].
pub fn differs(a: f32, b: f32) -> bool {
    (a - b).abs() > VOLUME_TOLERANCE
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Devices returned by the directory
    pub enumerated: usize,

    /// Devices that passed the name filter
    pub processed: usize,

    /// Devices successfully set back to the target
    pub corrected: usize,

    /// Devices whose read or write failed
    pub failed: usize,

    /// The directory could not be listed; nothing was processed
    pub enumeration_failed: bool,
}

/// What happened to a single device during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceOutcome {
    Unchanged,
    Corrected,
    Failed,
}

/// Applies the correction policy and owns the per-device history.
///
/// Only the polling thread touches it, so no locking is involved.
#[derive(Debug, Default)]
pub struct VolumeReconciler {
    filter: String,
    state: VolumeState,
    last_device_count: Option<usize>,
}

impl VolumeReconciler {
    /// Create a reconciler; an empty filter matches every device.
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            state: VolumeState::new(),
            last_device_count: None,
        }
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn state(&self) -> &VolumeState {
        &self.state
    }

    /// Enumerate devices and reconcile the snapshot.
    ///
    /// An enumeration failure is logged and the tick is skipped.
    pub fn run_tick<D, V>(&mut self, directory: &D, volume: &V, sink: &dyn LogSink) -> TickReport
    where
        D: DeviceDirectory,
        V: VolumeControl<Handle = D::Handle>,
    {
        let devices = match directory.list_active_capture_devices() {
            Ok(devices) => devices,
            Err(e) => {
                sink.error(&format!("Audio devices enumeration error: {e}"));
                return TickReport {
                    enumeration_failed: true,
                    ..TickReport::default()
                };
            }
        };

        if self.last_device_count != Some(devices.len()) {
            sink.info(&format!("Active microphones found: {}", devices.len()));
            self.last_device_count = Some(devices.len());
        }

        self.reconcile(&devices, volume, sink)
    }

    /// Reconcile one device snapshot.
    pub fn reconcile<V: VolumeControl>(
        &mut self,
        devices: &[Device<V::Handle>],
        volume: &V,
        sink: &dyn LogSink,
    ) -> TickReport {
        let mut report = TickReport {
            enumerated: devices.len(),
            ..TickReport::default()
        };

        for device in devices {
            if !device.matches(&self.filter) {
                continue;
            }
            report.processed += 1;
            match self.reconcile_device(device, volume, sink) {
                DeviceOutcome::Corrected => report.corrected += 1,
                DeviceOutcome::Failed => report.failed += 1,
                DeviceOutcome::Unchanged => {}
            }
        }

        report
    }

    fn reconcile_device<V: VolumeControl>(
        &mut self,
        device: &Device<V::Handle>,
        volume: &V,
        sink: &dyn LogSink,
    ) -> DeviceOutcome {
        let name = device.name.as_str();

        let current = match volume.get_volume(&device.handle) {
            Ok(level) => level,
            Err(e) => {
                sink.warning(&format!("Cannot read volume for {name}: {e}"));
                return DeviceOutcome::Failed;
            }
        };

        let changed = match self.state.get(name) {
            None => {
                sink.info(&format!(
                    "New microphone detected: {name}, volume {current:.2} ({}%)",
                    volume_percent(current)
                ));
                self.state.record(name, current);
                false
            }
            Some(previous) if differs(current, previous) => {
                sink.info(&format!(
                    "Volume changed for {name}: {}% -> {}%",
                    volume_percent(previous),
                    volume_percent(current)
                ));
                self.state.record(name, current);
                true
            }
            Some(_) => false,
        };

        if differs(current, TARGET_VOLUME) {
            self.correct(device, volume, sink)
        } else {
            if changed {
                sink.info(&format!("{name} is already at 100%"));
            }
            DeviceOutcome::Unchanged
        }
    }

    fn correct<V: VolumeControl>(
        &mut self,
        device: &Device<V::Handle>,
        volume: &V,
        sink: &dyn LogSink,
    ) -> DeviceOutcome {
        let name = device.name.as_str();

        match volume.set_volume(&device.handle, TARGET_VOLUME) {
            Ok(()) => {
                sink.info(&format!("Volume for {name} corrected to 100%"));
                self.state.record(name, TARGET_VOLUME);
                DeviceOutcome::Corrected
            }
            Err(e) => {
                sink.error(&format!("Volume setting error for {name}: {e}"));
                DeviceOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::InMemoryAudio;
    use crate::logging::{MemorySink, Severity};
    use approx::assert_relative_eq;

    fn tick(reconciler: &mut VolumeReconciler, audio: &InMemoryAudio, sink: &MemorySink) -> TickReport {
        reconciler.run_tick(audio, audio, sink)
    }

    #[test]
    fn test_device_at_target_is_not_written() {
        let audio = InMemoryAudio::new().with_device("Mic-A", 1.0);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("");

        tick(&mut reconciler, &audio, &sink);
        tick(&mut reconciler, &audio, &sink);

        assert_eq!(audio.write_count("Mic-A"), 0);
        assert_eq!(sink.count_containing("corrected"), 0);
        assert_eq!(sink.count_containing("already at 100%"), 0);
    }

    #[test]
    fn test_low_volume_converges_in_one_pass() {
        let audio = InMemoryAudio::new().with_device("Mic-A", 0.3);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("");

        let report = tick(&mut reconciler, &audio, &sink);

        assert_relative_eq!(audio.volume_of("Mic-A").unwrap(), 1.0);
        assert_eq!(sink.count_containing("Mic-A corrected to 100%"), 1);
        assert_eq!(report.corrected, 1);
        assert_relative_eq!(reconciler.state().get("Mic-A").unwrap(), 1.0);
    }

    #[test]
    fn test_first_sighting_is_always_logged() {
        for level in [0.0, 0.3, 1.0] {
            let audio = InMemoryAudio::new().with_device("Mic-A", level);
            let sink = MemorySink::new();
            let mut reconciler = VolumeReconciler::new("");

            tick(&mut reconciler, &audio, &sink);

            assert_eq!(sink.count_containing("New microphone detected: Mic-A"), 1);
        }
    }

    #[test]
    fn test_change_within_tolerance_is_not_logged() {
        let audio = InMemoryAudio::new().with_device("Mic-A", 1.0);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("");
        tick(&mut reconciler, &audio, &sink);

        // 1.0 -> 0.99 is exactly one percent: no change, no correction
        audio.set_external_volume("Mic-A", 0.99);
        sink.clear();
        tick(&mut reconciler, &audio, &sink);

        assert!(sink.is_empty());
        assert_eq!(audio.write_count("Mic-A"), 0);
    }

    #[test]
    fn test_tolerance_boundary() {
        assert!(!differs(0.51, 0.5));
        assert!(differs(0.5101, 0.5));
        assert!(!differs(0.49, 0.5));
        assert!(differs(0.4899, 0.5));

        let mut reconciler = VolumeReconciler::new("");
        reconciler.state.record("Mic-A", 0.5);
        let audio = InMemoryAudio::new().with_device("Mic-A", 0.51);
        audio.fail_writes("Mic-A", true);
        let sink = MemorySink::new();
        let devices = audio.list_active_capture_devices().unwrap();
        reconciler.reconcile(&devices[..], &audio, &sink);
        assert_eq!(sink.count_containing("Volume changed"), 0);

        audio.set_external_volume("Mic-A", 0.5101);
        reconciler.state.record("Mic-A", 0.5);
        sink.clear();
        reconciler.reconcile(&devices[..], &audio, &sink);
        assert_eq!(sink.count_containing("Volume changed for Mic-A: 50% -> 51%"), 1);
    }

    #[test]
    fn test_external_change_to_target_logs_already_at_target() {
        let audio = InMemoryAudio::new().with_device("Mic-A", 0.5);
        audio.fail_writes("Mic-A", true);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("");
        tick(&mut reconciler, &audio, &sink);

        audio.fail_writes("Mic-A", false);
        audio.set_external_volume("Mic-A", 1.0);
        sink.clear();
        tick(&mut reconciler, &audio, &sink);

        assert_eq!(
            sink.messages(),
            vec![
                "Volume changed for Mic-A: 50% -> 100%".to_string(),
                "Mic-A is already at 100%".to_string(),
            ]
        );
        assert_eq!(audio.write_count("Mic-A"), 1);
    }

    #[test]
    fn test_external_lowering_is_corrected_next_tick() {
        let audio = InMemoryAudio::new().with_device("Mic-A", 1.0);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("");
        tick(&mut reconciler, &audio, &sink);

        audio.set_external_volume("Mic-A", 0.2);
        sink.clear();
        tick(&mut reconciler, &audio, &sink);

        assert_eq!(
            sink.messages(),
            vec![
                "Volume changed for Mic-A: 100% -> 20%".to_string(),
                "Volume for Mic-A corrected to 100%".to_string(),
            ]
        );
        assert_relative_eq!(audio.volume_of("Mic-A").unwrap(), 1.0);
    }

    #[test]
    fn test_filter_excludes_devices_entirely() {
        let audio = InMemoryAudio::new()
            .with_device("USB Microphone", 0.2)
            .with_device("Realtek Line In", 0.2)
            .with_device("usb headset", 0.2);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("USB");

        let report = tick(&mut reconciler, &audio, &sink);

        assert_eq!(report.enumerated, 3);
        assert_eq!(report.processed, 1);
        assert_relative_eq!(audio.volume_of("USB Microphone").unwrap(), 1.0);
        for excluded in ["Realtek Line In", "usb headset"] {
            assert_eq!(audio.read_count(excluded), 0);
            assert_eq!(audio.write_count(excluded), 0);
            assert!(!sink.contains(excluded));
            assert!(reconciler.state().get(excluded).is_none());
        }
    }

    #[test]
    fn test_read_failure_skips_only_that_device() {
        let audio = InMemoryAudio::new()
            .with_device("Broken", 0.2)
            .with_device("Working", 0.2);
        audio.fail_reads("Broken", true);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("");

        let report = tick(&mut reconciler, &audio, &sink);

        assert_eq!(report.failed, 1);
        assert_eq!(report.corrected, 1);
        assert_eq!(audio.write_count("Broken"), 0);
        assert!(reconciler.state().get("Broken").is_none());
        assert_relative_eq!(audio.volume_of("Working").unwrap(), 1.0);
        assert!(sink
            .lines()
            .iter()
            .any(|(s, m)| *s == Severity::Warning && m.starts_with("Cannot read volume for Broken")));
    }

    #[test]
    fn test_write_failure_is_logged_and_retried() {
        let audio = InMemoryAudio::new().with_device("Mic-A", 0.4);
        audio.fail_writes("Mic-A", true);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("");

        let report = tick(&mut reconciler, &audio, &sink);
        assert_eq!(report.failed, 1);
        assert!(sink.lines().iter().any(|(s, m)| *s == Severity::Error
            && m.contains("Volume setting error for Mic-A")
            && m.contains("0x80004005")));
        assert_relative_eq!(reconciler.state().get("Mic-A").unwrap(), 0.4);

        audio.fail_writes("Mic-A", false);
        tick(&mut reconciler, &audio, &sink);
        assert_eq!(audio.write_count("Mic-A"), 2);
        assert_relative_eq!(audio.volume_of("Mic-A").unwrap(), 1.0);
    }

    #[test]
    fn test_enumeration_failure_skips_tick() {
        let audio = InMemoryAudio::new().with_device("Mic-A", 0.4);
        audio.fail_enumeration(true);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("");

        let report = tick(&mut reconciler, &audio, &sink);

        assert!(report.enumeration_failed);
        assert_eq!(audio.read_count("Mic-A"), 0);
        assert_eq!(sink.lines().len(), 1);
        assert_eq!(sink.lines()[0].0, Severity::Error);
    }

    #[test]
    fn test_device_count_logged_only_on_change() {
        let audio = InMemoryAudio::new().with_device("Mic-A", 1.0);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("");

        tick(&mut reconciler, &audio, &sink);
        tick(&mut reconciler, &audio, &sink);
        assert_eq!(sink.count_containing("Active microphones found: 1"), 1);

        audio.add_device("Mic-B", 1.0);
        tick(&mut reconciler, &audio, &sink);
        tick(&mut reconciler, &audio, &sink);
        assert_eq!(sink.count_containing("Active microphones found: 2"), 1);
    }

    #[test]
    fn test_unplugged_device_keeps_its_entry() {
        let audio = InMemoryAudio::new()
            .with_device("Mic-A", 1.0)
            .with_device("USB Mic", 1.0);
        let sink = MemorySink::new();
        let mut reconciler = VolumeReconciler::new("");
        tick(&mut reconciler, &audio, &sink);

        audio.remove_device("USB Mic");
        tick(&mut reconciler, &audio, &sink);

        assert_eq!(reconciler.state().len(), 2);
        assert!(reconciler.state().get("USB Mic").is_some());
    }
}
