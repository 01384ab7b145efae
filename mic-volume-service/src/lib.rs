//! Microphone Volume Service - Library
//!
//! A background service that keeps microphone capture volume at 100%,
//! undoing applications that silently lower it.
//!
//! ## Features
//!
//! - Polls active capture devices on a fixed interval
//! - Restores any drifted device to 100% within one interval
//! - Optional case-sensitive device name filter
//! - Quiet at steady state: only changes and corrections are logged
//! - Runs as a Windows service or in the foreground
//! - Logs to a file, the Windows event log, or stderr

pub mod app;
pub mod audio;
pub mod config;
pub mod logging;
pub mod platform;
pub mod reconciler;
pub mod scheduler;

pub use audio::{AudioError, Device, DeviceDirectory, InMemoryAudio, VolumeControl};
pub use config::{Cli, Command, RunOptions, ServiceConfig};
pub use logging::{LogDestination, LogSink, MemorySink, Severity, TracingSink};
pub use platform::ServiceError;
pub use reconciler::{TickReport, VolumeReconciler, VolumeState};
pub use scheduler::{PollingScheduler, SchedulerHandle, SchedulerState, StopSignal};
