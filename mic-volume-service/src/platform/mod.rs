//! Platform-specific module for Windows service plumbing.
//!
//! This module contains the Service Control Manager integration, the event
//! log writer, and the service error type shared with the scheduler.

#[cfg(windows)]
pub mod eventlog;
#[cfg(windows)]
pub mod scm;
#[cfg(windows)]
pub mod service;

use crate::audio::{AudioError, PlatformError};
use thiserror::Error;

/// Internal service name registered with the SCM.
pub const SERVICE_NAME: &str = "MicrophoneVolumeService";

/// Name shown in the Services console.
pub const SERVICE_DISPLAY_NAME: &str = "Microphone Volume Control Service";

/// Description shown in the Services console.
pub const SERVICE_DESCRIPTION: &str = "Automatically sets microphone volume to 100%";

/// Service lifecycle error types.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to connect to the service control dispatcher: {0}")]
    Dispatcher(PlatformError),

    #[error("Failed to register the service control handler: {0}")]
    Registration(PlatformError),

    #[error("Failed to report service status: {0}")]
    Status(PlatformError),

    #[error("Service Control Manager error while trying to {action}: {error}")]
    Scm {
        action: &'static str,
        error: PlatformError,
    },

    #[error("Service already installed")]
    AlreadyInstalled,

    #[error("Service is not installed")]
    NotInstalled,

    #[error("Failed to spawn polling thread: {0}")]
    WorkerSpawn(std::io::Error),

    #[error("Failed to initialize audio backend: {0}")]
    BackendInit(AudioError),

    #[error("Polling thread panicked")]
    WorkerPanicked,
}

impl ServiceError {
    /// Win32 exit code reported to the SCM when startup fails.
    pub fn exit_code(&self) -> u32 {
        match self {
            ServiceError::Dispatcher(e)
            | ServiceError::Registration(e)
            | ServiceError::Status(e)
            | ServiceError::Scm { error: e, .. } => hresult_to_win32(e.code),
            ServiceError::BackendInit(e) => e.code().map_or(1, hresult_to_win32),
            // ERROR_SERVICE_EXISTS / ERROR_SERVICE_DOES_NOT_EXIST
            ServiceError::AlreadyInstalled => 1073,
            ServiceError::NotInstalled => 1060,
            ServiceError::WorkerSpawn(_) | ServiceError::WorkerPanicked => 1,
        }
    }
}

/// Recover the Win32 error from an HRESULT_FROM_WIN32 value.
fn hresult_to_win32(code: i32) -> u32 {
    let code = code as u32;
    if code & 0xFFFF_0000 == 0x8007_0000 {
        code & 0xFFFF
    } else {
        code
    }
}
