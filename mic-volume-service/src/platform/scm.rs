//! Service Control Manager registration.
//!
//! Installs, removes, starts and stops the service. Every SCM handle is
//! wrapped in [`ScHandle`] and closed when it goes out of scope.

use super::{ServiceError, SERVICE_DESCRIPTION, SERVICE_DISPLAY_NAME, SERVICE_NAME};
use crate::config::{service_command_line, RunOptions};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{ERROR_SERVICE_DOES_NOT_EXIST, ERROR_SERVICE_EXISTS};
use windows::Win32::System::Services::{
    ChangeServiceConfig2W, CloseServiceHandle, ControlService, CreateServiceW, DeleteService,
    OpenSCManagerW, OpenServiceW, StartServiceW, SC_HANDLE, SC_MANAGER_ALL_ACCESS,
    SERVICE_ALL_ACCESS, SERVICE_AUTO_START, SERVICE_CONFIG_DESCRIPTION, SERVICE_CONTROL_STOP,
    SERVICE_DESCRIPTIONW, SERVICE_ERROR_NORMAL, SERVICE_START, SERVICE_STATUS, SERVICE_STOP,
    SERVICE_WIN32_OWN_PROCESS,
};

/// SCM handle closed on drop.
pub struct ScHandle(SC_HANDLE);

impl Drop for ScHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseServiceHandle(self.0);
        }
    }
}

/// Connection to the local Service Control Manager.
pub struct ServiceManager {
    manager: ScHandle,
    service_name: Vec<u16>,
}

impl ServiceManager {
    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Open the SCM with full access (requires elevation).
    pub fn connect() -> Result<Self, ServiceError> {
        let manager = unsafe {
            OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_ALL_ACCESS).map_err(|e| {
                ServiceError::Scm {
                    action: "open the Service Control Manager",
                    error: e.into(),
                }
            })?
        };

        Ok(Self {
            manager: ScHandle(manager),
            service_name: Self::to_wide(SERVICE_NAME),
        })
    }

    fn open_service(&self, access: u32, action: &'static str) -> Result<ScHandle, ServiceError> {
        unsafe {
            OpenServiceW(
                self.manager.0,
                PCWSTR::from_raw(self.service_name.as_ptr()),
                access,
            )
            .map(ScHandle)
            .map_err(|e| {
                if e.code() == ERROR_SERVICE_DOES_NOT_EXIST.to_hresult() {
                    ServiceError::NotInstalled
                } else {
                    ServiceError::Scm {
                        action,
                        error: e.into(),
                    }
                }
            })
        }
    }

    /// Register the service to start automatically with the given options.
    pub fn install(&self, options: &RunOptions) -> Result<(), ServiceError> {
        let exe = std::env::current_exe().map_err(|e| ServiceError::Scm {
            action: "locate the executable",
            error: crate::audio::PlatformError::new(e.raw_os_error().unwrap_or(-1), e.to_string()),
        })?;

        let command_line = Self::to_wide(&service_command_line(&exe, options));
        let display_name = Self::to_wide(SERVICE_DISPLAY_NAME);

        let service = unsafe {
            CreateServiceW(
                self.manager.0,
                PCWSTR::from_raw(self.service_name.as_ptr()),
                PCWSTR::from_raw(display_name.as_ptr()),
                SERVICE_ALL_ACCESS,
                SERVICE_WIN32_OWN_PROCESS,
                SERVICE_AUTO_START,
                SERVICE_ERROR_NORMAL,
                PCWSTR::from_raw(command_line.as_ptr()),
                PCWSTR::null(),
                None,
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
            )
            .map(ScHandle)
            .map_err(|e| {
                if e.code() == ERROR_SERVICE_EXISTS.to_hresult() {
                    ServiceError::AlreadyInstalled
                } else {
                    ServiceError::Scm {
                        action: "create the service",
                        error: e.into(),
                    }
                }
            })?
        };

        let mut description = Self::to_wide(SERVICE_DESCRIPTION);
        let info = SERVICE_DESCRIPTIONW {
            lpDescription: PWSTR(description.as_mut_ptr()),
        };

        unsafe {
            // The description is cosmetic; the service is usable without it.
            if let Err(e) = ChangeServiceConfig2W(
                service.0,
                SERVICE_CONFIG_DESCRIPTION,
                Some(&info as *const SERVICE_DESCRIPTIONW as *const std::ffi::c_void),
            ) {
                tracing::warn!("failed to set service description: {e}");
            }
        }

        Ok(())
    }

    /// Delete the service registration.
    pub fn uninstall(&self) -> Result<(), ServiceError> {
        let service = self.open_service(SERVICE_ALL_ACCESS, "open the service")?;

        unsafe {
            DeleteService(service.0).map_err(|e| ServiceError::Scm {
                action: "delete the service",
                error: e.into(),
            })
        }
    }

    /// Ask the SCM to start the service.
    pub fn start(&self) -> Result<(), ServiceError> {
        let service = self.open_service(SERVICE_START, "open the service")?;

        unsafe {
            StartServiceW(service.0, None).map_err(|e| ServiceError::Scm {
                action: "start the service",
                error: e.into(),
            })
        }
    }

    /// Send a stop control to the service.
    pub fn stop(&self) -> Result<(), ServiceError> {
        let service = self.open_service(SERVICE_STOP, "open the service")?;
        let mut status = SERVICE_STATUS::default();

        unsafe {
            ControlService(service.0, SERVICE_CONTROL_STOP, &mut status).map_err(|e| {
                ServiceError::Scm {
                    action: "stop the service",
                    error: e.into(),
                }
            })
        }
    }
}
