//! Windows service runtime.
//!
//! Connects to the service control dispatcher, reports status to the SCM,
//! and turns stop/shutdown controls (or Ctrl+C in foreground mode) into a
//! [`StopSignal`]. The OS callbacks only raise the signal; all other work
//! happens on the service thread.

use super::{ServiceError, SERVICE_NAME};
use crate::app;
use crate::config::ServiceConfig;
use crate::logging::TracingSink;
use crate::scheduler::StopSignal;
use std::ffi::c_void;
use std::sync::{Arc, OnceLock};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{BOOL, ERROR_CALL_NOT_IMPLEMENTED, FALSE, NO_ERROR, TRUE};
use windows::Win32::System::Console::{
    SetConsoleCtrlHandler, CTRL_BREAK_EVENT, CTRL_CLOSE_EVENT, CTRL_C_EVENT,
};
use windows::Win32::System::Services::{
    RegisterServiceCtrlHandlerExW, SetServiceStatus, StartServiceCtrlDispatcherW,
    SERVICE_ACCEPT_SHUTDOWN, SERVICE_ACCEPT_STOP, SERVICE_CONTROL_INTERROGATE,
    SERVICE_CONTROL_SHUTDOWN, SERVICE_CONTROL_STOP, SERVICE_RUNNING, SERVICE_START_PENDING,
    SERVICE_STATUS, SERVICE_STATUS_CURRENT_STATE, SERVICE_STATUS_HANDLE, SERVICE_STOPPED,
    SERVICE_STOP_PENDING, SERVICE_TABLE_ENTRYW, SERVICE_WIN32_OWN_PROCESS,
};

/// Configuration handed to `service_main`, which receives no user context.
static SERVICE_CONFIG: OnceLock<ServiceConfig> = OnceLock::new();

/// Signal raised by the console control handler.
static CONSOLE_SIGNAL: OnceLock<Arc<StopSignal>> = OnceLock::new();

const PENDING_WAIT_HINT_MS: u32 = 5000;

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Hand the process over to the service control dispatcher.
///
/// Returns after the service has stopped.
pub fn run_dispatcher(config: ServiceConfig) -> Result<(), ServiceError> {
    let _ = SERVICE_CONFIG.set(config);

    let mut name = to_wide(SERVICE_NAME);
    let table = [
        SERVICE_TABLE_ENTRYW {
            lpServiceName: PWSTR(name.as_mut_ptr()),
            lpServiceProc: Some(service_main),
        },
        SERVICE_TABLE_ENTRYW::default(),
    ];

    unsafe {
        StartServiceCtrlDispatcherW(table.as_ptr()).map_err(|e| ServiceError::Dispatcher(e.into()))
    }
}

unsafe extern "system" fn service_main(_argc: u32, _argv: *mut PWSTR) {
    let config = SERVICE_CONFIG.get().cloned().unwrap_or_default();

    if let Err(e) = run_service(config) {
        tracing::error!("{e}");
    }
}

fn run_service(config: ServiceConfig) -> Result<(), ServiceError> {
    // Lives until SERVICE_STOPPED is reported; the control handler borrows it.
    let signal = Arc::new(StopSignal::new());
    let status = StatusReporter::register(&signal)?;
    status.report(SERVICE_START_PENDING, NO_ERROR.0);

    let handle = match app::start_platform_polling(&config, Arc::clone(&signal)) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("{e}");
            status.report(SERVICE_STOPPED, e.exit_code());
            return Err(e);
        }
    };
    status.report(SERVICE_RUNNING, NO_ERROR.0);

    signal.wait();
    tracing::info!("Service stop signal received");
    status.report(SERVICE_STOP_PENDING, NO_ERROR.0);

    let result = app::finish_polling(handle, &TracingSink);
    let exit_code = result.as_ref().map_or_else(ServiceError::exit_code, |_| NO_ERROR.0);
    status.report(SERVICE_STOPPED, exit_code);

    result
}

unsafe extern "system" fn control_handler(
    control: u32,
    _event_type: u32,
    _event_data: *mut c_void,
    context: *mut c_void,
) -> u32 {
    match control {
        SERVICE_CONTROL_STOP | SERVICE_CONTROL_SHUTDOWN => {
            // SAFETY: context is the StopSignal registered in run_service,
            // which outlives every control delivered before SERVICE_STOPPED.
            let signal = &*(context as *const StopSignal);
            signal.request_stop();
            NO_ERROR.0
        }
        SERVICE_CONTROL_INTERROGATE => NO_ERROR.0,
        _ => ERROR_CALL_NOT_IMPLEMENTED.0,
    }
}

/// Reports state transitions to the SCM.
struct StatusReporter {
    handle: SERVICE_STATUS_HANDLE,
    checkpoint: std::cell::Cell<u32>,
}

impl StatusReporter {
    fn register(signal: &Arc<StopSignal>) -> Result<Self, ServiceError> {
        let name = to_wide(SERVICE_NAME);

        let handle = unsafe {
            RegisterServiceCtrlHandlerExW(
                PCWSTR::from_raw(name.as_ptr()),
                Some(control_handler),
                Some(Arc::as_ptr(signal) as *const c_void),
            )
            .map_err(|e| ServiceError::Registration(e.into()))?
        };

        Ok(Self {
            handle,
            checkpoint: std::cell::Cell::new(0),
        })
    }

    /// Report `state`. Failures are logged and otherwise ignored.
    fn report(&self, state: SERVICE_STATUS_CURRENT_STATE, exit_code: u32) {
        let pending = state == SERVICE_START_PENDING || state == SERVICE_STOP_PENDING;
        let checkpoint = if pending {
            self.checkpoint.set(self.checkpoint.get() + 1);
            self.checkpoint.get()
        } else {
            0
        };

        let status = SERVICE_STATUS {
            dwServiceType: SERVICE_WIN32_OWN_PROCESS,
            dwCurrentState: state,
            dwControlsAccepted: if state == SERVICE_RUNNING {
                SERVICE_ACCEPT_STOP | SERVICE_ACCEPT_SHUTDOWN
            } else {
                0
            },
            dwWin32ExitCode: exit_code,
            dwServiceSpecificExitCode: 0,
            dwCheckPoint: checkpoint,
            dwWaitHint: if pending { PENDING_WAIT_HINT_MS } else { 0 },
        };

        unsafe {
            if let Err(e) = SetServiceStatus(self.handle, &status) {
                tracing::error!("{}", ServiceError::Status(e.into()));
            }
        }
    }
}

/// Route Ctrl+C, Ctrl+Break and console close to `signal`.
pub fn install_console_handler(signal: Arc<StopSignal>) -> Result<(), ServiceError> {
    let _ = CONSOLE_SIGNAL.set(signal);

    unsafe {
        SetConsoleCtrlHandler(Some(console_handler), true)
            .map_err(|e| ServiceError::Registration(e.into()))
    }
}

unsafe extern "system" fn console_handler(ctrl_type: u32) -> BOOL {
    match ctrl_type {
        CTRL_C_EVENT | CTRL_BREAK_EVENT | CTRL_CLOSE_EVENT => {
            if let Some(signal) = CONSOLE_SIGNAL.get() {
                signal.request_stop();
            }
            TRUE
        }
        _ => FALSE,
    }
}
