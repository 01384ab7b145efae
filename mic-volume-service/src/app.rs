//! Process lifecycle.
//!
//! Dispatches the parsed command line and owns the polling run that both the
//! foreground mode and the Windows service go through.

use crate::audio::{AudioError, DeviceDirectory, VolumeControl};
use crate::config::{Cli, Command, ServiceConfig};
use crate::logging::{self, LogDestination, LogSink};
use crate::platform::ServiceError;
use crate::scheduler::{PollingScheduler, SchedulerHandle, StopSignal};
use std::sync::Arc;

/// Run the selected command to completion.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Test(options) => {
            let config = options.into_config(LogDestination::Console);
            logging::init(&config.log);
            run_foreground(config)
        }
        Command::Service(options) => {
            let config = options.into_config(ServiceConfig::service_default().log);
            logging::init(&config.log);
            run_service(config)
        }
        command => manage(command),
    }
}

/// Start the scheduler on `signal` and log the startup line.
pub fn start_polling<D, V, F>(
    config: &ServiceConfig,
    signal: Arc<StopSignal>,
    init: F,
    sink: Arc<dyn LogSink>,
) -> Result<SchedulerHandle, ServiceError>
where
    F: FnOnce() -> Result<(D, V), AudioError> + Send + 'static,
    D: DeviceDirectory + 'static,
    V: VolumeControl<Handle = D::Handle> + 'static,
{
    let handle =
        PollingScheduler::from_config(config).start_with_signal(signal, init, Arc::clone(&sink))?;

    sink.info(&format!(
        "Service started. Interval: {} sec. Filter: {}",
        config.interval.as_secs(),
        config.filter_description()
    ));

    Ok(handle)
}

/// Stop the scheduler, wait for its pass to finish and log the shutdown line.
pub fn finish_polling(handle: SchedulerHandle, sink: &dyn LogSink) -> Result<(), ServiceError> {
    handle.request_stop();
    let result = handle.join();
    sink.info("Service stopped");
    result
}

/// Poll until `signal` is raised, then shut down cleanly.
pub fn run_until_stopped<D, V, F>(
    config: &ServiceConfig,
    signal: Arc<StopSignal>,
    init: F,
    sink: Arc<dyn LogSink>,
) -> Result<(), ServiceError>
where
    F: FnOnce() -> Result<(D, V), AudioError> + Send + 'static,
    D: DeviceDirectory + 'static,
    V: VolumeControl<Handle = D::Handle> + 'static,
{
    let handle = start_polling(config, Arc::clone(&signal), init, Arc::clone(&sink))?;
    signal.wait();
    finish_polling(handle, sink.as_ref())
}

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use crate::audio::{EndpointVolumeControl, WasapiDirectory};
    use crate::logging::TracingSink;
    use crate::platform::scm::ServiceManager;
    use crate::platform::service;
    use anyhow::Context;

    fn wasapi_backend() -> Result<(WasapiDirectory, EndpointVolumeControl), AudioError> {
        Ok((WasapiDirectory::new()?, EndpointVolumeControl))
    }

    /// Start polling the real audio endpoints.
    pub fn start_platform_polling(
        config: &ServiceConfig,
        signal: Arc<StopSignal>,
    ) -> Result<SchedulerHandle, ServiceError> {
        start_polling(config, signal, wasapi_backend, Arc::new(TracingSink))
    }

    pub(super) fn run_foreground(config: ServiceConfig) -> anyhow::Result<()> {
        let signal = Arc::new(StopSignal::new());
        service::install_console_handler(Arc::clone(&signal))
            .context("cannot install the Ctrl+C handler")?;

        println!("Running in foreground. Press Ctrl+C to stop.");
        run_until_stopped(&config, signal, wasapi_backend, Arc::new(TracingSink))
            .context("foreground run failed")
    }

    pub(super) fn run_service(config: ServiceConfig) -> anyhow::Result<()> {
        service::run_dispatcher(config)
            .context("the service subcommand is meant to be started by the Service Control Manager")
    }

    pub(super) fn manage(command: Command) -> anyhow::Result<()> {
        logging::init(&LogDestination::Console);
        let scm = ServiceManager::connect().context("administrator rights are required")?;

        let done = match command {
            Command::Install(options) => {
                scm.install(&options)?;
                "Service successfully installed"
            }
            Command::Uninstall => {
                scm.uninstall()?;
                "Service successfully uninstalled"
            }
            Command::Start => {
                scm.start()?;
                "Service started"
            }
            Command::Stop => {
                scm.stop()?;
                "Stop signal sent to service"
            }
            other => anyhow::bail!("not a service management command: {other:?}"),
        };

        println!("{done}");
        Ok(())
    }
}

#[cfg(windows)]
pub use windows_impl::start_platform_polling;
#[cfg(windows)]
use windows_impl::{manage, run_foreground, run_service};

#[cfg(not(windows))]
fn run_foreground(_config: ServiceConfig) -> anyhow::Result<()> {
    anyhow::bail!("foreground mode needs the Windows audio stack")
}

#[cfg(not(windows))]
fn run_service(_config: ServiceConfig) -> anyhow::Result<()> {
    anyhow::bail!("service mode is only available on Windows")
}

#[cfg(not(windows))]
fn manage(command: Command) -> anyhow::Result<()> {
    anyhow::bail!("{command:?} needs the Windows Service Control Manager")
}
