//! Periodic polling on a dedicated thread.
//!
//! ```text
//! Stopped → Running → StopRequested → Stopped
//! ```
//!
//! The worker waits on a [`StopSignal`] with the poll interval as timeout.
//! A timeout runs one reconciliation pass; a signal ends the loop. A stop
//! request interrupts the wait but never a pass in progress.

use crate::audio::{AudioError, DeviceDirectory, VolumeControl};
use crate::config::{ServiceConfig, DEFAULT_INTERVAL_SECS, MAX_INTERVAL_SECS};
use crate::logging::LogSink;
use crate::platform::ServiceError;
use crate::reconciler::VolumeReconciler;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

/// Manual-reset stop flag with a cancellable timed wait.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter. Never blocks beyond the lock.
    pub fn request_stop(&self) {
        *self.stopped.lock() = true;
        self.condvar.notify_all();
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stopped.lock()
    }

    /// Block until a stop is requested.
    pub fn wait(&self) {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            self.condvar.wait(&mut stopped);
        }
    }

    /// Wait up to `timeout`; returns true if a stop was requested.
    ///
    /// A timeout too large to form a deadline waits for the stop alone.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.condvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Lifecycle state of the polling worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Stopped = 0,
    Running = 1,
    StopRequested = 2,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Running,
            2 => SchedulerState::StopRequested,
            _ => SchedulerState::Stopped,
        }
    }
}

struct Shared {
    signal: Arc<StopSignal>,
    state: AtomicU8,
    passes: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Marks the worker stopped however its closure exits. A panicking worker
/// also raises the stop signal so the owner waiting on it wakes up.
struct StoppedOnExit(Arc<Shared>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.set_state(SchedulerState::Stopped);
        if thread::panicking() {
            self.0.signal.request_stop();
        }
    }
}

/// Runs reconciliation passes on a fixed interval.
#[derive(Debug, Clone)]
pub struct PollingScheduler {
    interval: Duration,
    filter: String,
}

impl PollingScheduler {
    /// Takes the interval as given, so tests can poll below one second.
    /// The one-second minimum applies to command line input
    /// ([`crate::config::coerce_interval`]). A zero interval falls back to the
    /// 2 second default and anything above [`MAX_INTERVAL_SECS`] is capped.
    pub fn new(interval: Duration, filter: impl Into<String>) -> Self {
        let interval = if interval.is_zero() {
            Duration::from_secs(DEFAULT_INTERVAL_SECS)
        } else {
            interval.min(Duration::from_secs(MAX_INTERVAL_SECS))
        };

        Self {
            interval,
            filter: filter.into(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.interval, config.filter.clone())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start polling with a fresh stop signal.
    pub fn start<D, V, F>(self, init: F, sink: Arc<dyn LogSink>) -> Result<SchedulerHandle, ServiceError>
    where
        F: FnOnce() -> Result<(D, V), AudioError> + Send + 'static,
        D: DeviceDirectory + 'static,
        V: VolumeControl<Handle = D::Handle> + 'static,
    {
        self.start_with_signal(Arc::new(StopSignal::new()), init, sink)
    }

    /// Start polling on the worker thread.
    ///
    /// `init` runs on the worker and builds the audio backend there, so any
    /// per-thread platform setup (COM) belongs to the thread that uses it.
    /// Returns once the backend is ready, or with
    /// [`ServiceError::BackendInit`] after the worker has exited.
    pub fn start_with_signal<D, V, F>(
        self,
        signal: Arc<StopSignal>,
        init: F,
        sink: Arc<dyn LogSink>,
    ) -> Result<SchedulerHandle, ServiceError>
    where
        F: FnOnce() -> Result<(D, V), AudioError> + Send + 'static,
        D: DeviceDirectory + 'static,
        V: VolumeControl<Handle = D::Handle> + 'static,
    {
        let shared = Arc::new(Shared {
            signal,
            state: AtomicU8::new(SchedulerState::Running as u8),
            passes: AtomicU64::new(0),
        });

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), AudioError>>(1);
        let worker = Arc::clone(&shared);
        let Self { interval, filter } = self;

        let thread = thread::Builder::new()
            .name("mic-volume-poller".into())
            .spawn(move || {
                let _exit = StoppedOnExit(Arc::clone(&worker));
                let (directory, volume) = match init() {
                    Ok(backend) => backend,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                tracing::debug!(?interval, %filter, "polling thread started");
                let mut reconciler = VolumeReconciler::new(filter);

                while !worker.signal.wait_timeout(interval) {
                    let report = reconciler.run_tick(&directory, &volume, sink.as_ref());
                    worker.passes.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(?report, "reconciliation pass finished");
                }

                tracing::debug!("polling thread exiting");
            })
            .map_err(|e| {
                shared.set_state(SchedulerState::Stopped);
                ServiceError::WorkerSpawn(e)
            })?;

        let mut handle = SchedulerHandle {
            shared,
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                let _ = handle.join_thread();
                Err(ServiceError::BackendInit(e))
            }
            // The worker died before reporting.
            Err(_) => {
                let _ = handle.join_thread();
                Err(ServiceError::WorkerPanicked)
            }
        }
    }
}

/// Owner's handle to a running scheduler.
///
/// Dropping the handle requests a stop and joins the worker.
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Interrupt the current wait; a pass in progress runs to completion.
    pub fn request_stop(&self) {
        let _ = self.shared.state.compare_exchange(
            SchedulerState::Running as u8,
            SchedulerState::StopRequested as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.shared.signal.request_stop();
    }

    pub fn state(&self) -> SchedulerState {
        let state = SchedulerState::from_u8(self.shared.state.load(Ordering::SeqCst));
        // A signal raised directly (e.g. by the OS control handler) counts too.
        if state == SchedulerState::Running && self.shared.signal.is_stop_requested() {
            SchedulerState::StopRequested
        } else {
            state
        }
    }

    /// Number of completed reconciliation passes.
    pub fn passes(&self) -> u64 {
        self.shared.passes.load(Ordering::SeqCst)
    }

    pub fn stop_signal(&self) -> Arc<StopSignal> {
        Arc::clone(&self.shared.signal)
    }

    /// Wait for the worker to exit. Does not request a stop by itself.
    pub fn join(mut self) -> Result<(), ServiceError> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<(), ServiceError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        let result = thread.join().map_err(|_| ServiceError::WorkerPanicked);
        self.shared.set_state(SchedulerState::Stopped);
        result
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.request_stop();
            let _ = self.join_thread();
        }
    }
}
