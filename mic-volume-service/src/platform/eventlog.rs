//! Windows event log output.
//!
//! A `tracing-subscriber` layer that reports each event to the Application
//! log under a registered event source.

use crate::audio::PlatformError;
use std::fmt::Write as _;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Foundation::{HANDLE, PSID};
use windows::Win32::System::EventLog::{
    DeregisterEventSource, RegisterEventSourceW, ReportEventW, EVENTLOG_ERROR_TYPE,
    EVENTLOG_INFORMATION_TYPE, EVENTLOG_WARNING_TYPE, REPORT_EVENT_TYPE,
};

/// Layer writing events to the Windows event log.
pub struct EventLogLayer {
    handle: HANDLE,
}

// SAFETY: the event source handle may be used from any thread; ReportEventW
// is thread-safe and the handle is only closed in Drop.
unsafe impl Send for EventLogLayer {}
unsafe impl Sync for EventLogLayer {}

impl EventLogLayer {
    /// Register `source` with the local event log.
    pub fn register(source: &str) -> Result<Self, PlatformError> {
        let source = HSTRING::from(source);
        let handle = unsafe { RegisterEventSourceW(PCWSTR::null(), &source)? };
        Ok(Self { handle })
    }

    fn event_type(level: &Level) -> REPORT_EVENT_TYPE {
        match *level {
            Level::ERROR => EVENTLOG_ERROR_TYPE,
            Level::WARN => EVENTLOG_WARNING_TYPE,
            _ => EVENTLOG_INFORMATION_TYPE,
        }
    }

    fn report(&self, event_type: REPORT_EVENT_TYPE, message: &str) {
        let wide: Vec<u16> = message.encode_utf16().chain(std::iter::once(0)).collect();
        let strings = [PCWSTR::from_raw(wide.as_ptr())];

        unsafe {
            // Event log failures are dropped.
            let _ = ReportEventW(
                self.handle,
                event_type,
                0,
                0,
                PSID::default(),
                strings.len() as u16,
                0,
                Some(strings.as_ptr()),
                None,
            );
        }
    }
}

impl Drop for EventLogLayer {
    fn drop(&mut self) {
        unsafe {
            let _ = DeregisterEventSource(self.handle);
        }
    }
}

/// Collects an event's message and fields into one line.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }
}

impl<S: Subscriber> Layer<S> for EventLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = format!("{}{}", visitor.message, visitor.fields);
        self.report(Self::event_type(event.metadata().level()), &line);
    }
}
