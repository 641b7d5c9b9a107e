//! Observability subsystem
//!
//! - Structured logging (JSON lines) with a closed event vocabulary
//! - Counter metrics
//!
//! Observability never fails the caller: write errors are swallowed.
//!
//! # Usage
//!
//! ```ignore
//! use coachlink::observability::{log_event_with_fields, Event, MetricsRegistry};
//!
//! log_event_with_fields(Event::ChannelOpened, &[("channel", "student-feed-1")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_deliveries();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

fn severity_for(event: Event) -> Severity {
    if event.is_warning() {
        Severity::Warn
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    Logger::log(severity_for(event), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity_for(event), event.as_str(), fields);
}

/// Log a lifecycle event at TRACE level
pub fn trace_event(event: Event, fields: &[(&str, &str)]) {
    Logger::trace(event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_for_events() {
        assert_eq!(severity_for(Event::ChannelFailed), Severity::Warn);
        assert_eq!(severity_for(Event::ServerStart), Severity::Info);
    }

    #[test]
    fn test_log_event() {
        // Verifies no panic
        log_event(Event::ServerStart);
        log_event_with_fields(Event::ChannelOpened, &[("channel", "c1")]);
        trace_event(Event::ChannelSubscribed, &[]);
    }
}
