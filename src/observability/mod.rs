//! Observability for the status engine
//!
//! - Structured logging (JSON lines)
//! - Typed events
//! - Atomic counters
//!
//! # Usage
//!
//! ```ignore
//! use modgate::observability::{log_event, Event, MetricsRegistry};
//!
//! log_event(Event::RefreshComplete, &[("kind", "modules"), ("count", "12")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_refreshes_started();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot, ResolutionSource};

/// Log an event at its default severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        // This just verifies no panic
        log_event(Event::BootStart, &[]);
        log_event(Event::RefreshFailed, &[("kind", "modules"), ("error", "down")]);
    }
}
