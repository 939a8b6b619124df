//! Observable engine events
//!
//! Every log line the engine writes names one of these.

use std::fmt;

use super::logger::Severity;

/// Observable events in the status engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Engine boot begins
    BootStart,
    /// Boot finished (cache or remote)
    BootComplete,
    /// Fallback state changed
    StateTransition,
    /// Shutdown complete
    Shutdown,
    /// All tiers cleared
    CacheCleared,

    // Read path
    /// Served from a stale entry while the remote is unreachable
    DegradedTrustRead,
    /// Unknown code resolved to the configured default
    UnknownCode,
    /// Background refresh requested by the read path but no runtime exists
    RefreshSkipped,

    // Refresh
    /// Refresh started
    RefreshStart,
    /// Refresh applied to both tiers
    RefreshComplete,
    /// Refresh failed, caches retained
    RefreshFailed,
    /// Trigger coalesced into an in-flight refresh
    RefreshCoalesced,
    /// Degraded-mode retry scheduled
    RetryScheduled,
    /// Remote change notification received
    RemoteChange,

    // Write path
    /// Mutation accepted by the remote store
    MutationAccepted,
    /// Mutation refused by the invariant guard
    MutationRejected,
    /// Mutation failed remotely or was refused while degraded
    MutationFailed,

    // Broadcast
    /// Sync message published
    BroadcastSent,
    /// Sync message received and applied
    BroadcastReceived,
    /// Unreadable or undeliverable sync message dropped
    BroadcastDropped,

    // Durable tier
    /// Corrupt durable payload discarded
    DurableCorrupt,
    /// Durable write failed or exceeded its size bound
    DurableWriteFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "ENGINE_BOOT_BEGIN",
            Event::BootComplete => "ENGINE_BOOT_COMPLETE",
            Event::StateTransition => "ENGINE_STATE_TRANSITION",
            Event::Shutdown => "ENGINE_SHUTDOWN",
            Event::CacheCleared => "CACHE_CLEARED",

            Event::DegradedTrustRead => "DEGRADED_TRUST_READ",
            Event::UnknownCode => "UNKNOWN_CODE",
            Event::RefreshSkipped => "REFRESH_SKIPPED",

            Event::RefreshStart => "REFRESH_BEGIN",
            Event::RefreshComplete => "REFRESH_COMPLETE",
            Event::RefreshFailed => "REFRESH_FAILED",
            Event::RefreshCoalesced => "REFRESH_COALESCED",
            Event::RetryScheduled => "RETRY_SCHEDULED",
            Event::RemoteChange => "REMOTE_CHANGE",

            Event::MutationAccepted => "MUTATION_ACCEPTED",
            Event::MutationRejected => "MUTATION_REJECTED",
            Event::MutationFailed => "MUTATION_FAILED",

            Event::BroadcastSent => "BROADCAST_SENT",
            Event::BroadcastReceived => "BROADCAST_RECEIVED",
            Event::BroadcastDropped => "BROADCAST_DROPPED",

            Event::DurableCorrupt => "DURABLE_CORRUPT",
            Event::DurableWriteFailed => "DURABLE_WRITE_FAILED",
        }
    }

    /// Default severity for the event
    pub fn severity(&self) -> Severity {
        match self {
            Event::RefreshCoalesced | Event::RemoteChange | Event::BroadcastReceived => {
                Severity::Trace
            }
            Event::DegradedTrustRead
            | Event::UnknownCode
            | Event::RefreshSkipped
            | Event::RefreshFailed
            | Event::RetryScheduled
            | Event::MutationRejected
            | Event::BroadcastDropped
            | Event::DurableCorrupt
            | Event::DurableWriteFailed => Severity::Warn,
            Event::MutationFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_upper_snake() {
        let events = [
            Event::BootStart,
            Event::StateTransition,
            Event::DegradedTrustRead,
            Event::RefreshCoalesced,
            Event::MutationRejected,
            Event::BroadcastDropped,
            Event::DurableCorrupt,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_failures_are_not_info() {
        assert!(Event::MutationFailed.severity() > Severity::Info);
        assert!(Event::RefreshFailed.severity() > Severity::Info);
        assert_eq!(Event::RefreshComplete.severity(), Severity::Info);
    }
}
