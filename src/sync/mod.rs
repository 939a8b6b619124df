//! # Cross-Context Sync
//!
//! Change notifications between execution contexts sharing an origin.
//! Receivers invalidate their caches; they never merge the payload.

mod broadcaster;
mod subscription;
mod transport;

pub use broadcaster::Broadcaster;
pub use subscription::Subscription;
pub use transport::{BroadcastTransport, LocalBroadcastHub, LocalChannel, MessageHandler};
