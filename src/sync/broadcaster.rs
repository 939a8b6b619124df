//! Typed [`SyncMessage`] publishing over a [`BroadcastTransport`].

use std::sync::Arc;

use super::subscription::Subscription;
use super::transport::{BroadcastTransport, MessageHandler};
use crate::model::SyncMessage;
use crate::observability::{log_event, Event, MetricsRegistry};

#[derive(Debug, Clone)]
pub struct Broadcaster {
    transport: Arc<dyn BroadcastTransport>,
    metrics: Arc<MetricsRegistry>,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn BroadcastTransport>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { transport, metrics }
    }

    /// Publish to sibling contexts. Failures are logged, never returned.
    pub fn publish(&self, message: &SyncMessage) {
        let body = match serde_json::to_string(message) {
            Ok(body) => body,
            Err(e) => {
                log_event(Event::BroadcastDropped, &[("error", &e.to_string())]);
                return;
            }
        };

        match self.transport.post_message(&body) {
            Ok(()) => {
                self.metrics.increment_broadcasts_published();
                log_event(
                    Event::BroadcastSent,
                    &[("type", message.kind.as_str()), ("key", &message.payload.key)],
                );
            }
            Err(e) => log_event(Event::BroadcastDropped, &[("error", &e.to_string())]),
        }
    }

    /// Receive messages from sibling contexts.
    ///
    /// Bodies that do not parse are dropped. If the transport cannot listen
    /// the returned subscription is inert.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(SyncMessage) + Send + Sync + 'static,
    {
        let metrics = Arc::clone(&self.metrics);
        let raw: MessageHandler = Arc::new(move |body: &str| {
            match serde_json::from_str::<SyncMessage>(body) {
                Ok(message) => {
                    metrics.increment_broadcasts_received();
                    log_event(
                        Event::BroadcastReceived,
                        &[("type", message.kind.as_str()), ("key", &message.payload.key)],
                    );
                    handler(message);
                }
                Err(e) => log_event(Event::BroadcastDropped, &[("error", &e.to_string())]),
            }
        });

        match self.transport.on_message(raw) {
            Ok(subscription) => subscription,
            Err(e) => {
                log_event(Event::BroadcastDropped, &[("error", &e.to_string())]);
                Subscription::noop()
            }
        }
    }

    pub fn close(&self) {
        self.transport.close();
    }
}
