//! # Broadcast Transport
//!
//! Origin-scoped fan-out between execution contexts.
//!
//! Delivery is best-effort and at-most-once. Nothing is persisted or replayed,
//! and a context never receives its own posts.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::subscription::Subscription;
use crate::errors::{StatusError, StatusResult};

/// Callback receiving raw message bodies
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Cross-context pub/sub primitive
pub trait BroadcastTransport: Send + Sync + fmt::Debug {
    /// Post a JSON body to every other context of the origin
    fn post_message(&self, body: &str) -> StatusResult<()>;

    /// Register a handler; it runs off the posting call
    fn on_message(&self, handler: MessageHandler) -> StatusResult<Subscription>;

    /// Stop sending and receiving; later posts fail
    fn close(&self);
}

/// Event sender for one listener
type FrameSender = mpsc::UnboundedSender<String>;

#[derive(Debug)]
struct Listener {
    context: Uuid,
    sender: FrameSender,
}

/// Listeners of one origin
#[derive(Debug, Default)]
struct OriginChannel {
    listeners: RwLock<HashMap<Uuid, Listener>>,
}

impl OriginChannel {
    /// Deliver to every listener not owned by `from`; returns the delivery count
    fn fan_out(&self, from: Uuid, body: &str) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        if let Ok(listeners) = self.listeners.read() {
            for (id, listener) in listeners.iter() {
                if listener.context == from {
                    continue;
                }
                if listener.sender.send(body.to_string()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            if let Ok(mut listeners) = self.listeners.write() {
                for id in dead {
                    listeners.remove(&id);
                }
            }
        }
        delivered
    }

    fn remove(&self, id: &Uuid) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.remove(id);
        }
    }

    fn remove_context(&self, context: Uuid) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.retain(|_, l| l.context != context);
        }
    }

    fn len(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

/// In-process broadcast hub shared by every context of a process.
///
/// Cloning yields another handle to the same hub.
#[derive(Debug, Clone, Default)]
pub struct LocalBroadcastHub {
    origins: Arc<RwLock<HashMap<String, Arc<OriginChannel>>>>,
}

impl LocalBroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel for a new context of `origin`
    pub fn open(&self, origin: &str) -> LocalChannel {
        let channel = self.origin(origin);
        LocalChannel {
            origin: origin.to_string(),
            context: Uuid::new_v4(),
            channel,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live listeners for `origin`
    pub fn listener_count(&self, origin: &str) -> usize {
        self.origins
            .read()
            .ok()
            .and_then(|o| o.get(origin).map(|c| c.len()))
            .unwrap_or(0)
    }

    fn origin(&self, origin: &str) -> Arc<OriginChannel> {
        if let Some(existing) = self.origins.read().ok().and_then(|o| o.get(origin).cloned()) {
            return existing;
        }
        match self.origins.write() {
            Ok(mut origins) => Arc::clone(origins.entry(origin.to_string()).or_default()),
            Err(_) => Arc::new(OriginChannel::default()),
        }
    }
}

/// One context's endpoint on a [`LocalBroadcastHub`]
#[derive(Debug)]
pub struct LocalChannel {
    origin: String,
    context: Uuid,
    channel: Arc<OriginChannel>,
    closed: AtomicBool,
}

impl LocalChannel {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn context_id(&self) -> Uuid {
        self.context
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl BroadcastTransport for LocalChannel {
    fn post_message(&self, body: &str) -> StatusResult<()> {
        if self.is_closed() {
            return Err(StatusError::Internal("broadcast channel closed".into()));
        }
        self.channel.fan_out(self.context, body);
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) -> StatusResult<Subscription> {
        if self.is_closed() {
            return Err(StatusError::Internal("broadcast channel closed".into()));
        }
        let runtime = Handle::try_current()
            .map_err(|_| StatusError::Internal("no async runtime for broadcast listener".into()))?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let id = Uuid::new_v4();
        {
            let mut listeners = self
                .channel
                .listeners
                .write()
                .map_err(|_| StatusError::Internal("Lock poisoned".into()))?;
            listeners.insert(
                id,
                Listener {
                    context: self.context,
                    sender,
                },
            );
        }

        runtime.spawn(async move {
            while let Some(body) = receiver.recv().await {
                handler(&body);
            }
        });

        let channel = Arc::downgrade(&self.channel);
        Ok(Subscription::new(move || {
            if let Some(channel) = channel.upgrade() {
                channel.remove(&id);
            }
        }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.channel.remove_context(self.context);
        }
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn collector() -> (Arc<Mutex<Vec<String>>>, MessageHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |body: &str| {
            sink.lock().unwrap().push(body.to_string());
        });
        (seen, handler)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_delivers_to_other_contexts_only() {
        let hub = LocalBroadcastHub::new();
        let a = hub.open("app");
        let b = hub.open("app");

        let (seen_a, handler_a) = collector();
        let (seen_b, handler_b) = collector();
        let _sa = a.on_message(handler_a).unwrap();
        let _sb = b.on_message(handler_b).unwrap();

        a.post_message("{\"n\":1}").unwrap();
        settle().await;

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(seen_b.lock().unwrap().as_slice(), ["{\"n\":1}"]);
    }

    #[tokio::test]
    async fn test_origins_are_isolated() {
        let hub = LocalBroadcastHub::new();
        let a = hub.open("app");
        let other = hub.open("elsewhere");

        let (seen, handler) = collector();
        let _s = other.on_message(handler).unwrap();

        a.post_message("hello").unwrap();
        settle().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close() {
        let hub = LocalBroadcastHub::new();
        let a = hub.open("app");
        let b = hub.open("app");

        let (_seen, handler) = collector();
        let sub = b.on_message(handler).unwrap();
        assert_eq!(hub.listener_count("app"), 1);

        sub.unsubscribe();
        assert_eq!(hub.listener_count("app"), 0);

        a.close();
        assert!(a.post_message("late").is_err());
        assert!(a.is_closed());
    }

    #[test]
    fn test_listen_without_runtime_fails() {
        let hub = LocalBroadcastHub::new();
        let a = hub.open("app");
        let (_seen, handler) = collector();
        assert!(a.on_message(handler).is_err());
    }
}
