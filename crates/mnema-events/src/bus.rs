use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::event::{GraphEvent, Topic};

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
pub type SubscriberId = u64;

type Handler = Box<dyn Fn(&GraphEvent) + Send + Sync>;

struct Subscription {
    id: SubscriberId,
    /// `None` subscribes to every topic.
    topic: Option<Topic>,
    handler: Handler,
}

/// Synchronous in-process event bus.
///
/// Each publish invokes every matching subscriber exactly once, in
/// subscription order. A panicking subscriber is caught and logged; it never
/// affects the publisher or the remaining subscribers. The subscriber list
/// is read-mostly: publish takes only a read lock.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for one topic.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriberId
    where
        F: Fn(&GraphEvent) + Send + Sync + 'static,
    {
        self.register(Some(topic), Box::new(handler))
    }

    /// Register `handler` for every topic.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&GraphEvent) + Send + Sync + 'static,
    {
        self.register(None, Box::new(handler))
    }

    fn register(&self, topic: Option<Topic>, handler: Handler) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.write().push(Subscription {
            id,
            topic,
            handler,
        });
        id
    }

    /// Remove a subscription. Returns false if the id was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Deliver `event` to every matching subscriber, isolating failures.
    pub fn publish(&self, event: &GraphEvent) {
        let topic = event.topic();
        let subs = self.subscriptions.read();
        for sub in subs.iter() {
            if sub.topic.map_or(true, |t| t == topic) {
                let result = catch_unwind(AssertUnwindSafe(|| (sub.handler)(event)));
                if result.is_err() {
                    warn!(subscriber = sub.id, ?topic, "subscriber panicked; continuing");
                }
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventBus({} subscribers)", self.subscriber_count())
    }
}
