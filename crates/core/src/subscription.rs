//! Observer lists with detachable subscriptions.
//!
//! Both the core event bus and every agent keep an ordered list of
//! subscribers. Subscribing returns a [`Subscription`] handle; dropping the
//! handle keeps the subscriber attached, calling `unsubscribe` detaches it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::sync::{read, write};

type Entries<S> = Arc<RwLock<Vec<(u64, Arc<S>)>>>;

/// An ordered, shareable list of subscribers.
pub struct SubscriberList<S: ?Sized> {
    entries: Entries<S>,
    next_id: AtomicU64,
}

impl<S: ?Sized + Send + Sync + 'static> SubscriberList<S> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a subscriber and return the handle that detaches it.
    pub fn add(&self, subscriber: Arc<S>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        write(&self.entries).push((id, subscriber));

        let entries = Arc::downgrade(&self.entries);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(entries) = entries.upgrade() {
                    write(&entries).retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Current subscribers, in subscription order.
    ///
    /// Callers dispatch on the snapshot so no lock is held while a
    /// subscriber runs.
    pub fn snapshot(&self) -> Vec<Arc<S>> {
        read(&self.entries)
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: ?Sized + Send + Sync + 'static> Default for SubscriberList<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by every `subscribe` call.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Detach the subscriber. Further events are not delivered to it.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }

    /// A handle that detaches nothing.
    pub fn noop() -> Self {
        Self { detach: None }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Fixed(&'static str);

    impl Named for Fixed {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn snapshot_preserves_subscription_order() {
        let list: SubscriberList<dyn Named> = SubscriberList::new();
        let _a = list.add(Arc::new(Fixed("a")));
        let _b = list.add(Arc::new(Fixed("b")));
        let names: Vec<_> = list.snapshot().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn unsubscribe_detaches_only_that_subscriber() {
        let list: SubscriberList<dyn Named> = SubscriberList::new();
        let a = list.add(Arc::new(Fixed("a")));
        let _b = list.add(Arc::new(Fixed("b")));
        a.unsubscribe();
        assert_eq!(list.len(), 1);
        assert_eq!(list.snapshot()[0].name(), "b");
    }

    #[test]
    fn unsubscribe_after_list_dropped_is_harmless() {
        let list: SubscriberList<dyn Named> = SubscriberList::new();
        let sub = list.add(Arc::new(Fixed("a")));
        drop(list);
        sub.unsubscribe();
    }
}
