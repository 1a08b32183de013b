//! Index change notifications.
//!
//! `IndexEvent`s are published after a mutation has been applied to the
//! index, so subscribers (listings, breadcrumbs, cursors) can re-derive their
//! state. Rejected intents publish nothing.

use crate::path_key::PathKey;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use web_time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IndexEvent {
    /// Index replaced by a freshly fetched tree.
    #[serde(rename_all = "camelCase")]
    Loaded {
        equipment_id: String,
        node_count: usize,
        timestamp: u64,
    },
    /// Index torn down.
    Cleared { timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    FolderCreated { id: PathKey, timestamp: u64 },
    /// A node was renamed. For files `old_id == new_id`.
    #[serde(rename_all = "camelCase")]
    Renamed {
        old_id: PathKey,
        new_id: PathKey,
        /// Re-keyed nodes including the renamed one (0 for files).
        affected: usize,
        timestamp: u64,
    },
    /// Confirmed deletions, each with its subtree.
    Deleted { ids: Vec<PathKey>, timestamp: u64 },
    /// Files added by an upload.
    Uploaded { ids: Vec<PathKey>, timestamp: u64 },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Disposer pattern: keep the handle alive to keep receiving events; drop it
/// to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(&IndexEvent) + Send + Sync>;

/// Synchronous fan-out of index events.
///
/// Safe to share across threads of a multi-threaded runtime. Wrap in `Arc`
/// to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. The returned `Subscription` unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&IndexEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: a Subscription dropped during panic unwinding inside a
        // callback would otherwise deadlock against the read lock emit holds
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Deliver `event` to every subscriber, in subscription order.
    pub fn emit(&self, event: IndexEvent) {
        // Clone the list so a callback may subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let _sub = bus.subscribe(move |event| {
            seen_clone.lock().unwrap().push(event.clone());
        });

        bus.emit(IndexEvent::Cleared { timestamp: 1 });
        assert_eq!(*seen.lock().unwrap(), vec![IndexEvent::Cleared { timestamp: 1 }]);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let sub = bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });
        bus.emit(IndexEvent::Cleared { timestamp: 1 });
        drop(sub);
        bus.emit(IndexEvent::Cleared { timestamp: 2 });

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = IndexEvent::Renamed {
            old_id: PathKey::new("R\\Docs"),
            new_id: PathKey::new("R\\Archive"),
            affected: 2,
            timestamp: 5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"renamed\""));
        assert!(json.contains("\"oldId\":\"R\\\\Docs\""));
        assert!(json.contains("\"affected\":2"));
    }
}
