//! Listener registry and notification dispatch.
//!
//! Server-initiated notifications (frames with no `id`) land here via the
//! session's dispatch task. Registrations map a `(topic, event)` pair, or
//! a topic-wide wildcard, to a handler. The dispatch task consumes the
//! notification queue in arrival order, which preserves per-topic wire
//! order; a slow handler delays later notifications but never the receive
//! loop or the call path.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use sohal_proto::Notification;
use tracing::{debug, warn};

/// Callback invoked for each matching notification.
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Identifies one listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    topic: String,
    /// `None` matches every event on the topic.
    event: Option<String>,
    handler: NotificationHandler,
}

impl Registration {
    fn matches(&self, notification: &Notification) -> bool {
        if self.topic != notification.topic() {
            return false;
        }
        match &self.event {
            None => true,
            Some(event) => notification.event() == Some(event.as_str()),
        }
    }
}

#[derive(Default)]
struct RouterInner {
    next_id: u64,
    registrations: HashMap<u64, Registration>,
}

/// Routes server-initiated notifications to registered listeners.
#[derive(Default)]
pub struct NotificationRouter {
    inner: Mutex<RouterInner>,
}

impl NotificationRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `(topic, event)`; an `event` of `None` is a
    /// wildcard matching every event on the topic.
    ///
    /// Safe to call at any time, including from within a handler.
    pub fn register(
        &self,
        topic: &str,
        event: Option<&str>,
        handler: NotificationHandler,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let previous = inner.registrations.insert(
            id,
            Registration {
                topic: topic.to_owned(),
                event: event.map(str::to_owned),
                handler,
            },
        );
        debug_assert!(previous.is_none());
        SubscriptionId(id)
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        self.inner.lock().registrations.remove(&id.0).is_some()
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().registrations.len()
    }

    /// Whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().registrations.is_empty()
    }

    /// Deliver a notification to every matching handler.
    ///
    /// Handlers run outside the registry lock, so they may register and
    /// unregister freely. A panicking handler is reported and does not
    /// prevent delivery to the remaining handlers. A notification with no
    /// matching listener is silently discarded.
    pub fn dispatch(&self, notification: &Notification) {
        let matching: Vec<NotificationHandler> = {
            let inner = self.inner.lock();
            inner
                .registrations
                .values()
                .filter(|registration| registration.matches(notification))
                .map(|registration| registration.handler.clone())
                .collect()
        };

        if matching.is_empty() {
            debug!(method = %notification.method, "no listener for notification");
            return;
        }

        for handler in matching {
            if catch_unwind(AssertUnwindSafe(|| handler(notification))).is_err() {
                warn!(method = %notification.method, "notification handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;

    fn notification(method: &str, params: serde_json::Value) -> Notification {
        Notification {
            method: method.into(),
            params: Some(params),
        }
    }

    fn collector() -> (Arc<PlMutex<Vec<String>>>, NotificationHandler) {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: NotificationHandler =
            Arc::new(move |n: &Notification| sink.lock().push(n.method.clone()));
        (seen, handler)
    }

    #[test]
    fn exact_match_delivers() {
        let router = NotificationRouter::new();
        let (seen, handler) = collector();
        let _id = router.register("projector", Some("on_state"), handler);

        router.dispatch(&notification("projector.on_state", json!(["on"])));
        router.dispatch(&notification("projector.on_open_count", json!([1])));

        assert_eq!(*seen.lock(), vec!["projector.on_state"]);
    }

    #[test]
    fn wildcard_matches_every_event_on_topic() {
        let router = NotificationRouter::new();
        let (seen, handler) = collector();
        let _id = router.register("projector", None, handler);

        router.dispatch(&notification("projector.on_state", json!(["on"])));
        router.dispatch(&notification("projector.on_open_count", json!([1])));
        router.dispatch(&notification("touchmat.on_touch", json!([])));

        assert_eq!(
            *seen.lock(),
            vec!["projector.on_state", "projector.on_open_count"]
        );
    }

    #[test]
    fn exact_and_wildcard_both_fire() {
        let router = NotificationRouter::new();
        let (seen_exact, exact) = collector();
        let (seen_wild, wild) = collector();
        let _a = router.register("projector", Some("on_state"), exact);
        let _b = router.register("projector", None, wild);

        router.dispatch(&notification("projector.on_state", json!(["on"])));

        assert_eq!(seen_exact.lock().len(), 1);
        assert_eq!(seen_wild.lock().len(), 1);
    }

    #[test]
    fn topics_are_isolated() {
        let router = NotificationRouter::new();
        let (seen, handler) = collector();
        let _id = router.register("touchmat@1", None, handler);

        router.dispatch(&notification("touchmat.on_touch", json!([])));
        router.dispatch(&notification("touchmat@1.on_touch", json!([])));

        assert_eq!(*seen.lock(), vec!["touchmat@1.on_touch"]);
    }

    #[test]
    fn unregister_stops_delivery() {
        let router = NotificationRouter::new();
        let (seen, handler) = collector();
        let id = router.register("projector", None, handler);

        router.dispatch(&notification("projector.on_state", json!(["on"])));
        assert!(router.unregister(id));
        router.dispatch(&notification("projector.on_state", json!(["off"])));

        assert_eq!(seen.lock().len(), 1);
        assert!(!router.unregister(id));
    }

    #[test]
    fn no_listener_is_silently_discarded() {
        let router = NotificationRouter::new();
        // Must not panic or error
        router.dispatch(&notification("projector.on_state", json!(["on"])));
        assert!(router.is_empty());
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let router = NotificationRouter::new();
        let panicking: NotificationHandler = Arc::new(|_n: &Notification| panic!("boom"));
        let (seen, handler) = collector();
        let _a = router.register("projector", None, panicking);
        let _b = router.register("projector", None, handler);

        router.dispatch(&notification("projector.on_state", json!(["on"])));

        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn same_topic_order_is_preserved() {
        let router = NotificationRouter::new();
        let (seen, handler) = collector();
        let _id = router.register("projector", None, handler);

        router.dispatch(&notification("projector.on_a", json!([1])));
        router.dispatch(&notification("projector.on_b", json!([2])));
        router.dispatch(&notification("projector.on_c", json!([3])));

        assert_eq!(
            *seen.lock(),
            vec!["projector.on_a", "projector.on_b", "projector.on_c"]
        );
    }

    #[test]
    fn register_from_within_handler_does_not_deadlock() {
        let router = Arc::new(NotificationRouter::new());
        let inner_router = router.clone();
        let (seen, inner_handler) = collector();
        let recursive: NotificationHandler = Arc::new(move |_n: &Notification| {
            let _new = inner_router.register("touchmat", None, inner_handler.clone());
        });
        let _id = router.register("projector", None, recursive);

        router.dispatch(&notification("projector.on_state", json!(["on"])));
        router.dispatch(&notification("touchmat.on_touch", json!([])));

        assert_eq!(*seen.lock(), vec!["touchmat.on_touch"]);
    }

    #[test]
    fn unregister_from_within_handler() {
        let router = Arc::new(NotificationRouter::new());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let id_cell = Arc::new(PlMutex::new(None::<SubscriptionId>));

        let inner_router = router.clone();
        let inner_cell = id_cell.clone();
        let sink = seen.clone();
        let self_removing: NotificationHandler = Arc::new(move |n: &Notification| {
            sink.lock().push(n.method.clone());
            if let Some(id) = inner_cell.lock().take() {
                let _removed = inner_router.unregister(id);
            }
        });
        let id = router.register("projector", None, self_removing);
        *id_cell.lock() = Some(id);

        router.dispatch(&notification("projector.on_state", json!(["on"])));
        router.dispatch(&notification("projector.on_state", json!(["off"])));

        assert_eq!(seen.lock().len(), 1);
    }
}
