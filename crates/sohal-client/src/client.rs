//! Public client facade: connect, invoke, subscribe, close.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::device::Device;
use crate::error::ClientError;
use crate::router::{NotificationRouter, SubscriptionId};
use crate::session::{ConnectionState, Session};
use sohal_proto::{Notification, Request};

/// Handle for one listener registration, returned by the subscribe calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub(crate) id: SubscriptionId,
}

/// Client for one SoHal endpoint.
///
/// Cheaply cloneable; all clones share the connection, the pending-call
/// table, and the listener registry, so the client can be used from many
/// tasks concurrently. Calls never block each other: each suspends only on
/// its own completion slot.
#[derive(Clone)]
pub struct SohalClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for SohalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SohalClient").finish_non_exhaustive()
    }
}

struct ClientInner {
    session: Arc<Session>,
    correlator: Arc<Correlator>,
    router: Arc<NotificationRouter>,
    config: ClientConfig,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // Last clone gone without an explicit close: stop the driver task.
        self.session.detach();
    }
}

impl SohalClient {
    /// Connect to a SoHal endpoint, e.g. `ws://localhost:20641`.
    pub async fn connect(
        endpoint: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let correlator = Arc::new(Correlator::new());
        let router = Arc::new(NotificationRouter::new());
        let session = Session::connect(
            endpoint.into(),
            config.clone(),
            correlator.clone(),
            router.clone(),
        )
        .await?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                session,
                correlator,
                router,
                config,
            }),
        })
    }

    /// Current lifecycle state of the underlying connection.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.session.state()
    }

    /// Issue a call and wait for the matching response.
    ///
    /// A `timeout` of `None` uses the configured default. On timeout the
    /// pending entry is removed and a late response is discarded. Dropping
    /// the returned future withdraws the call the same way; the request
    /// already on the wire is not retracted.
    pub async fn invoke(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        let (id, receiver) = self.inner.correlator.register();
        let guard = PendingGuard {
            correlator: self.inner.correlator.clone(),
            id,
            armed: true,
        };

        let text = Request::new(id, method, params).encode()?;
        self.inner.session.send_frame(text).await?;

        let deadline = timeout.unwrap_or_else(|| self.inner.config.default_call_timeout());
        match tokio::time::timeout(deadline, receiver).await {
            Ok(Ok(outcome)) => {
                guard.disarm();
                outcome
            }
            // Completion slot dropped without a value: the session went
            // away between registration and completion.
            Ok(Err(_)) => {
                guard.disarm();
                Err(ClientError::Closed)
            }
            Err(_) => {
                debug!(id, method, "call timed out");
                Err(ClientError::Timeout)
            }
        }
    }

    /// Register a handler for one `(topic, event)` pair, e.g.
    /// `("projector", "on_state")`.
    ///
    /// Handlers run on a dedicated dispatch task in wire order for their
    /// topic. A blocking handler delays later notifications but never the
    /// call path.
    pub fn subscribe(
        &self,
        topic: &str,
        event: &str,
        handler: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> Subscription {
        Subscription {
            id: self
                .inner
                .router
                .register(topic, Some(event), Arc::new(handler)),
        }
    }

    /// Register a handler for every event on a topic.
    pub fn subscribe_all(
        &self,
        topic: &str,
        handler: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> Subscription {
        Subscription {
            id: self.inner.router.register(topic, None, Arc::new(handler)),
        }
    }

    /// Remove a listener registration. Returns `false` if it was already
    /// removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.inner.router.unregister(subscription.id)
    }

    /// Tear the session down: terminate the receive loop, fail every
    /// outstanding call with [`ClientError::Closed`], and return once done.
    /// Further calls fail immediately.
    pub async fn close(&self) {
        self.inner.session.close().await;
    }

    /// Handle for a device exposed by the service, e.g. `projector`.
    #[must_use]
    pub fn device(&self, name: &str) -> Device {
        Device::new(self.clone(), name, None)
    }

    /// Handle for one of several devices of the same class, e.g.
    /// `touchmat@1`.
    #[must_use]
    pub fn device_with_index(&self, name: &str, index: u32) -> Device {
        Device::new(self.clone(), name, Some(index))
    }

    /// Number of calls currently awaiting a response.
    #[must_use]
    pub fn calls_in_flight(&self) -> usize {
        self.inner.correlator.in_flight()
    }
}

/// Removes the pending entry if the call never completed, covering both
/// timeout and a dropped `invoke` future.
struct PendingGuard {
    correlator: Arc<Correlator>,
    id: u64,
    armed: bool,
}

impl PendingGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed && self.correlator.cancel(self.id) {
            debug!(id = self.id, "withdrew pending call");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_refused_is_connection_error() {
        // Nothing listens on this port.
        let config = ClientConfig {
            connect_timeout_ms: 1000,
            ..ClientConfig::default()
        };
        let err = SohalClient::connect("ws://127.0.0.1:9", config)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
    }

    #[test]
    fn pending_guard_cancels_when_armed() {
        let correlator = Arc::new(Correlator::new());
        let (id, _rx) = correlator.register();
        let guard = PendingGuard {
            correlator: correlator.clone(),
            id,
            armed: true,
        };
        drop(guard);
        assert_eq!(correlator.in_flight(), 0);
    }

    #[test]
    fn pending_guard_disarmed_leaves_entry() {
        let correlator = Arc::new(Correlator::new());
        let (id, _rx) = correlator.register();
        let guard = PendingGuard {
            correlator: correlator.clone(),
            id,
            armed: true,
        };
        guard.disarm();
        assert_eq!(correlator.in_flight(), 1);
    }
}
