//! WebSocket transport session: connect, receive loop, reconnection.
//!
//! One driver task owns the socket for the life of the session. It is the
//! sole reader and the sole physical writer: callers hand outbound frames
//! to an mpsc channel, and the driver interleaves writes with reads via
//! `select!`, so concurrent senders never interleave frames on the wire.
//! Notifications are forwarded to a separate dispatch task in arrival
//! order, so a slow handler never stalls response dispatch or drop
//! detection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::error::ClientError;
use crate::router::NotificationRouter;
use sohal_proto::{Message, Notification};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the link to the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link; the session is torn down.
    Disconnected,
    /// A reconnection attempt is in progress.
    Connecting,
    /// The link is up and calls may be issued.
    Connected,
    /// Teardown was requested and is draining.
    Closing,
}

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;
const STATE_CLOSING: u8 = 3;

fn state_from_u8(value: u8) -> ConnectionState {
    match value {
        STATE_CONNECTING => ConnectionState::Connecting,
        STATE_CONNECTED => ConnectionState::Connected,
        STATE_CLOSING => ConnectionState::Closing,
        _ => ConnectionState::Disconnected,
    }
}

fn state_to_u8(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Disconnected => STATE_DISCONNECTED,
        ConnectionState::Connecting => STATE_CONNECTING,
        ConnectionState::Connected => STATE_CONNECTED,
        ConnectionState::Closing => STATE_CLOSING,
    }
}

pub(crate) enum Outbound {
    Frame(String),
    Shutdown,
}

enum Exit {
    /// Teardown was requested locally.
    Shutdown,
    /// The peer went away or the socket failed.
    Dropped,
}

/// Owns one WebSocket connection to the service and the task driving it.
pub(crate) struct Session {
    endpoint: String,
    config: ClientConfig,
    state: AtomicU8,
    outbound: mpsc::Sender<Outbound>,
    correlator: Arc<Correlator>,
    notifications: mpsc::UnboundedSender<Notification>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Establish the connection and spawn the driver task.
    pub(crate) async fn connect(
        endpoint: String,
        config: ClientConfig,
        correlator: Arc<Correlator>,
        router: Arc<NotificationRouter>,
    ) -> Result<Arc<Self>, ClientError> {
        let socket = Self::dial(&endpoint, &config).await?;
        debug!(endpoint, "connected");

        let (outbound, outbound_rx) = mpsc::channel(64);
        let (notifications, mut notifications_rx) = mpsc::unbounded_channel();

        // Dispatch task: drains the notification queue in arrival order,
        // keeping handler execution off the receive loop. Exits when the
        // session is dropped.
        let _ = tokio::spawn(async move {
            while let Some(notification) = notifications_rx.recv().await {
                router.dispatch(&notification);
            }
        });

        let session = Arc::new(Self {
            endpoint,
            config,
            state: AtomicU8::new(STATE_CONNECTED),
            outbound,
            correlator,
            notifications,
            driver: Mutex::new(None),
        });

        let handle = tokio::spawn(session.clone().drive(socket, outbound_rx));
        *session.driver.lock() = Some(handle);
        Ok(session)
    }

    async fn dial(endpoint: &str, config: &ClientConfig) -> Result<WsStream, ClientError> {
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_message_size))
            .max_frame_size(Some(config.max_message_size));
        let attempt = connect_async_with_config(endpoint, Some(ws_config), false);
        match tokio::time::timeout(config.connect_timeout(), attempt).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(err)) => Err(ClientError::Connection(err.to_string())),
            Err(_) => Err(ClientError::Connection(format!(
                "timed out connecting to {endpoint}"
            ))),
        }
    }

    /// Current lifecycle state.
    pub(crate) fn state(&self) -> ConnectionState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state_to_u8(state), Ordering::Release);
    }

    /// Queue one frame for the wire.
    ///
    /// Fails immediately without touching the transport when the session is
    /// not `Connected`.
    pub(crate) async fn send_frame(&self, text: String) -> Result<(), ClientError> {
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Connecting => {
                return Err(ClientError::Connection("reconnecting".into()));
            }
            ConnectionState::Closing | ConnectionState::Disconnected => {
                return Err(ClientError::Closed);
            }
        }
        self.outbound
            .send(Outbound::Frame(text))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Scoped teardown: stop the driver, fail every outstanding call with
    /// [`ClientError::Closed`], end in `Disconnected`. Idempotent; returns
    /// once the receive loop has terminated.
    pub(crate) async fn close(&self) {
        self.set_state(ConnectionState::Closing);
        // Ignore a closed channel: the driver may already be gone.
        let _ = self.outbound.send(Outbound::Shutdown).await;

        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                debug!(error = %err, "driver task ended abnormally");
            }
        }

        // The driver fails pendings on the way out; this covers a close
        // racing a driver that had already exited.
        self.correlator.fail_all(|| ClientError::Closed);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Best-effort teardown for drop paths that cannot await
    /// [`Session::close`]. The driver stops on the hint and will not
    /// reconnect.
    pub(crate) fn detach(&self) {
        self.set_state(ConnectionState::Closing);
        let _ = self.outbound.try_send(Outbound::Shutdown);
    }

    /// Driver task: owns the socket, pumps frames both ways, reconnects.
    async fn drive(self: Arc<Self>, mut socket: WsStream, mut outbound_rx: mpsc::Receiver<Outbound>) {
        loop {
            match self.pump(&mut socket, &mut outbound_rx).await {
                Exit::Shutdown => {
                    let _ = socket.close(None).await;
                    self.correlator.fail_all(|| ClientError::Closed);
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                Exit::Dropped => {
                    // Calls in flight at the moment of drop are failed, never
                    // replayed: request semantics are not known idempotent.
                    self.correlator.fail_all(|| ClientError::Closed);

                    if self.state() == ConnectionState::Closing || !self.config.auto_reconnect {
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }

                    self.set_state(ConnectionState::Connecting);
                    match self.reconnect(&mut outbound_rx).await {
                        Some(new_socket) => {
                            // Frames queued for the dead connection must not
                            // reach the new one: their pendings were already
                            // failed and their ids will be reissued after
                            // the reset.
                            if !Self::discard_stale_outbound(&mut outbound_rx) {
                                self.set_state(ConnectionState::Disconnected);
                                return;
                            }
                            socket = new_socket;
                            // Ids from the old connection are meaningless now.
                            self.correlator.reset();
                            self.set_state(ConnectionState::Connected);
                            debug!(endpoint = %self.endpoint, "reconnected");
                        }
                        None => {
                            self.set_state(ConnectionState::Disconnected);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Pump one connection until it drops or teardown is requested.
    async fn pump(&self, socket: &mut WsStream, outbound_rx: &mut mpsc::Receiver<Outbound>) -> Exit {
        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => match outbound {
                    Some(Outbound::Frame(text)) => {
                        if let Err(err) = socket.send(WsMessage::Text(text.into())).await {
                            warn!(error = %err, "write failed");
                            return Exit::Dropped;
                        }
                    }
                    Some(Outbound::Shutdown) | None => return Exit::Shutdown,
                },
                frame = socket.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(WsMessage::Binary(_))) => {
                        warn!("ignoring unexpected binary frame");
                    }
                    // tungstenite queues the pong reply internally
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("close frame from service");
                        return Exit::Dropped;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "socket error");
                        return Exit::Dropped;
                    }
                    None => {
                        debug!("socket closed by peer");
                        return Exit::Dropped;
                    }
                },
            }
        }
    }

    /// Route one inbound frame. Malformed frames are logged and dropped;
    /// they never terminate the receive loop.
    fn dispatch(&self, text: &str) {
        match sohal_proto::decode(text) {
            Ok(Message::Response { id, result }) => self.correlator.resolve(id, result),
            Ok(Message::Error {
                id: Some(id),
                error,
            }) => self.correlator.fail(id, ClientError::Remote(error)),
            Ok(Message::Error { id: None, error }) => {
                warn!(code = error.code, message = %error.message, "uncorrelated error frame");
            }
            Ok(Message::Notification(notification)) => {
                // Handed to the dispatch task; the receive loop never waits
                // on a handler.
                if self.notifications.send(notification).is_err() {
                    warn!("notification dispatch task is gone");
                }
            }
            Err(err) => warn!(error = %err, "dropping malformed frame"),
        }
    }

    /// Re-dial per the backoff policy. Returns `None` once the attempt
    /// budget is spent or teardown started.
    ///
    /// Watches the outbound channel during the backoff sleep so a teardown
    /// request wakes it immediately instead of waiting out the delay.
    async fn reconnect(&self, outbound_rx: &mut mpsc::Receiver<Outbound>) -> Option<WsStream> {
        for attempt in 0..self.config.max_reconnect_attempts {
            let delay = self
                .config
                .reconnect_backoff
                .delay_for_attempt(attempt, rand::random());
            debug!(attempt, ?delay, "reconnect backoff");

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    () = &mut sleep => break,
                    outbound = outbound_rx.recv() => match outbound {
                        Some(Outbound::Shutdown) | None => return None,
                        Some(Outbound::Frame(_)) => {
                            debug!("discarding frame queued for the dropped connection");
                        }
                    },
                }
            }

            if self.state() == ConnectionState::Closing {
                return None;
            }
            match Self::dial(&self.endpoint, &self.config).await {
                Ok(socket) => {
                    // A close that landed while dialing wins over the fresh
                    // socket.
                    if self.state() == ConnectionState::Closing {
                        return None;
                    }
                    return Some(socket);
                }
                Err(err) => warn!(attempt, error = %err, "reconnect attempt failed"),
            }
        }
        warn!(
            attempts = self.config.max_reconnect_attempts,
            "giving up on reconnection"
        );
        None
    }

    /// Drop frames left in the outbound queue by the previous connection.
    /// Returns `false` when a teardown request was found among them.
    fn discard_stale_outbound(outbound_rx: &mut mpsc::Receiver<Outbound>) -> bool {
        while let Ok(outbound) = outbound_rx.try_recv() {
            match outbound {
                Outbound::Frame(_) => {
                    debug!("discarding frame queued for the dropped connection");
                }
                Outbound::Shutdown => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrip() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Closing,
        ] {
            assert_eq!(state_from_u8(state_to_u8(state)), state);
        }
    }

    #[test]
    fn unknown_state_byte_is_disconnected() {
        assert_eq!(state_from_u8(200), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn stale_frames_do_not_survive_the_drain() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Outbound::Frame("{\"id\":5}".into())).await.unwrap();
        tx.send(Outbound::Frame("{\"id\":6}".into())).await.unwrap();

        assert!(Session::discard_stale_outbound(&mut rx));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drain_honors_a_queued_teardown() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Outbound::Frame("{\"id\":5}".into())).await.unwrap();
        tx.send(Outbound::Shutdown).await.unwrap();

        assert!(!Session::discard_stale_outbound(&mut rx));
    }

    #[tokio::test]
    async fn drain_on_empty_queue_is_a_no_op() {
        let (_tx, mut rx) = mpsc::channel::<Outbound>(8);
        assert!(Session::discard_stale_outbound(&mut rx));
    }
}
