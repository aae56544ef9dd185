//! # sohal-client
//!
//! Async client for the SoHal hardware-abstraction service. SoHal exposes
//! attached devices (projector, depth camera, touchmat, ...) over a
//! persistent WebSocket carrying JSON-RPC 2.0 traffic; this crate provides
//! the pieces device code composes:
//!
//! - transport session: one background task owning the socket, with
//!   optional reconnection under exponential backoff
//! - call correlation: concurrent `invoke` callers each get exactly their
//!   own response, regardless of arrival order
//! - notification routing: server-pushed events delivered to per-topic
//!   listeners in wire order, isolated from the call path
//!
//! ```no_run
//! use sohal_client::{ClientConfig, SohalClient};
//!
//! # async fn demo() -> Result<(), sohal_client::ClientError> {
//! let client = SohalClient::connect("ws://localhost:20641", ClientConfig::default()).await?;
//! let projector = client.device("projector");
//! let _count = projector.open().await?;
//! let on = client.invoke("projector.on", None, None).await?;
//! assert_eq!(on, serde_json::json!(true));
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod correlator;
pub mod device;
pub mod error;
pub mod router;
pub mod session;

pub use client::{SohalClient, Subscription};
pub use config::{BackoffConfig, ClientConfig};
pub use device::Device;
pub use error::ClientError;
pub use router::{NotificationHandler, NotificationRouter, SubscriptionId};
pub use session::ConnectionState;
pub use sohal_proto::{Notification, RemoteErrorBody};
