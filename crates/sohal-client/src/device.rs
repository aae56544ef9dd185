//! Generic handle for one device exposed by the service.
//!
//! Every SoHal device shares a base surface (`open`, `close`, `info`,
//! `temperatures`, `subscribe`, `unsubscribe`) addressed by qualified
//! method names like `projector.open` or `touchmat@1.open`. This handle
//! covers that shared surface plus a generic [`Device::call`]; full typed
//! wrappers per device class belong to application code.

use serde_json::Value;

use crate::client::{SohalClient, Subscription};
use crate::error::ClientError;
use sohal_proto::Notification;

/// One device on the service, addressed by name and optional index.
#[derive(Clone)]
pub struct Device {
    client: SohalClient,
    name: String,
}

impl Device {
    pub(crate) fn new(client: SohalClient, name: &str, index: Option<u32>) -> Self {
        Self {
            client,
            name: qualified_name(name, index),
        }
    }

    /// Qualified device name, e.g. `projector` or `touchmat@1`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn method(&self, operation: &str) -> String {
        format!("{}.{operation}", self.name)
    }

    /// Call any method on this device with the default call timeout.
    pub async fn call(&self, operation: &str, params: Option<Value>) -> Result<Value, ClientError> {
        self.client.invoke(&self.method(operation), params, None).await
    }

    /// Open the device. The service reference-counts clients holding the
    /// device open; the result is the current open count.
    pub async fn open(&self) -> Result<Value, ClientError> {
        self.call("open", None).await
    }

    /// Close the device. The result is the remaining open count.
    pub async fn close(&self) -> Result<Value, ClientError> {
        self.call("close", None).await
    }

    /// Firmware version, vendor/product id, serial number.
    pub async fn info(&self) -> Result<Value, ClientError> {
        self.call("info", None).await
    }

    /// Current temperature sensor readings.
    pub async fn temperatures(&self) -> Result<Value, ClientError> {
        self.call("temperatures", None).await
    }

    /// Start receiving this device's notifications.
    ///
    /// Registers a local listener for the device topic and issues the
    /// device's `subscribe` call so the service starts pushing events. The
    /// local registration is rolled back if the call fails.
    pub async fn subscribe(
        &self,
        handler: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> Result<Subscription, ClientError> {
        let subscription = self.client.subscribe_all(&self.name, handler);
        match self.call("subscribe", None).await {
            Ok(_) => Ok(subscription),
            Err(err) => {
                let _ = self.client.unsubscribe(&subscription);
                Err(err)
            }
        }
    }

    /// Stop receiving this device's notifications: drops the local listener
    /// and issues the device's `unsubscribe` call.
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<Value, ClientError> {
        let _ = self.client.unsubscribe(&subscription);
        self.call("unsubscribe", None).await
    }
}

/// `touchmat@0` is what plain `touchmat` aliases; an explicit index
/// addresses one of several devices of the same class.
fn qualified_name(name: &str, index: Option<u32>) -> String {
    match index {
        Some(index) => format!("{name}@{index}"),
        None => name.to_owned(),
    }
}
