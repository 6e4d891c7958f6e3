/*!
 * Change-notification bridge.
 *
 * A bridge ties one adapter's controller signal to a notification sink. The
 * signal handler only forwards the event arguments into an unbounded channel,
 * so the controller's dispatch path never blocks and never sees a publish
 * failure. A per-attribute task drains the channel in emission order, asks
 * the adapter for the normalized notification and publishes it.
 */
use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn, Instrument};

use beamflow_core::event::{EventBus, SharedEventBus};
use beamflow_core::logging::{attribute_span, operation_span};
use beamflow_core::types::Value;

use crate::attribute::{Attribute, AttributeAdapter, AttributeError, AttributeState, Limits, Result};
use crate::controller::{HandlerId, SignalHandler};

/// Normalized attribute change, as pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Attribute name
    pub name: String,
    /// Normalized value
    pub value: Value,
    /// Operating state
    pub state: AttributeState,
    /// Free text
    pub message: String,
    /// Limits, included for two-position actuators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
    /// When the notification was built
    pub timestamp: DateTime<Utc>,
}

impl ChangeNotification {
    /// Notification carrying an attribute description
    pub fn from_attribute(attribute: Attribute, with_limits: bool) -> Self {
        Self {
            name: attribute.name,
            value: attribute.value,
            state: attribute.state,
            message: attribute.message,
            limits: with_limits.then_some(attribute.limits),
            timestamp: Utc::now(),
        }
    }
}

/// Outbound publish primitive of the notification transport
pub trait NotificationSink: Send + Sync + Debug {
    /// Publish `notification` on `namespace`, returning how many subscribers got it
    fn publish(&self, namespace: &str, notification: ChangeNotification) -> beamflow_core::Result<usize>;
}

/// In-process notification transport
pub type NotificationBus = SharedEventBus<ChangeNotification>;

impl NotificationSink for EventBus<ChangeNotification> {
    fn publish(&self, namespace: &str, notification: ChangeNotification) -> beamflow_core::Result<usize> {
        EventBus::publish(self, namespace, notification)
    }
}

impl NotificationSink for SharedEventBus<ChangeNotification> {
    fn publish(&self, namespace: &str, notification: ChangeNotification) -> beamflow_core::Result<usize> {
        SharedEventBus::publish(self, namespace, notification)
    }
}

/// Live connection between one adapter's controller signal and a sink.
///
/// Dropping the bridge disconnects the handler and stops the forwarding task.
#[derive(Debug)]
pub struct Bridge {
    adapter: Arc<dyn AttributeAdapter>,
    handler_id: HandlerId,
    namespace: String,
    task: JoinHandle<()>,
}

impl Bridge {
    /// Connect `adapter`'s controller signal to `sink`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install(adapter: Arc<dyn AttributeAdapter>, sink: Arc<dyn NotificationSink>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| AttributeError::RuntimeUnavailable(e.to_string()))?;

        let namespace = adapter.namespace().to_string();
        let (tx, rx) = mpsc::unbounded_channel::<Vec<Value>>();

        let handler_namespace = namespace.clone();
        let handler: SignalHandler = Arc::new(move |args: &[Value]| {
            if tx.send(args.to_vec()).is_err() {
                warn!(namespace = %handler_namespace, "Bridge closed, dropping device event");
            }
        });

        let handler_id = adapter
            .connect_device(handler)
            .map_err(|source| AttributeError::SignalUnavailable {
                attribute: adapter.name().to_string(),
                signal: adapter.role().change_signal().to_string(),
                source,
            })?;

        let task = runtime.spawn(
            forward(Arc::clone(&adapter), sink, namespace.clone(), rx).instrument(attribute_span(adapter.name())),
        );

        debug!(
            attribute = adapter.name(),
            namespace = %namespace,
            signal = adapter.role().change_signal(),
            "Installed change-notification bridge"
        );

        Ok(Self {
            adapter,
            handler_id,
            namespace,
            task,
        })
    }

    /// Namespace notifications are published on
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The bridged adapter
    pub fn adapter(&self) -> &Arc<dyn AttributeAdapter> {
        &self.adapter
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if !self.adapter.disconnect_device(self.handler_id) {
            debug!(namespace = %self.namespace, "Bridge handler was already disconnected");
        }
        self.task.abort();
        debug!(namespace = %self.namespace, "Removed change-notification bridge");
    }
}

async fn forward(
    adapter: Arc<dyn AttributeAdapter>,
    sink: Arc<dyn NotificationSink>,
    namespace: String,
    mut rx: mpsc::UnboundedReceiver<Vec<Value>>,
) {
    while let Some(args) = rx.recv().await {
        let notification = adapter
            .on_device_event(&args)
            .instrument(operation_span("notify", adapter.name()))
            .await;

        match sink.publish(&namespace, notification) {
            Ok(receivers) => trace!(namespace = %namespace, receivers, "Published change notification"),
            Err(e) => warn!(namespace = %namespace, error = %e, "Failed to publish change notification"),
        }
    }

    debug!(namespace = %namespace, "Device event channel closed");
}
