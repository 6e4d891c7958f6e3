/*!
 * Event bus for BeamFlow.
 *
 * Events are fanned out per namespace (for example `beamline/energy`). Every
 * namespace owns one `tokio::sync::broadcast` channel that is created lazily
 * by whichever side touches it first, publisher or subscriber.
 */
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Maximum number of events that can be buffered in a channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type EventSender<T> = broadcast::Sender<T>;

/// Receiving half of a namespace subscription
pub type EventReceiver<T> = broadcast::Receiver<T>;

/// Event bus keyed by namespace
#[derive(Debug)]
pub struct EventBus<T> {
    channels: Mutex<HashMap<String, EventSender<T>>>,
    channel_capacity: usize,
}

impl<T: Clone + Debug + Send + Sync + 'static> EventBus<T> {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            channel_capacity: capacity.max(1),
        }
    }

    fn sender(&self, namespace: &str) -> Result<EventSender<T>> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::event("Failed to lock channels"))?;

        let sender = channels
            .entry(namespace.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0);

        Ok(sender.clone())
    }

    /// Publish an event on a namespace, returning the number of receivers
    /// it was delivered to
    pub fn publish(&self, namespace: &str, event: T) -> Result<usize> {
        let sender = self.sender(namespace)?;

        if sender.receiver_count() == 0 {
            debug!(namespace, "No receivers for event");
            return Ok(0);
        }

        match sender.send(event) {
            Ok(n) => {
                trace!(namespace, "Published event to {} receivers", n);
                Ok(n)
            }
            Err(e) => {
                warn!(namespace, "Failed to publish event: {}", e);
                Err(Error::event(format!("Failed to publish event on {}: {}", namespace, e)))
            }
        }
    }

    /// Subscribe to the events of a namespace
    pub fn subscribe(&self, namespace: &str) -> Result<EventReceiver<T>> {
        Ok(self.sender(namespace)?.subscribe())
    }

    /// Number of live receivers on a namespace
    pub fn receiver_count(&self, namespace: &str) -> usize {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(namespace).map(|s| s.receiver_count()))
            .unwrap_or(0)
    }

    /// Namespaces that have been published to or subscribed on
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .lock()
            .map(|channels| channels.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl<T: Clone + Debug + Send + Sync + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared event bus that can be cloned
#[derive(Debug)]
pub struct SharedEventBus<T>(Arc<EventBus<T>>);

impl<T> Clone for SharedEventBus<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone + Debug + Send + Sync + 'static> SharedEventBus<T> {
    /// Create a new shared event bus
    pub fn new() -> Self {
        Self(Arc::new(EventBus::new()))
    }

    /// Create a new shared event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(EventBus::with_capacity(capacity)))
    }

    /// Publish an event on a namespace
    pub fn publish(&self, namespace: &str, event: T) -> Result<usize> {
        self.0.publish(namespace, event)
    }

    /// Subscribe to the events of a namespace
    pub fn subscribe(&self, namespace: &str) -> Result<EventReceiver<T>> {
        self.0.subscribe(namespace)
    }

    /// Get a reference to the underlying bus
    pub fn bus(&self) -> &EventBus<T> {
        &self.0
    }
}

impl<T: Clone + Debug + Send + Sync + 'static> Default for SharedEventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Barrier;

    #[derive(Debug, Clone, PartialEq)]
    struct TestEvent {
        id: u32,
        message: String,
    }

    #[tokio::test]
    async fn test_publish_subscribe() -> Result<()> {
        let event_bus = EventBus::new();
        let mut rx = event_bus.subscribe("beamline/energy")?;

        let event = TestEvent {
            id: 1,
            message: "moved".to_string(),
        };

        let receivers = event_bus.publish("beamline/energy", event.clone())?;
        assert_eq!(receivers, 1);

        let received = rx.recv().await.map_err(|e| Error::event(e.to_string()))?;
        assert_eq!(received, event);

        Ok(())
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() -> Result<()> {
        let event_bus = SharedEventBus::new();
        let mut energy = event_bus.subscribe("beamline/energy")?;
        let mut shutter = event_bus.subscribe("beamline/fastShutter")?;

        event_bus.publish("beamline/energy", TestEvent { id: 1, message: "e".into() })?;

        assert_eq!(energy.recv().await.map_err(|e| Error::event(e.to_string()))?.id, 1);
        assert!(shutter.try_recv().is_err());

        Ok(())
    }

    #[test]
    fn test_publish_without_receivers() -> Result<()> {
        let event_bus = EventBus::new();
        let delivered = event_bus.publish("beamline/energy", TestEvent { id: 7, message: String::new() })?;
        assert_eq!(delivered, 0);
        assert_eq!(event_bus.namespaces(), vec!["beamline/energy".to_string()]);
        Ok(())
    }

    #[test]
    fn test_receiver_count() -> Result<()> {
        let event_bus: EventBus<TestEvent> = EventBus::new();
        assert_eq!(event_bus.receiver_count("a"), 0);
        let _rx1 = event_bus.subscribe("a")?;
        let _rx2 = event_bus.subscribe("a")?;
        assert_eq!(event_bus.receiver_count("a"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_publish_preserves_per_publisher_order() -> Result<()> {
        const NUM_PUBLISHERS: usize = 4;
        const EVENTS_PER_PUBLISHER: usize = 25;

        let event_bus = SharedEventBus::new();
        let mut rx = event_bus.subscribe("ns")?;
        let barrier = Arc::new(Barrier::new(NUM_PUBLISHERS));

        let mut handles = Vec::with_capacity(NUM_PUBLISHERS);
        for publisher_id in 0..NUM_PUBLISHERS {
            let event_bus = event_bus.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                for i in 0..EVENTS_PER_PUBLISHER {
                    let event = TestEvent {
                        id: i as u32,
                        message: publisher_id.to_string(),
                    };
                    event_bus.publish("ns", event).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let mut last_seen: HashMap<String, u32> = HashMap::new();
        let mut received = 0;
        while let Ok(event) = rx.try_recv() {
            if let Some(previous) = last_seen.insert(event.message.clone(), event.id) {
                assert!(previous < event.id);
            }
            received += 1;
        }

        assert_eq!(received, NUM_PUBLISHERS * EVENTS_PER_PUBLISHER);
        Ok(())
    }
}
