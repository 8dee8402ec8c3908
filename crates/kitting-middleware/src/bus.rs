//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message and a slow subscriber never blocks a
//! publisher. Publishing is synchronous, so bus delivery keeps working while
//! the fulfillment driver is parked on a service call.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Orders`] | Incoming orders from `/ariac/orders` |
//! | [`Topic::LogicalCameras`] | Full detection snapshots, one per camera update |
//! | [`Topic::Transforms`] | `/tf` and `/tf_static` edges |
//! | [`Topic::Fulfillment`] | Per-product reports emitted by the driver |
//! | [`Topic::SystemAlerts`] | Competition start, faults, shutdown |

use kitting_types::{Event, KitError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers). Matches the order-topic queue depth.
const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Orders,
    LogicalCameras,
    Transforms,
    Fulfillment,
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    orders: broadcast::Sender<Event>,
    logical_cameras: broadcast::Sender<Event>,
    transforms: broadcast::Sender<Event>,
    fulfillment: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus. `capacity` applies to every topic channel
    /// independently.
    pub fn new(capacity: usize) -> Self {
        let (orders, _) = broadcast::channel(capacity);
        let (logical_cameras, _) = broadcast::channel(capacity);
        let (transforms, _) = broadcast::channel(capacity);
        let (fulfillment, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            orders,
            logical_cameras,
            transforms,
            fulfillment,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`KitError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, KitError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| KitError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel. Only events published
    /// after this call are delivered.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Orders => &self.orders,
            Topic::LogicalCameras => &self.logical_cameras,
            Topic::Transforms => &self.transforms,
            Topic::Fulfillment => &self.fulfillment,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   messages were dropped.
    /// * `Err(RecvError::Closed)` – every sender has been dropped.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
