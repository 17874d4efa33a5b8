//! Topic-bus seam and an in-process implementation.
//!
//! The robotics middleware is an external collaborator: the bridge engine
//! only needs [`TopicBus::subscribe`], [`TopicBus::advertise`] and
//! [`TopicBus::publish`].  [`LocalTopicBus`] implements that contract on top
//! of Tokio broadcast channels so bridges can be exercised without a running
//! middleware.
//!
//! # Delivery model
//!
//! Every subscription owns a dispatcher task.  The task receives messages in
//! publish order and hands each one to the handler on Tokio's blocking pool,
//! so a slow handler (for example a control pipeline sleeping between
//! launch steps) never stalls the async workers.  Deliveries on one
//! subscription are sequential; deliveries on different subscriptions run
//! concurrently.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mqbridge_types::{BridgeError, Message};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 256;

/// Callback invoked for every message delivered on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Publish/subscribe primitives the bridge engine needs from the robotics
/// middleware.
pub trait TopicBus: Send + Sync {
    /// Deliver every future message on `topic` to `handler`.
    fn subscribe(&self, topic: &str, schema: &str, handler: MessageHandler)
    -> Result<(), BridgeError>;

    /// Declare that this process will publish `schema` messages on `topic`.
    fn advertise(&self, topic: &str, schema: &str, queue_size: usize) -> Result<(), BridgeError>;

    /// Publish `message` on `topic`.
    ///
    /// Returns the number of subscribers handed the message; `Ok(0)` when
    /// nobody is listening is a normal condition.
    fn publish(&self, topic: &str, message: Message) -> Result<usize, BridgeError>;
}

// ---------------------------------------------------------------------------
// Shared channel table
// ---------------------------------------------------------------------------

/// Lazily created broadcast channel per topic name.
#[derive(Debug)]
pub(crate) struct TopicChannels<T> {
    channels: RwLock<HashMap<String, broadcast::Sender<T>>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> TopicChannels<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Sender for `topic`, creating the channel with `capacity` (or the
    /// table default) when it does not exist yet.
    pub(crate) fn sender(
        &self,
        topic: &str,
        capacity: Option<usize>,
    ) -> Result<broadcast::Sender<T>, BridgeError> {
        if let Some(sender) = self.existing(topic)? {
            return Ok(sender);
        }
        let mut channels = self
            .channels
            .write()
            .map_err(|_| BridgeError::Channel("topic table poisoned".to_string()))?;
        let sender = channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(capacity.unwrap_or(self.capacity).max(1)).0);
        Ok(sender.clone())
    }

    pub(crate) fn existing(&self, topic: &str) -> Result<Option<broadcast::Sender<T>>, BridgeError> {
        let channels = self
            .channels
            .read()
            .map_err(|_| BridgeError::Channel("topic table poisoned".to_string()))?;
        Ok(channels.get(topic).cloned())
    }

    /// Send on an existing channel; unknown topics and topics without
    /// receivers count as zero deliveries.
    pub(crate) fn send(&self, topic: &str, item: T) -> Result<usize, BridgeError> {
        match self.existing(topic)? {
            Some(sender) => Ok(sender.send(item).unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Spawn the dispatcher task feeding `handler` from `topic`.
    pub(crate) fn spawn_dispatcher(
        &self,
        topic: &str,
        handler: Arc<dyn Fn(T) + Send + Sync>,
    ) -> Result<(), BridgeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            BridgeError::Channel(format!("subscribing to {topic} needs a Tokio runtime: {e}"))
        })?;
        let receiver = self.sender(topic, None)?.subscribe();
        runtime.spawn(dispatch(topic.to_string(), receiver, handler));
        Ok(())
    }
}

async fn dispatch<T: Clone + Send + 'static>(
    topic: String,
    mut receiver: broadcast::Receiver<T>,
    handler: Arc<dyn Fn(T) + Send + Sync>,
) {
    loop {
        match receiver.recv().await {
            Ok(item) => {
                let handler = Arc::clone(&handler);
                if let Err(e) = tokio::task::spawn_blocking(move || handler(item)).await {
                    error!(topic = %topic, error = %e, "delivery handler panicked");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(topic = %topic, lagged_by = n, "subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(topic = %topic, "channel closed; dispatcher exiting");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LocalTopicBus
// ---------------------------------------------------------------------------

/// In-process [`TopicBus`].  Clone it cheaply – all clones share the same
/// channels.
///
/// Each topic is bound to the schema of its first subscriber or advertiser;
/// later use with a different schema is rejected.
#[derive(Clone, Debug)]
pub struct LocalTopicBus {
    channels: Arc<TopicChannels<Message>>,
    schemas: Arc<RwLock<HashMap<String, String>>>,
}

impl LocalTopicBus {
    /// Create a bus whose topics buffer `capacity` messages by default.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(TopicChannels::new(capacity)),
            schemas: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Raw receiver on `topic`, for callers that want to await messages
    /// instead of registering a handler.
    pub fn receiver(
        &self,
        topic: &str,
        schema: &str,
    ) -> Result<broadcast::Receiver<Message>, BridgeError> {
        self.bind_schema(topic, schema)?;
        Ok(self.channels.sender(topic, None)?.subscribe())
    }

    fn bind_schema(&self, topic: &str, schema: &str) -> Result<(), BridgeError> {
        let mut schemas = self
            .schemas
            .write()
            .map_err(|_| BridgeError::Channel("schema table poisoned".to_string()))?;
        let bound = schemas
            .entry(topic.to_string())
            .or_insert_with(|| schema.to_string());
        if bound == schema {
            Ok(())
        } else {
            Err(BridgeError::Channel(format!(
                "topic {topic} carries {bound}, not {schema}"
            )))
        }
    }
}

impl Default for LocalTopicBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TopicBus for LocalTopicBus {
    fn subscribe(
        &self,
        topic: &str,
        schema: &str,
        handler: MessageHandler,
    ) -> Result<(), BridgeError> {
        self.bind_schema(topic, schema)?;
        self.channels.spawn_dispatcher(topic, handler)
    }

    fn advertise(&self, topic: &str, schema: &str, queue_size: usize) -> Result<(), BridgeError> {
        self.bind_schema(topic, schema)?;
        self.channels.sender(topic, Some(queue_size))?;
        Ok(())
    }

    fn publish(&self, topic: &str, message: Message) -> Result<usize, BridgeError> {
        self.bind_schema(topic, &message.schema)?;
        self.channels.send(topic, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    fn point(x: f64) -> Message {
        let Value::Object(fields) = json!({ "x": x, "y": 0.0, "z": 0.0 }) else {
            unreachable!()
        };
        Message::new("geometry_msgs/Point", fields)
    }

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalTopicBus::default();
        let mut rx = bus.receiver("/odom", "geometry_msgs/Point")?;

        assert_eq!(bus.publish("/odom", point(1.0))?, 1);

        let received = rx.recv().await?;
        assert_eq!(received, point(1.0));
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_zero_deliveries() {
        let bus = LocalTopicBus::default();
        assert_eq!(bus.publish("/nobody", point(0.0)).unwrap(), 0);

        bus.advertise("/advertised", "geometry_msgs/Point", 10).unwrap();
        assert_eq!(bus.publish("/advertised", point(0.0)).unwrap(), 0);
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let bus = LocalTopicBus::default();
        bus.advertise("/odom", "geometry_msgs/Point", 10).unwrap();

        let err = bus
            .publish("/odom", Message::new("std_msgs/String", Map::new()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Channel(_)));
    }

    #[test]
    fn subscribe_outside_runtime_fails() {
        let bus = LocalTopicBus::default();
        let handler: MessageHandler = Arc::new(|_| {});
        let err = bus
            .subscribe("/odom", "geometry_msgs/Point", handler)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Channel(_)));
    }

    #[tokio::test]
    async fn handler_receives_messages_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalTopicBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

        let sink = Arc::clone(&seen);
        bus.subscribe(
            "/odom",
            "geometry_msgs/Point",
            Arc::new(move |msg: Message| {
                sink.lock().unwrap().push(msg.fields["x"].clone());
                let _ = done_tx.send(());
            }),
        )?;

        for i in 0..5 {
            bus.publish("/odom", point(f64::from(i)))?;
        }
        for _ in 0..5 {
            tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
                .await?
                .ok_or("handler channel closed")?;
        }

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![json!(0.0), json!(1.0), json!(2.0), json!(3.0), json!(4.0)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_lags_without_blocking_publisher() {
        const CAPACITY: usize = 8;
        let bus = LocalTopicBus::new(CAPACITY);
        let mut slow = bus.receiver("/scan", "geometry_msgs/Point").unwrap();

        for i in 0..100 {
            let _ = bus.publish("/scan", point(f64::from(i)));
        }

        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
