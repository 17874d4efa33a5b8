//! Broker seam, private-namespace resolution and an in-process broker.
//!
//! The lightweight messaging broker (MQTT in production) is an external
//! collaborator.  The bridge engine needs [`BrokerClient::subscribe`] with a
//! per-topic message callback and [`BrokerClient::publish`] of raw bytes.

use std::sync::Arc;

use mqbridge_types::BridgeError;
use tokio::sync::broadcast;

use crate::bus::{TopicChannels, DEFAULT_CAPACITY};

/// One delivery from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Callback invoked for every payload delivered on a subscribed topic.
pub type PayloadHandler = Arc<dyn Fn(BrokerMessage) + Send + Sync>;

/// Subscribe/publish primitives the bridge engine needs from the broker
/// client.  Topics are exact names; wildcard filters are not interpreted.
pub trait BrokerClient: Send + Sync {
    /// Subscribe to `topic` and register `handler` as its message callback.
    fn subscribe(&self, topic: &str, handler: PayloadHandler) -> Result<(), BridgeError>;

    /// Publish `payload` on `topic`, returning the number of local receivers
    /// (always `Ok(0)` for a remote broker that does not report it).
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize, BridgeError>;
}

// ---------------------------------------------------------------------------
// Private namespace
// ---------------------------------------------------------------------------

/// Resolves `~/`-prefixed broker topics into this device's private
/// namespace.
///
/// ```
/// use mqbridge_middleware::PrivatePath;
///
/// let private = PrivatePath::new("device/001");
/// assert_eq!(private.resolve("~/echo"), "device/001/echo");
/// assert_eq!(private.resolve("echo"), "echo");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivatePath {
    prefix: String,
}

impl PrivatePath {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Expand a leading `~/`; every other topic is returned unchanged.
    pub fn resolve(&self, topic: &str) -> String {
        match topic.strip_prefix("~/") {
            Some(rest) => format!("{}/{}", self.prefix, rest),
            None => topic.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// LocalBroker
// ---------------------------------------------------------------------------

/// In-process [`BrokerClient`].  Clone it cheaply – all clones share the same
/// topics.
#[derive(Clone, Debug)]
pub struct LocalBroker {
    channels: Arc<TopicChannels<BrokerMessage>>,
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(TopicChannels::new(capacity)),
        }
    }

    /// Raw receiver on `topic`, for observers such as tests or the CLI's
    /// loopback printer.
    pub fn receiver(&self, topic: &str) -> Result<broadcast::Receiver<BrokerMessage>, BridgeError> {
        Ok(self.channels.sender(topic, None)?.subscribe())
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BrokerClient for LocalBroker {
    fn subscribe(&self, topic: &str, handler: PayloadHandler) -> Result<(), BridgeError> {
        self.channels.spawn_dispatcher(topic, handler)
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize, BridgeError> {
        self.channels.send(
            topic,
            BrokerMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            },
        )
    }
}
