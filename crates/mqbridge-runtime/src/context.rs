//! [`BridgeContext`] – collaborators shared by every bridge in a process.

use std::sync::Arc;

use mqbridge_kernel::{Clock, ProcessSupervisor, SystemClock};
use mqbridge_middleware::{BrokerClient, Codec, PrivatePath, TopicBus};
use mqbridge_types::SchemaRegistry;

use crate::transform::TransformRegistry;

/// Everything a bridge needs besides its own endpoints.  Cloning shares the
/// underlying handles.
#[derive(Clone)]
pub struct BridgeContext {
    pub bus: Arc<dyn TopicBus>,
    pub broker: Arc<dyn BrokerClient>,
    pub schemas: Arc<SchemaRegistry>,
    pub transforms: Arc<TransformRegistry>,
    /// Single supervisor behind every reverse bridge's control path.
    pub supervisor: Arc<ProcessSupervisor>,
    pub private_path: PrivatePath,
    /// Broker wire format: decodes reverse deliveries and encodes forward
    /// messages that have no transform rule.
    pub codec: Codec,
    pub clock: Arc<dyn Clock>,
}

impl BridgeContext {
    /// Context with an empty transform table, JSON payloads, no private
    /// prefix and the system clock.
    pub fn new(
        bus: Arc<dyn TopicBus>,
        broker: Arc<dyn BrokerClient>,
        schemas: Arc<SchemaRegistry>,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        Self {
            bus,
            broker,
            schemas,
            transforms: Arc::new(TransformRegistry::new()),
            supervisor,
            private_path: PrivatePath::default(),
            codec: Codec::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_transforms(mut self, transforms: Arc<TransformRegistry>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_private_path(mut self, private_path: PrivatePath) -> Self {
        self.private_path = private_path;
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("schemas", &self.schemas.len())
            .field("transforms", &self.transforms)
            .field("supervisor", &self.supervisor)
            .field("private_path", &self.private_path)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
