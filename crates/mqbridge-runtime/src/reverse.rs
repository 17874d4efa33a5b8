//! [`ReverseBridge`] – broker → topic bus, plus the control channel.
//!
//! A delivery whose first `|`-separated token is `start` or `stop` is a
//! control command: it goes to the shared [`ProcessSupervisor`] and never
//! reaches the data path.  Every other delivery takes the data path:
//!
//! 1. skipped when the bridge has no `topic_to`,
//! 2. [`RateLimiter`] check-and-set,
//! 3. [`Codec::decode`] of the payload,
//! 4. recursive population of the bridge's schema,
//! 5. publish on the topic bus.
//!
//! Failures in 3–5 are logged at `warn`, counted and dropped.  Nothing is
//! retried.
//!
//! [`Codec::decode`]: mqbridge_middleware::Codec::decode

use std::sync::Arc;

use mqbridge_kernel::{ProcessSupervisor, RateLimiter};
use mqbridge_middleware::{BrokerMessage, Codec, TopicBus};
use mqbridge_types::{BridgeError, ControlCommand, SchemaRegistry};
use tracing::{debug, info, warn};

use crate::context::BridgeContext;
use crate::stats::{BridgeStats, DeliveryOutcome, StatsSnapshot};

pub struct ReverseBridge {
    schema: String,
    /// Broker topic after private-path resolution.
    topic_from: String,
    topic_to: String,
    limiter: RateLimiter,
    codec: Codec,
    schemas: Arc<SchemaRegistry>,
    bus: Arc<dyn TopicBus>,
    supervisor: Arc<ProcessSupervisor>,
    stats: BridgeStats,
}

impl ReverseBridge {
    /// Build a bridge without subscribing or advertising.
    pub fn new(
        context: &BridgeContext,
        schema: &str,
        topic_from: &str,
        topic_to: &str,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            schema: schema.to_string(),
            topic_from: context.private_path.resolve(topic_from),
            topic_to: topic_to.to_string(),
            limiter,
            codec: context.codec,
            schemas: Arc::clone(&context.schemas),
            bus: Arc::clone(&context.bus),
            supervisor: Arc::clone(&context.supervisor),
            stats: BridgeStats::default(),
        }
    }

    /// Build the bridge, advertise `topic_to` with `queue_size` (unless it is
    /// empty) and subscribe to the resolved `topic_from` on the broker.
    pub fn connect(
        context: &BridgeContext,
        schema: &str,
        topic_from: &str,
        topic_to: &str,
        limiter: RateLimiter,
        queue_size: usize,
    ) -> Result<Arc<Self>, BridgeError> {
        let bridge = Arc::new(Self::new(context, schema, topic_from, topic_to, limiter));
        if !bridge.topic_to.is_empty() {
            context
                .bus
                .advertise(&bridge.topic_to, &bridge.schema, queue_size)?;
        }
        let handler = Arc::clone(&bridge);
        context.broker.subscribe(
            &bridge.topic_from,
            Arc::new(move |delivery: BrokerMessage| {
                handler.on_payload(&delivery.payload);
            }),
        )?;
        info!(
            from = %bridge.topic_from,
            to = %bridge.topic_to,
            schema = %bridge.schema,
            codec = %bridge.codec,
            "reverse bridge connected"
        );
        Ok(bridge)
    }

    /// Handle one broker delivery.
    ///
    /// Blocks for the duration of a control pipeline's sleep steps.
    pub fn on_payload(&self, payload: &[u8]) -> DeliveryOutcome {
        let outcome = self.deliver(payload);
        self.stats.record(outcome);
        outcome
    }

    fn deliver(&self, payload: &[u8]) -> DeliveryOutcome {
        if let Some(command) = ControlCommand::from_payload(payload) {
            info!(topic = %self.topic_from, command = %command, "control command received");
            let affected = self.supervisor.handle(&command);
            debug!(verb = command.verb.as_str(), affected, "control command handled");
            return DeliveryOutcome::Control;
        }
        if self.topic_to.is_empty() {
            return DeliveryOutcome::Skipped;
        }
        if !self.limiter.try_acquire() {
            return DeliveryOutcome::RateLimited;
        }
        match self.decode_and_publish(payload) {
            Ok(_) => DeliveryOutcome::Forwarded,
            Err(e) => {
                warn!(from = %self.topic_from, to = %self.topic_to, error = %e, "reverse delivery dropped");
                DeliveryOutcome::Failed
            }
        }
    }

    fn decode_and_publish(&self, payload: &[u8]) -> Result<usize, BridgeError> {
        let value = self.codec.decode(payload)?;
        let message = self.schemas.populate(&self.schema, &value)?;
        self.bus.publish(&self.topic_to, message)
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn topic_from(&self) -> &str {
        &self.topic_from
    }

    pub fn topic_to(&self) -> &str {
        &self.topic_to
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for ReverseBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseBridge")
            .field("schema", &self.schema)
            .field("topic_from", &self.topic_from)
            .field("topic_to", &self.topic_to)
            .field("limiter", &self.limiter)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
