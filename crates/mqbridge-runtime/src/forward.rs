//! [`ForwardBridge`] – topic bus → broker.
//!
//! Every delivery on `topic_from` runs:
//!
//! 1. the optional [`MessageFilter`],
//! 2. the [`RateLimiter`] check-and-set,
//! 3. the encoder resolved from the [`TransformRegistry`] for this topic
//!    pair (pairs without a rule are written in the context's codec),
//! 4. a broker publish on `topic_to`.
//!
//! Encode and publish failures end at this boundary: they are counted in
//! [`BridgeStats`], logged at `debug`, and the delivery is dropped.  The bus
//! keeps calling back for new messages either way.
//!
//! [`TransformRegistry`]: crate::transform::TransformRegistry

use std::sync::Arc;

use mqbridge_kernel::RateLimiter;
use mqbridge_middleware::BrokerClient;
use mqbridge_types::{BridgeError, Message};
use tracing::{debug, info};

use crate::context::BridgeContext;
use crate::filter::MessageFilter;
use crate::stats::{BridgeStats, DeliveryOutcome, StatsSnapshot};
use crate::transform::PayloadEncoder;

pub struct ForwardBridge {
    schema: String,
    topic_from: String,
    /// Broker topic after private-path resolution.
    topic_to: String,
    limiter: RateLimiter,
    filter: Option<Arc<dyn MessageFilter>>,
    encoder: Arc<dyn PayloadEncoder>,
    broker: Arc<dyn BrokerClient>,
    stats: BridgeStats,
}

impl ForwardBridge {
    /// Build a bridge without subscribing it.
    ///
    /// The encoder is looked up once, with the topic pair as configured
    /// (before `~/` expansion).
    pub fn new(
        context: &BridgeContext,
        schema: &str,
        topic_from: &str,
        topic_to: &str,
        limiter: RateLimiter,
        filter: Option<Arc<dyn MessageFilter>>,
    ) -> Self {
        Self {
            schema: schema.to_string(),
            topic_from: topic_from.to_string(),
            topic_to: context.private_path.resolve(topic_to),
            limiter,
            filter,
            encoder: context.transforms.resolve(topic_from, topic_to, context.codec),
            broker: Arc::clone(&context.broker),
            stats: BridgeStats::default(),
        }
    }

    /// Build the bridge and subscribe it to `topic_from` on the topic bus.
    pub fn connect(
        context: &BridgeContext,
        schema: &str,
        topic_from: &str,
        topic_to: &str,
        limiter: RateLimiter,
        filter: Option<Arc<dyn MessageFilter>>,
    ) -> Result<Arc<Self>, BridgeError> {
        let bridge = Arc::new(Self::new(context, schema, topic_from, topic_to, limiter, filter));
        let handler = Arc::clone(&bridge);
        context.bus.subscribe(
            &bridge.topic_from,
            &bridge.schema,
            Arc::new(move |message| {
                handler.on_message(message);
            }),
        )?;
        info!(
            from = %bridge.topic_from,
            to = %bridge.topic_to,
            schema = %bridge.schema,
            min_interval_ms = bridge.limiter.min_interval().as_millis() as u64,
            "forward bridge connected"
        );
        Ok(bridge)
    }

    /// Handle one topic-bus delivery.
    pub fn on_message(&self, message: Message) -> DeliveryOutcome {
        let outcome = self.forward(&message);
        self.stats.record(outcome);
        outcome
    }

    fn forward(&self, message: &Message) -> DeliveryOutcome {
        if let Some(filter) = &self.filter {
            if !filter.accept(message) {
                return DeliveryOutcome::Filtered;
            }
        }
        if !self.limiter.try_acquire() {
            return DeliveryOutcome::RateLimited;
        }
        match self.encode_and_publish(message) {
            Ok(_) => DeliveryOutcome::Forwarded,
            Err(e) => {
                debug!(from = %self.topic_from, to = %self.topic_to, error = %e, "forward dropped");
                DeliveryOutcome::Failed
            }
        }
    }

    fn encode_and_publish(&self, message: &Message) -> Result<usize, BridgeError> {
        let payload = self.encoder.encode(message)?;
        self.broker.publish(&self.topic_to, &payload)
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

impl std::fmt::Debug for ForwardBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardBridge")
            .field("schema", &self.schema)
            .field("topic_from", &self.topic_from)
            .field("topic_to", &self.topic_to)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
