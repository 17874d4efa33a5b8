//! [`BridgeFactory`] – bridge construction from configuration names.
//!
//! Names are resolved against an explicit [`SymbolTable`] filled at startup,
//! so a misspelt kind or schema fails when the bridge is created rather than
//! at its first delivery.
//!
//! | Failure | Error |
//! |---|---|
//! | name not registered | [`BridgeError::UnknownSymbol`] |
//! | kind name resolves to a schema, or schema name to a kind | [`BridgeError::TypeMismatch`] |
//! | bad frequency, empty topic, zero queue size | [`BridgeError::Config`] |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mqbridge_kernel::RateLimiter;
use mqbridge_types::{BridgeError, MessageSchema, SchemaRegistry};
use serde::{Deserialize, Serialize};

use crate::context::BridgeContext;
use crate::filter::FilterSpec;
use crate::forward::ForwardBridge;
use crate::reverse::ReverseBridge;
use crate::stats::StatsSnapshot;

/// Publisher queue size used when the configuration does not give one.
pub const DEFAULT_QUEUE_SIZE: usize = 10;

// ────────────────────────────────────────────────────────────────────────────
// Symbols
// ────────────────────────────────────────────────────────────────────────────

/// Direction of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeKind {
    /// Topic bus → broker.
    RosToMqtt,
    /// Broker → topic bus, with the control channel.
    MqttToRos,
}

impl BridgeKind {
    pub const fn name(&self) -> &'static str {
        match self {
            BridgeKind::RosToMqtt => "ros_to_mqtt",
            BridgeKind::MqttToRos => "mqtt_to_ros",
        }
    }

    /// Qualified names accepted for compatibility with existing bridge
    /// definitions.
    pub const fn alias(&self) -> &'static str {
        match self {
            BridgeKind::RosToMqtt => "mqtt_bridge.bridge:RosToMqttBridge",
            BridgeKind::MqttToRos => "mqtt_bridge.bridge:MqttToRosBridge",
        }
    }
}

impl fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a name in the [`SymbolTable`] stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Bridge(BridgeKind),
    Schema(MessageSchema),
}

/// Startup-time name → symbol registry.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding both bridge kinds under their short and qualified
    /// names.
    pub fn with_builtin_kinds() -> Self {
        let mut table = Self::new();
        for kind in [BridgeKind::RosToMqtt, BridgeKind::MqttToRos] {
            table.register(kind.name(), Symbol::Bridge(kind));
            table.register(kind.alias(), Symbol::Bridge(kind));
        }
        table
    }

    pub fn register(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.symbols.insert(name.into(), symbol);
    }

    /// Register every schema of `schemas` under its own name.
    pub fn register_schemas(&mut self, schemas: &SchemaRegistry) {
        for schema in schemas.iter() {
            self.register(schema.name.clone(), Symbol::Schema(schema.clone()));
        }
    }

    pub fn resolve(&self, name: &str) -> Result<&Symbol, BridgeError> {
        self.symbols
            .get(name)
            .ok_or_else(|| BridgeError::UnknownSymbol(name.to_string()))
    }

    pub fn bridge_kind(&self, name: &str) -> Result<BridgeKind, BridgeError> {
        match self.resolve(name)? {
            Symbol::Bridge(kind) => Ok(*kind),
            Symbol::Schema(_) => Err(BridgeError::TypeMismatch {
                symbol: name.to_string(),
                expected: "bridge kind",
            }),
        }
    }

    pub fn schema(&self, name: &str) -> Result<&MessageSchema, BridgeError> {
        match self.resolve(name)? {
            Symbol::Schema(schema) => Ok(schema),
            Symbol::Bridge(_) => Err(BridgeError::TypeMismatch {
                symbol: name.to_string(),
                expected: "message schema",
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bridges
// ────────────────────────────────────────────────────────────────────────────

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

/// Per-bridge options beyond endpoints and frequency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeOptions {
    /// Topic-bus publisher queue size (reverse bridges).
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Drop predicate (forward bridges).
    #[serde(default)]
    pub filter: Option<FilterSpec>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            filter: None,
        }
    }
}

/// A connected bridge of either direction.
#[derive(Debug, Clone)]
pub enum Bridge {
    Forward(Arc<ForwardBridge>),
    Reverse(Arc<ReverseBridge>),
}

impl Bridge {
    pub fn kind(&self) -> BridgeKind {
        match self {
            Bridge::Forward(_) => BridgeKind::RosToMqtt,
            Bridge::Reverse(_) => BridgeKind::MqttToRos,
        }
    }

    pub fn schema(&self) -> &str {
        match self {
            Bridge::Forward(b) => b.schema(),
            Bridge::Reverse(b) => b.schema(),
        }
    }

    pub fn topic_from(&self) -> &str {
        match self {
            Bridge::Forward(b) => b.topic_from(),
            Bridge::Reverse(b) => b.topic_from(),
        }
    }

    pub fn topic_to(&self) -> &str {
        match self {
            Bridge::Forward(b) => b.topic_to(),
            Bridge::Reverse(b) => b.topic_to(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        match self {
            Bridge::Forward(b) => b.stats(),
            Bridge::Reverse(b) => b.stats(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Factory
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BridgeFactory {
    symbols: SymbolTable,
    context: BridgeContext,
}

impl BridgeFactory {
    pub fn new(symbols: SymbolTable, context: BridgeContext) -> Self {
        Self { symbols, context }
    }

    /// Factory whose symbol table holds the built-in kinds and every schema
    /// in the context's registry.
    pub fn with_context(context: BridgeContext) -> Self {
        let mut symbols = SymbolTable::with_builtin_kinds();
        symbols.register_schemas(&context.schemas);
        Self::new(symbols, context)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn context(&self) -> &BridgeContext {
        &self.context
    }

    /// Resolve `kind` and `schema`, then build and connect the bridge.
    ///
    /// `frequency` (Hz) becomes the bridge's minimum interval; `None` means
    /// unlimited.  The new bridge subscribes itself to `topic_from`.
    pub fn create_bridge(
        &self,
        kind: &str,
        schema: &str,
        topic_from: &str,
        topic_to: &str,
        frequency: Option<f64>,
        options: &BridgeOptions,
    ) -> Result<Bridge, BridgeError> {
        let kind = self.symbols.bridge_kind(kind)?;
        let schema = self.symbols.schema(schema)?.name.clone();
        if topic_from.trim().is_empty() {
            return Err(BridgeError::Config(format!("{kind} bridge needs a topic_from")));
        }
        let limiter = RateLimiter::from_frequency(frequency, Arc::clone(&self.context.clock))?;

        match kind {
            BridgeKind::RosToMqtt => {
                if topic_to.trim().is_empty() {
                    return Err(BridgeError::Config(format!(
                        "{kind} bridge from {topic_from} needs a topic_to"
                    )));
                }
                let filter = options.filter.as_ref().map(FilterSpec::build);
                ForwardBridge::connect(&self.context, &schema, topic_from, topic_to, limiter, filter)
                    .map(Bridge::Forward)
            }
            BridgeKind::MqttToRos => {
                if options.filter.is_some() {
                    return Err(BridgeError::Config(format!(
                        "{kind} bridge from {topic_from}: filters apply to {} bridges only",
                        BridgeKind::RosToMqtt
                    )));
                }
                if options.queue_size == 0 {
                    return Err(BridgeError::Config(format!(
                        "{kind} bridge from {topic_from}: queue_size must be at least 1"
                    )));
                }
                ReverseBridge::connect(
                    &self.context,
                    &schema,
                    topic_from,
                    topic_to,
                    limiter,
                    options.queue_size,
                )
                .map(Bridge::Reverse)
            }
        }
    }
}
