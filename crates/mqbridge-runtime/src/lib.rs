//! `mqbridge-runtime` – The Bridge Engine
//!
//! Moves messages between the robotics topic bus and the broker, one
//! configured bridge at a time.
//!
//! # Modules
//!
//! - [`transform`] – [`TransformRegistry`][transform::TransformRegistry]:
//!   `(topic_from, topic_to)` → payload encoder, with a structured JSON
//!   default and configuration-built `join` / `project` encoders.
//! - [`filter`] – [`MessageFilter`][filter::MessageFilter]: drop predicates
//!   evaluated before rate limiting.
//! - [`forward`] – [`ForwardBridge`][forward::ForwardBridge]: topic bus →
//!   broker.  Encode and publish failures are counted, never propagated.
//! - [`reverse`] – [`ReverseBridge`][reverse::ReverseBridge]: broker → topic
//!   bus, routing `start` / `stop` payloads to the
//!   [`ProcessSupervisor`][mqbridge_kernel::ProcessSupervisor].
//! - [`factory`] – [`BridgeFactory`][factory::BridgeFactory]: resolves kind
//!   and schema names against a [`SymbolTable`][factory::SymbolTable] and
//!   connects the bridge.
//! - [`stats`] – per-bridge delivery counters.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod context;
pub mod factory;
pub mod filter;
pub mod forward;
pub mod reverse;
pub mod stats;
pub mod telemetry;
pub mod transform;

#[cfg(test)]
mod test_support;

pub use context::BridgeContext;
pub use factory::{
    Bridge, BridgeFactory, BridgeKind, BridgeOptions, Symbol, SymbolTable, DEFAULT_QUEUE_SIZE,
};
pub use filter::{FilterSpec, MessageFilter, NonEmptyFilter};
pub use forward::ForwardBridge;
pub use reverse::ReverseBridge;
pub use stats::{BridgeStats, DeliveryOutcome, StatsSnapshot};
pub use telemetry::{init_tracing, init_tracing_with, LogFormat, TelemetryGuard};
pub use transform::{
    EncoderSpec, JoinEncoder, PayloadEncoder, ProjectionEncoder, StructuredEncoder,
    TransformRegistry,
};
