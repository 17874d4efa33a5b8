//! `mqbridge-types` – shared vocabulary of the bridge engine.
//!
//! - [`schema`] – message schemas, structured [`Message`] values and the
//!   recursive population of a schema from a decoded payload.
//! - [`control`] – the pipe-delimited control-channel grammar.
//! - [`BridgeError`] – the single error type every crate returns.

pub mod control;
pub mod schema;

pub use control::{ControlCommand, ControlVerb};
pub use schema::{value_at, FieldKind, FieldSpec, Message, MessageSchema, SchemaRegistry};

use thiserror::Error;

/// Global error type spanning construction, codec, transport and process
/// supervision failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// A bridge kind or message schema name is not registered.
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The name resolved, but to the wrong kind of symbol.
    #[error("Type mismatch: '{symbol}' is not a {expected}")]
    TypeMismatch {
        symbol: String,
        expected: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Publish error on {topic}: {details}")]
    Publish { topic: String, details: String },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Failed to launch '{command}': {details}")]
    Launch { command: String, details: String },

    #[error("Failed to signal process group {pgid}: {details}")]
    Signal { pgid: i32, details: String },
}
