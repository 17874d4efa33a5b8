//! Pluggable drop predicates applied before a message is rate limited.

use std::sync::Arc;

use mqbridge_types::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decides whether a message should continue down the forwarding path.
pub trait MessageFilter: Send + Sync {
    fn accept(&self, message: &Message) -> bool;
}

/// Rejects messages whose array, string or object at `field` is empty or
/// missing.  Any other value (numbers, booleans) passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyFilter {
    field: String,
}

impl NonEmptyFilter {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl MessageFilter for NonEmptyFilter {
    fn accept(&self, message: &Message) -> bool {
        match message.lookup(&self.field) {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::String(text)) => !text.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }
}

/// Filter description as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    NonEmpty { field: String },
}

impl FilterSpec {
    pub fn build(&self) -> Arc<dyn MessageFilter> {
        match self {
            FilterSpec::NonEmpty { field } => Arc::new(NonEmptyFilter::new(field.clone())),
        }
    }
}
