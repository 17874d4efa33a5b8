//! Message schemas and structured messages.
//!
//! A [`MessageSchema`] is the shape of one topic-bus message type: an
//! ordered list of named, typed fields.  A [`Message`] is one value of that
//! shape, stored as a JSON object so the transform layer can walk it without
//! knowing the concrete type.
//!
//! [`SchemaRegistry::populate`] is the inbound half of the bridge: it takes a
//! decoded broker payload and fills an instance of a schema field by field,
//! recursing into nested messages and arrays.
//!
//! | Payload situation | Result |
//! |---|---|
//! | field present, right type | copied (numbers normalised to the field kind) |
//! | field present, `null` | zero value |
//! | field absent | zero value |
//! | field present, wrong type | [`BridgeError::Decoding`] |
//! | extra field not in schema | ignored |

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::BridgeError;

// ────────────────────────────────────────────────────────────────────────────
// Field kinds
// ────────────────────────────────────────────────────────────────────────────

/// Type of a single schema field.
///
/// Parsed from ROS-style type names: `bool`, `int32`, `float64`, `string`,
/// `geometry_msgs/Point`, `float64[]`, `int8[16]`.  Any name that is not a
/// primitive is treated as a reference to another registered schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    /// Reference to another schema by name.
    Nested(String),
    /// Repeated field; fixed-size arrays are treated as unbounded.
    Array(Box<FieldKind>),
}

impl FieldKind {
    /// Shorthand for an array of `inner`.
    pub fn array_of(inner: FieldKind) -> Self {
        FieldKind::Array(Box::new(inner))
    }

    /// Shorthand for a nested schema reference.
    pub fn nested(schema: impl Into<String>) -> Self {
        FieldKind::Nested(schema.into())
    }
}

impl FromStr for FieldKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix("[]") {
            return Ok(FieldKind::array_of(inner.parse()?));
        }
        if s.ends_with(']')
            && let Some(open) = s.find('[')
        {
            return Ok(FieldKind::array_of(s[..open].parse()?));
        }
        match s {
            "" => Err(BridgeError::Config("empty field type".to_string())),
            "bool" => Ok(FieldKind::Bool),
            "byte" | "char" | "int8" | "uint8" | "int16" | "uint16" | "int32" | "uint32"
            | "int64" | "uint64" => Ok(FieldKind::Int),
            "float32" | "float64" => Ok(FieldKind::Float),
            "string" => Ok(FieldKind::Text),
            other => Ok(FieldKind::Nested(other.to_string())),
        }
    }
}

impl TryFrom<String> for FieldKind {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldKind> for String {
    fn from(kind: FieldKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::Int => write!(f, "int64"),
            FieldKind::Float => write!(f, "float64"),
            FieldKind::Text => write!(f, "string"),
            FieldKind::Nested(name) => write!(f, "{name}"),
            FieldKind::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Schemas
// ────────────────────────────────────────────────────────────────────────────

/// One named, typed field of a [`MessageSchema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

/// Shape of a topic-bus message type, e.g. `geometry_msgs/Point`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl MessageSchema {
    /// Create a schema with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style helper appending a field.
    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
        });
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Messages
// ────────────────────────────────────────────────────────────────────────────

/// A structured message flowing through a bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Name of the [`MessageSchema`] this message is an instance of.
    pub schema: String,
    pub fields: Map<String, Value>,
}

impl Message {
    pub fn new(schema: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            schema: schema.into(),
            fields,
        }
    }

    /// Top-level field by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Resolve a dotted path such as `pose.position.x` or `results.0.id`.
    ///
    /// Numeric segments index into arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let root = self.fields.get(head)?;
        match rest {
            Some(rest) => value_at(root, rest),
            None => Some(root),
        }
    }
}

/// Resolve a dotted path relative to an arbitrary JSON value.
///
/// An empty path returns `value` itself.
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

/// Startup-time table of every known [`MessageSchema`], keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, MessageSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema`.  A schema with the same name is replaced.
    pub fn register(&mut self, schema: MessageSchema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&MessageSchema> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageSchema> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Check that every nested reference resolves and that no schema
    /// contains itself through a chain of non-array fields (its zero value
    /// would be infinite).
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownSymbol`] for a dangling reference,
    /// [`BridgeError::Config`] for a containment cycle.
    pub fn validate(&self) -> Result<(), BridgeError> {
        for schema in self.schemas.values() {
            for field in &schema.fields {
                self.check_references(&schema.name, &field.kind)?;
            }
            let mut visiting = HashSet::new();
            self.check_cycle(&schema.name, &mut visiting)?;
        }
        Ok(())
    }

    fn check_references(&self, owner: &str, kind: &FieldKind) -> Result<(), BridgeError> {
        match kind {
            FieldKind::Nested(name) if !self.contains(name) => Err(BridgeError::UnknownSymbol(
                format!("{name} (referenced by {owner})"),
            )),
            FieldKind::Array(inner) => self.check_references(owner, inner),
            _ => Ok(()),
        }
    }

    fn check_cycle<'a>(
        &'a self,
        name: &'a str,
        visiting: &mut HashSet<&'a str>,
    ) -> Result<(), BridgeError> {
        if !visiting.insert(name) {
            return Err(BridgeError::Config(format!(
                "schema '{name}' contains itself"
            )));
        }
        if let Some(schema) = self.schemas.get(name) {
            for field in &schema.fields {
                if let FieldKind::Nested(child) = &field.kind {
                    self.check_cycle(child, visiting)?;
                }
            }
        }
        visiting.remove(name);
        Ok(())
    }

    /// Build a [`Message`] of `schema` from a decoded payload.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::UnknownSymbol`] if `schema` (or a nested schema) is
    ///   not registered.
    /// * [`BridgeError::Decoding`] if `payload` is not an object or a field
    ///   holds a value of the wrong type.
    pub fn populate(&self, schema: &str, payload: &Value) -> Result<Message, BridgeError> {
        let spec = self.lookup(schema)?;
        let Value::Object(map) = payload else {
            return Err(BridgeError::Decoding(format!(
                "payload for {schema} must be an object, got {}",
                json_type(payload)
            )));
        };
        let fields = self.populate_fields(spec, map, "")?;
        Ok(Message::new(schema, fields))
    }

    /// A message of `schema` with every field at its zero value.
    pub fn zero_message(&self, schema: &str) -> Result<Message, BridgeError> {
        self.populate(schema, &Value::Object(Map::new()))
    }

    fn lookup(&self, schema: &str) -> Result<&MessageSchema, BridgeError> {
        self.schemas
            .get(schema)
            .ok_or_else(|| BridgeError::UnknownSymbol(schema.to_string()))
    }

    fn populate_fields(
        &self,
        schema: &MessageSchema,
        payload: &Map<String, Value>,
        prefix: &str,
    ) -> Result<Map<String, Value>, BridgeError> {
        let mut out = Map::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let path = join_path(prefix, &field.name);
            let value = match payload.get(&field.name) {
                Some(value) => self.convert(&field.kind, value, &path)?,
                None => self.zero_value(&field.kind)?,
            };
            out.insert(field.name.clone(), value);
        }
        Ok(out)
    }

    fn convert(&self, kind: &FieldKind, value: &Value, path: &str) -> Result<Value, BridgeError> {
        if value.is_null() {
            return self.zero_value(kind);
        }
        match (kind, value) {
            (FieldKind::Bool, Value::Bool(_)) | (FieldKind::Text, Value::String(_)) => {
                Ok(value.clone())
            }
            (FieldKind::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            (FieldKind::Float, Value::Number(n)) => Ok(n.as_f64().map_or(Value::Null, Value::from)),
            (FieldKind::Nested(name), Value::Object(map)) => {
                let nested = self.lookup(name)?;
                Ok(Value::Object(self.populate_fields(nested, map, path)?))
            }
            (FieldKind::Array(inner), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.convert(inner, item, &format!("{path}.{i}")))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err(BridgeError::Decoding(format!(
                "field '{path}' expects {kind}, got {}",
                json_type(value)
            ))),
        }
    }

    fn zero_value(&self, kind: &FieldKind) -> Result<Value, BridgeError> {
        Ok(match kind {
            FieldKind::Bool => Value::Bool(false),
            FieldKind::Int => Value::from(0),
            FieldKind::Float => Value::from(0.0),
            FieldKind::Text => Value::String(String::new()),
            FieldKind::Array(_) => Value::Array(Vec::new()),
            FieldKind::Nested(name) => {
                let nested = self.lookup(name)?;
                Value::Object(self.populate_fields(nested, &Map::new(), "")?)
            }
        })
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
