//! [`TransformRegistry`] – per topic-pair payload encoding.
//!
//! A rule maps `(topic_from, topic_to)` to a [`PayloadEncoder`].  Pairs
//! without a rule use the default [`StructuredEncoder`], which writes the
//! message's field map in the broker [`Codec`] (the same codec the reverse
//! direction decodes with).  Rules are registered at startup and the table
//! is read-only once shared behind an `Arc`.
//!
//! Deployment-specific payload shaping is expressed as data
//! ([`EncoderSpec`]) rather than as conditionals in the forwarding path:
//!
//! | `kind` | Output |
//! |---|---|
//! | `structured` | map of every field in the broker codec (the default) |
//! | `join` | one path per array element, rendered and joined, e.g. `"3,7"` |
//! | `project` | JSON array, one object per array element, whatever the codec |
//!
//! # Example
//!
//! ```
//! use mqbridge_middleware::Codec;
//! use mqbridge_runtime::transform::{EncoderSpec, TransformRegistry};
//!
//! let mut registry = TransformRegistry::new();
//! let spec: EncoderSpec = serde_json::from_str(
//!     r#"{ "kind": "join", "array": "detections", "path": "id.0" }"#,
//! ).unwrap();
//! registry.register("/tag_detections", "tags/ids", spec.build(Codec::Json));
//! assert_eq!(registry.len(), 1);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use mqbridge_middleware::Codec;
use mqbridge_types::{value_at, BridgeError, Message};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ────────────────────────────────────────────────────────────────────────────
// Encoders
// ────────────────────────────────────────────────────────────────────────────

/// Turns a structured message into a broker payload.
pub trait PayloadEncoder: Send + Sync {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, BridgeError>;
}

/// Default rule: the message's fields as one map, written in `codec`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredEncoder {
    codec: Codec,
}

impl StructuredEncoder {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }
}

impl PayloadEncoder for StructuredEncoder {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, BridgeError> {
        self.codec.encode(&Value::Object(message.fields.clone()))
    }
}

/// Renders one path of every element of an array field and joins the
/// results.
///
/// With `paired_with` set, each element renders as `<path>:<paired_with>`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinEncoder {
    pub array: String,
    pub path: String,
    pub paired_with: Option<String>,
    pub separator: String,
    pub precision: Option<usize>,
}

impl JoinEncoder {
    fn render(&self, element: &Value, path: &str) -> Result<String, BridgeError> {
        let value = value_at(element, path).ok_or_else(|| {
            BridgeError::Encoding(format!("'{}' elements have no '{path}'", self.array))
        })?;
        Ok(render_scalar(value, self.precision))
    }
}

impl PayloadEncoder for JoinEncoder {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, BridgeError> {
        let parts = array_field(message, &self.array)?
            .iter()
            .map(|element| {
                let head = self.render(element, &self.path)?;
                match &self.paired_with {
                    Some(pair) => Ok(format!("{head}:{}", self.render(element, pair)?)),
                    None => Ok(head),
                }
            })
            .collect::<Result<Vec<_>, BridgeError>>()?;
        Ok(parts.join(&self.separator).into_bytes())
    }
}

/// Emits a JSON array with one object per element of an array field.
///
/// Each output key is bound to a source path inside the element; dotted
/// output keys build nested objects.  Missing sources become `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionEncoder {
    pub array: String,
    pub fields: BTreeMap<String, String>,
}

impl PayloadEncoder for ProjectionEncoder {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, BridgeError> {
        let rows: Vec<Value> = array_field(message, &self.array)?
            .iter()
            .map(|element| {
                let mut row = Map::new();
                for (key, source) in &self.fields {
                    let value = value_at(element, source).cloned().unwrap_or(Value::Null);
                    insert_dotted(&mut row, key, value);
                }
                Value::Object(row)
            })
            .collect();
        serde_json::to_vec(&rows).map_err(|e| BridgeError::Encoding(e.to_string()))
    }
}

fn array_field<'a>(message: &'a Message, path: &str) -> Result<&'a [Value], BridgeError> {
    match message.lookup(path) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(BridgeError::Encoding(format!("field '{path}' is not an array"))),
        None => Err(BridgeError::Encoding(format!(
            "{} has no field '{path}'",
            message.schema
        ))),
    }
}

fn render_scalar(value: &Value, precision: Option<usize>) -> String {
    match (value, precision) {
        (Value::String(s), _) => s.clone(),
        (Value::Number(n), Some(p)) if !(n.is_i64() || n.is_u64()) => match n.as_f64() {
            Some(f) => format!("{f:.p$}"),
            None => n.to_string(),
        },
        (other, _) => other.to_string(),
    }
}

fn insert_dotted(target: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => {
            target.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_dotted(map, rest, value);
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

fn default_separator() -> String {
    ",".to_string()
}

/// Encoder description as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncoderSpec {
    Structured,
    Join {
        array: String,
        path: String,
        #[serde(default)]
        paired_with: Option<String>,
        #[serde(default = "default_separator")]
        separator: String,
        #[serde(default)]
        precision: Option<usize>,
    },
    Project {
        array: String,
        fields: BTreeMap<String, String>,
    },
}

impl EncoderSpec {
    /// `codec` only applies to `structured`; `join` and `project` define
    /// their own text shapes.
    pub fn build(&self, codec: Codec) -> Arc<dyn PayloadEncoder> {
        match self {
            EncoderSpec::Structured => Arc::new(StructuredEncoder::new(codec)),
            EncoderSpec::Join {
                array,
                path,
                paired_with,
                separator,
                precision,
            } => Arc::new(JoinEncoder {
                array: array.clone(),
                path: path.clone(),
                paired_with: paired_with.clone(),
                separator: separator.clone(),
                precision: *precision,
            }),
            EncoderSpec::Project { array, fields } => Arc::new(ProjectionEncoder {
                array: array.clone(),
                fields: fields.clone(),
            }),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

/// `(topic_from, topic_to)` → encoder, with a structured default.
pub struct TransformRegistry {
    rules: HashMap<(String, String), Arc<dyn PayloadEncoder>>,
}

impl TransformRegistry {
    /// A registry holding only the default rule.
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Add (or replace) the rule for one topic pair.
    pub fn register(
        &mut self,
        topic_from: impl Into<String>,
        topic_to: impl Into<String>,
        encoder: Arc<dyn PayloadEncoder>,
    ) {
        self.rules
            .insert((topic_from.into(), topic_to.into()), encoder);
    }

    /// Encoder for the pair, falling back to a [`StructuredEncoder`] in
    /// `codec`.
    pub fn resolve(&self, topic_from: &str, topic_to: &str, codec: Codec) -> Arc<dyn PayloadEncoder> {
        match self.rules.get(&(topic_from.to_string(), topic_to.to_string())) {
            Some(rule) => Arc::clone(rule),
            None => Arc::new(StructuredEncoder::new(codec)),
        }
    }

    pub fn has_rule(&self, topic_from: &str, topic_to: &str) -> bool {
        self.rules
            .contains_key(&(topic_from.to_string(), topic_to.to_string()))
    }

    /// Number of registered rules, not counting the default.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<_> = self.rules.keys().collect();
        pairs.sort();
        f.debug_struct("TransformRegistry")
            .field("rules", &pairs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(schema: &str, fields: Value) -> Message {
        let Value::Object(fields) = fields else {
            unreachable!("test fixtures are objects")
        };
        Message::new(schema, fields)
    }

    fn tag_detections() -> Message {
        message(
            "apriltag_ros/AprilTagDetectionArray",
            json!({
                "detections": [
                    { "id": [3], "size": [0.162],
                      "pose": { "pose": { "pose": { "position": { "x": 0.5, "y": -0.25, "z": 1.0 } } } } },
                    { "id": [7], "size": [0.162],
                      "pose": { "pose": { "pose": { "position": { "x": 1.126, "y": 0.0, "z": 2.0 } } } } }
                ]
            }),
        )
    }

    #[test]
    fn default_encoding_round_trips_fields() {
        let msg = message(
            "geometry_msgs/PoseStamped",
            json!({
                "header": { "seq": 4, "frame_id": "map" },
                "pose": { "position": { "x": 1.5, "y": -2.0, "z": 0.0 } },
                "tags": ["a", "b"],
                "valid": true
            }),
        );
        let registry = TransformRegistry::new();
        let payload = registry.resolve("/pose", "robot/pose", Codec::Json).encode(&msg).unwrap();

        let decoded: Map<String, Value> = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded, msg.fields);
    }

    #[test]
    fn default_rule_writes_in_the_broker_codec() {
        let msg = tag_detections();
        let registry = TransformRegistry::new();

        let packed = registry
            .resolve("/tag_detections", "tags/raw", Codec::MessagePack)
            .encode(&msg)
            .unwrap();
        assert_ne!(packed.first(), Some(&b'{'));
        let decoded = Codec::MessagePack.decode(&packed).unwrap();
        assert_eq!(decoded, Value::Object(msg.fields.clone()));

        // An explicit `structured` rule follows the codec too.
        let explicit = EncoderSpec::Structured.build(Codec::MessagePack);
        assert_eq!(explicit.encode(&msg).unwrap(), packed);
    }

    #[test]
    fn registered_rule_wins_only_for_its_pair() {
        let mut registry = TransformRegistry::new();
        let spec = EncoderSpec::Join {
            array: "detections".to_string(),
            path: "id.0".to_string(),
            paired_with: None,
            separator: default_separator(),
            precision: None,
        };
        registry.register("/tag_detections", "tags/ids", spec.build(Codec::Json));

        let msg = tag_detections();
        let joined = registry.resolve("/tag_detections", "tags/ids", Codec::Json).encode(&msg).unwrap();
        assert_eq!(joined, b"3,7");

        // Same source, different sink: default rule.
        assert!(!registry.has_rule("/tag_detections", "tags/raw"));
        let raw = registry.resolve("/tag_detections", "tags/raw", Codec::Json).encode(&msg).unwrap();
        assert!(raw.starts_with(b"{"));
    }

    #[test]
    fn join_renders_pairs_with_precision() {
        let encoder = EncoderSpec::Join {
            array: "detections".to_string(),
            path: "pose.pose.pose.position.x".to_string(),
            paired_with: Some("pose.pose.pose.position.z".to_string()),
            separator: ";".to_string(),
            precision: Some(2),
        }
        .build(Codec::Json);
        let out = encoder.encode(&tag_detections()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0.50:1.00;1.13:2.00");
    }

    #[test]
    fn join_over_empty_array_is_empty_payload() {
        let encoder = EncoderSpec::Join {
            array: "detections".to_string(),
            path: "id.0".to_string(),
            paired_with: None,
            separator: default_separator(),
            precision: None,
        }
        .build(Codec::Json);
        let msg = message("apriltag_ros/AprilTagDetectionArray", json!({ "detections": [] }));
        assert!(encoder.encode(&msg).unwrap().is_empty());
    }

    #[test]
    fn projection_builds_nested_rows() {
        let fields = BTreeMap::from([
            ("id".to_string(), "id.0".to_string()),
            ("position.x".to_string(), "pose.pose.pose.position.x".to_string()),
            ("position.y".to_string(), "pose.pose.pose.position.y".to_string()),
            ("missing".to_string(), "nope".to_string()),
        ]);
        let encoder = EncoderSpec::Project {
            array: "detections".to_string(),
            fields,
        }
        .build(Codec::Json);

        let out: Value = serde_json::from_slice(&encoder.encode(&tag_detections()).unwrap()).unwrap();
        assert_eq!(
            out,
            json!([
                { "id": 3, "position": { "x": 0.5, "y": -0.25 }, "missing": null },
                { "id": 7, "position": { "x": 1.126, "y": 0.0 }, "missing": null }
            ])
        );
    }

    #[test]
    fn encoders_report_missing_or_scalar_arrays() {
        let encoder = EncoderSpec::Join {
            array: "detections".to_string(),
            path: "id".to_string(),
            paired_with: None,
            separator: default_separator(),
            precision: None,
        }
        .build(Codec::Json);

        let missing = message("std_msgs/Empty", json!({}));
        assert!(matches!(encoder.encode(&missing), Err(BridgeError::Encoding(_))));

        let scalar = message("std_msgs/Int32", json!({ "detections": 5 }));
        assert!(matches!(encoder.encode(&scalar), Err(BridgeError::Encoding(_))));

        let no_path = message("x/Y", json!({ "detections": [{ "other": 1 }] }));
        assert!(matches!(encoder.encode(&no_path), Err(BridgeError::Encoding(_))));
    }

    #[test]
    fn encoder_spec_deserializes_with_defaults() {
        let spec: EncoderSpec =
            serde_json::from_str(r#"{ "kind": "join", "array": "detections", "path": "id.0" }"#)
                .unwrap();
        assert_eq!(
            spec,
            EncoderSpec::Join {
                array: "detections".to_string(),
                path: "id.0".to_string(),
                paired_with: None,
                separator: ",".to_string(),
                precision: None,
            }
        );

        let spec: EncoderSpec = serde_json::from_str(r#"{ "kind": "structured" }"#).unwrap();
        assert_eq!(spec, EncoderSpec::Structured);

        assert!(serde_json::from_str::<EncoderSpec>(r#"{ "kind": "yaml" }"#).is_err());
    }
}
