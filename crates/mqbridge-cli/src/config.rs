//! Bridge configuration – reads `mqbridge.toml`.
//!
//! ```toml
//! [broker]
//! private_path = "robots/r2"
//! codec = "json"            # or "msgpack"; used in both directions
//!
//! [supervisor]
//! shell = "/bin/bash"
//!
//! [[schema]]
//! name = "geometry_msgs/Point"
//! fields = [
//!     { name = "x", type = "float64" },
//!     { name = "y", type = "float64" },
//!     { name = "z", type = "float64" },
//! ]
//!
//! [[bridge]]
//! kind = "ros_to_mqtt"
//! schema = "geometry_msgs/Point"
//! topic_from = "/sensor"
//! topic_to = "sensor/raw"
//! frequency = 10.0
//!
//! [[transform]]
//! topic_from = "/tag_detections"
//! topic_to = "tags/ids"
//! encoder = { kind = "join", array = "detections", path = "id.0" }
//!
//! [[pipeline]]
//! name = "imagenet"
//! steps = ["roslaunch ros_deep_learning imagenet.ros1.launch {args}"]
//! allowed_args = ["width", "height"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use mqbridge_kernel::{PipelineTable, PipelineTemplate, DEFAULT_SHELL};
use mqbridge_middleware::{Codec, PrivatePath};
use mqbridge_runtime::{BridgeOptions, EncoderSpec, FilterSpec, TransformRegistry, DEFAULT_QUEUE_SIZE};
use mqbridge_types::{MessageSchema, SchemaRegistry};
use serde::{Deserialize, Serialize};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mqbridge.toml";

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerSection {
    /// Prefix substituted for a leading `~/` in broker topics.
    #[serde(default)]
    pub private_path: String,
    /// Wire format of broker payloads: decodes broker → bus deliveries and
    /// encodes bus → broker messages that have no `join`/`project` rule.
    #[serde(default)]
    pub codec: Codec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorSection {
    #[serde(default = "default_shell")]
    pub shell: String,
    /// How long shutdown waits for launches and workers.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// One `[[bridge]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(alias = "factory")]
    pub kind: String,
    #[serde(alias = "msg_type")]
    pub schema: String,
    pub topic_from: String,
    #[serde(default)]
    pub topic_to: String,
    /// Maximum forwarding rate in Hz; absent means unlimited.
    #[serde(default)]
    pub frequency: Option<f64>,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default)]
    pub filter: Option<FilterSpec>,
}

impl BridgeConfig {
    pub fn options(&self) -> BridgeOptions {
        BridgeOptions {
            queue_size: self.queue_size,
            filter: self.filter.clone(),
        }
    }
}

/// One `[[transform]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub topic_from: String,
    pub topic_to: String,
    pub encoder: EncoderSpec,
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default, rename = "schema")]
    pub schemas: Vec<MessageSchema>,
    #[serde(default, rename = "bridge")]
    pub bridges: Vec<BridgeConfig>,
    #[serde(default, rename = "transform")]
    pub transforms: Vec<TransformConfig>,
    #[serde(default, rename = "pipeline")]
    pub pipelines: Vec<PipelineTemplate>,
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}
fn default_shutdown_timeout_secs() -> u64 {
    5
}
fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the config file: the explicit path if given, else
/// [`DEFAULT_CONFIG_FILE`].
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load, parse and env-override the config at `path`.
pub fn load_from(path: &Path) -> Result<Config, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg = parse(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

pub fn parse(raw: &str) -> Result<Config, String> {
    toml::from_str(raw).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `MQBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MQBRIDGE_CODEC` | `broker.codec` (ignored when not a known codec) |
/// | `MQBRIDGE_PRIVATE_PATH` | `broker.private_path` |
/// | `MQBRIDGE_SHELL` | `supervisor.shell` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// [`apply_env_overrides`] with the variables read through `lookup`.
fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("MQBRIDGE_CODEC")
        && let Ok(codec) = v.parse::<Codec>()
    {
        cfg.broker.codec = codec;
    }
    if let Some(v) = lookup("MQBRIDGE_PRIVATE_PATH") {
        cfg.broker.private_path = v;
    }
    if let Some(v) = lookup("MQBRIDGE_SHELL") {
        cfg.supervisor.shell = v;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup tables
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    pub fn private_path(&self) -> PrivatePath {
        PrivatePath::new(self.broker.private_path.clone())
    }

    /// Every `[[schema]]`, with nested references checked.
    pub fn schema_registry(&self) -> Result<SchemaRegistry, String> {
        let mut registry = SchemaRegistry::new();
        for schema in &self.schemas {
            if registry.contains(&schema.name) {
                return Err(format!("Schema '{}' is defined twice", schema.name));
            }
            registry.register(schema.clone());
        }
        registry
            .validate()
            .map_err(|e| format!("Invalid schemas: {}", e))?;
        Ok(registry)
    }

    pub fn pipeline_table(&self) -> Result<PipelineTable, String> {
        let mut table = PipelineTable::new();
        for template in &self.pipelines {
            table
                .register(template.clone())
                .map_err(|e| format!("Invalid pipeline '{}': {}", template.name, e))?;
        }
        Ok(table)
    }

    pub fn transform_registry(&self) -> TransformRegistry {
        let mut registry = TransformRegistry::new();
        for rule in &self.transforms {
            registry.register(
                rule.topic_from.clone(),
                rule.topic_to.clone(),
                rule.encoder.build(self.broker.codec),
            );
        }
        registry
    }
}
