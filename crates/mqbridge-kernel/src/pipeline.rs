//! Pipeline templates launched by the control channel.
//!
//! A pipeline is an ordered list of steps.  Each step is either a shell
//! command or a `sleep:<seconds>` barrier.  Command steps may contain an
//! `{args}` placeholder, which is replaced by the control message's
//! arguments rendered as `key:=value` pairs.
//!
//! Only argument names listed in the template's `allowed_args` are rendered,
//! and only when their value is made of `[A-Za-z0-9._/:@+-]`.  Everything
//! else is dropped with a warning, so a control message can never inject
//! shell syntax into a command line.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use mqbridge_types::BridgeError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Placeholder replaced by the rendered control arguments.
pub const ARGS_PLACEHOLDER: &str = "{args}";

const SLEEP_PREFIX: &str = "sleep:";

/// One executable step of a resolved pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStep {
    /// Shell command, launched in its own process group.
    Command(String),
    /// Block the control thread before the next step.
    Sleep(Duration),
}

impl FromStr for PipelineStep {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(seconds) = s.strip_prefix(SLEEP_PREFIX) {
            let seconds: f64 = seconds.trim().parse().map_err(|_| {
                BridgeError::Config(format!("invalid sleep step '{s}'"))
            })?;
            return Duration::try_from_secs_f64(seconds)
                .map(PipelineStep::Sleep)
                .map_err(|e| BridgeError::Config(format!("invalid sleep step '{s}': {e}")));
        }
        if s.is_empty() {
            return Err(BridgeError::Config("empty pipeline step".to_string()));
        }
        Ok(PipelineStep::Command(s.to_string()))
    }
}

/// Configured pipeline, as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTemplate {
    pub name: String,
    pub steps: Vec<String>,
    /// Argument names a control message may pass to `{args}`.
    #[serde(default)]
    pub allowed_args: Vec<String>,
}

#[derive(Debug, Clone)]
struct CompiledPipeline {
    steps: Vec<PipelineStep>,
    allowed_args: Vec<String>,
}

/// Startup-time table of pipelines, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PipelineTable {
    pipelines: HashMap<String, CompiledPipeline>,
}

impl PipelineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and register `template`, replacing any pipeline of the same
    /// name.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] for a blank name, an empty step list or a
    /// malformed step.
    pub fn register(&mut self, template: PipelineTemplate) -> Result<(), BridgeError> {
        let name = template.name.trim();
        if name.is_empty() {
            return Err(BridgeError::Config("pipeline name must not be empty".to_string()));
        }
        if template.steps.is_empty() {
            return Err(BridgeError::Config(format!("pipeline '{name}' has no steps")));
        }
        let steps = template
            .steps
            .iter()
            .map(|step| step.parse())
            .collect::<Result<Vec<PipelineStep>, _>>()?;
        self.pipelines.insert(
            name.to_string(),
            CompiledPipeline {
                steps,
                allowed_args: template.allowed_args,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipelines.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    /// Resolve `name` into concrete steps with `args` substituted.
    ///
    /// Returns `None` for unknown pipelines.
    pub fn resolve(&self, name: &str, args: &[(String, String)]) -> Option<Vec<PipelineStep>> {
        let pipeline = self.pipelines.get(name)?;
        let rendered = render_args(name, &pipeline.allowed_args, args);
        Some(
            pipeline
                .steps
                .iter()
                .map(|step| match step {
                    PipelineStep::Command(cmd) if cmd.contains(ARGS_PLACEHOLDER) => {
                        PipelineStep::Command(
                            cmd.replace(ARGS_PLACEHOLDER, &rendered).trim_end().to_string(),
                        )
                    }
                    other => other.clone(),
                })
                .collect(),
        )
    }
}

fn render_args(pipeline: &str, allowed: &[String], args: &[(String, String)]) -> String {
    args.iter()
        .filter(|(key, value)| {
            if !allowed.iter().any(|a| a == key) {
                warn!(pipeline, key = %key, "dropping control argument not in allow-list");
                false
            } else if !is_safe_value(value) {
                warn!(pipeline, key = %key, "dropping control argument with unsafe value");
                false
            } else {
                true
            }
        })
        .map(|(key, value)| format!("{key}:={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_safe_value(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._/:@+-".contains(c))
}
