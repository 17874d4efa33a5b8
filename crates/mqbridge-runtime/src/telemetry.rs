//! Tracing initialisation for the bridge process.
//!
//! Call [`init_tracing`] once at startup.  Bridges log lifecycle events at
//! `info`, suppressed forward failures at `debug` and dropped reverse
//! deliveries or failed launches at `warn`; this module decides where those
//! events go.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | `EnvFilter` directives; `info` when unset or invalid. |
//! | `MQBRIDGE_LOG_FORMAT` | `json` for one JSON object per line, otherwise compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Collector base URL; spans are exported over OTLP/HTTP when present. |
//!
//! ```rust,no_run
//! let _telemetry = mqbridge_runtime::telemetry::init_tracing("mqbridge");
//! // … run bridges; spans are flushed when `_telemetry` drops.
//! ```

use std::str::FromStr;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the console log format.
pub const LOG_FORMAT_ENV: &str = "MQBRIDGE_LOG_FORMAT";

/// Environment variable naming the OTLP collector.
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

// ─────────────────────────────────────────────────────────────────────────────
// Log format
// ─────────────────────────────────────────────────────────────────────────────

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    /// Newline-delimited JSON, one object per event.
    Json,
}

impl LogFormat {
    /// Format named by `MQBRIDGE_LOG_FORMAT`; unset or unrecognised values
    /// fall back to compact output.
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected compact or json)")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// [`init_tracing_with`] using the format named by `MQBRIDGE_LOG_FORMAT`.
pub fn init_tracing(service_name: &str) -> TelemetryGuard {
    init_tracing_with(service_name, LogFormat::from_env())
}

/// Install the process-wide subscriber: an `EnvFilter`, one console layer in
/// `format`, and an OpenTelemetry layer when a collector is configured.
///
/// Keep the returned guard alive until exit.  Panics if a global subscriber
/// is already installed.
pub fn init_tracing_with(service_name: &str, format: LogFormat) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = otlp_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("mqbridge")));

    // Exactly one of the two console layers is present.
    let (json_layer, compact_layer) = match format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Compact => (None, Some(tracing_subscriber::fmt::layer().compact())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .init();

    TelemetryGuard { provider }
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the OTLP provider, if one was built, and shuts it down on drop.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported to a collector.
    pub fn exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[mqbridge] span export shutdown failed: {e}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `None` without a collector endpoint, or when the exporter cannot be built
/// (reported on stderr; the subscriber is not up yet).
fn otlp_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var(OTLP_ENDPOINT_ENV).ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[mqbridge] OTLP exporter unavailable, spans stay local: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Synchronous export: the CLI builds its Tokio runtime after
            // calling `init_tracing`, so a batch exporter has nowhere to run.
            .with_simple_exporter(exporter)
            .build(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
