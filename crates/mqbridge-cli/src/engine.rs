//! Wiring: configuration → schemas, pipelines, transforms → connected bridges.

use std::sync::Arc;
use std::time::Duration;

use mqbridge_kernel::ProcessSupervisor;
use mqbridge_middleware::{LocalBroker, LocalTopicBus};
use mqbridge_runtime::{Bridge, BridgeContext, BridgeFactory};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::config::Config;

/// Every bridge of one configuration, connected to in-process buses.
pub struct Engine {
    pub bus: LocalTopicBus,
    pub broker: LocalBroker,
    pub supervisor: Arc<ProcessSupervisor>,
    pub bridges: Vec<Bridge>,
    shutdown_timeout: Duration,
}

impl Engine {
    /// Build the startup tables and connect every `[[bridge]]`.
    ///
    /// Must run inside a Tokio runtime context: bridges subscribe on
    /// construction.
    pub fn start(cfg: &Config) -> Result<Self, String> {
        let schemas = Arc::new(cfg.schema_registry()?);
        let supervisor = Arc::new(supervisor(cfg)?);
        let bus = LocalTopicBus::default();
        let broker = LocalBroker::default();

        let context = BridgeContext::new(
            Arc::new(bus.clone()),
            Arc::new(broker.clone()),
            schemas,
            Arc::clone(&supervisor),
        )
        .with_transforms(Arc::new(cfg.transform_registry()))
        .with_private_path(cfg.private_path())
        .with_codec(cfg.broker.codec);
        let factory = BridgeFactory::with_context(context);

        let bridges = cfg
            .bridges
            .iter()
            .enumerate()
            .map(|(i, b)| {
                factory
                    .create_bridge(
                        &b.kind,
                        &b.schema,
                        &b.topic_from,
                        &b.topic_to,
                        b.frequency,
                        &b.options(),
                    )
                    .map_err(|e| format!("Bridge #{} ({}): {}", i + 1, b.topic_from, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(bridges = bridges.len(), "engine started");

        Ok(Self {
            bus,
            broker,
            supervisor,
            bridges,
            shutdown_timeout: Duration::from_secs(cfg.supervisor.shutdown_timeout_secs),
        })
    }

    /// Kill every launched process group; returns how many were signalled.
    pub fn shutdown(&self) -> usize {
        self.supervisor.shutdown(self.shutdown_timeout)
    }
}

/// The configured pipelines behind the configured shell.
pub fn supervisor(cfg: &Config) -> Result<ProcessSupervisor, String> {
    Ok(ProcessSupervisor::with_shell(
        cfg.pipeline_table()?,
        cfg.supervisor.shell.clone(),
    ))
}

/// Feed every item on `rx` to `on_item` until the channel closes.
///
/// A receiver that falls behind skips the overwritten items and keeps going.
pub async fn observe<T: Clone>(
    topic: &str,
    mut rx: broadcast::Receiver<T>,
    mut on_item: impl FnMut(T),
) {
    loop {
        match rx.recv().await {
            Ok(item) => on_item(item),
            Err(RecvError::Lagged(n)) => warn!(topic, skipped = n, "observer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse;
    use mqbridge_middleware::{BrokerClient, TopicBus};
    use mqbridge_runtime::BridgeKind;
    use mqbridge_types::Message;
    use serde_json::{json, Value};

    const CONFIG: &str = r#"
[supervisor]
shell = "/bin/sh"
shutdown_timeout_secs = 2

[[schema]]
name = "geometry_msgs/Point"
fields = [
    { name = "x", type = "float64" },
    { name = "y", type = "float64" },
    { name = "z", type = "float64" },
]

[[schema]]
name = "std_msgs/String"
fields = [{ name = "data", type = "string" }]

[[bridge]]
kind = "ros_to_mqtt"
schema = "geometry_msgs/Point"
topic_from = "/sensor"
topic_to = "sensor/raw"

[[bridge]]
kind = "mqtt_to_ros"
schema = "std_msgs/String"
topic_from = "control"

[[pipeline]]
name = "idle"
steps = ["sleep 30"]
"#;

    fn point(x: f64) -> Message {
        let Value::Object(fields) = json!({ "x": x, "y": 0.0, "z": 0.0 }) else {
            unreachable!()
        };
        Message::new("geometry_msgs/Point", fields)
    }

    #[tokio::test]
    async fn engine_connects_every_bridge() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Engine::start(&parse(CONFIG)?)?;
        let kinds: Vec<_> = engine.bridges.iter().map(Bridge::kind).collect();
        assert_eq!(kinds, vec![BridgeKind::RosToMqtt, BridgeKind::MqttToRos]);

        let mut rx = engine.broker.receiver("sensor/raw")?;
        engine.bus.publish("/sensor", point(1.5))?;
        let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await??;
        let fields: Value = serde_json::from_slice(&delivered.payload)?;
        assert_eq!(fields["x"], json!(1.5));
        Ok(())
    }

    #[tokio::test]
    async fn bad_bridge_reports_its_position() -> Result<(), Box<dyn std::error::Error>> {
        let mut cfg = parse(CONFIG)?;
        cfg.bridges[1].schema = "sensor_msgs/Imu".to_string();
        let err = Engine::start(&cfg).err().ok_or("expected failure")?;
        assert!(err.starts_with("Bridge #2 (control)"), "{err}");
        assert!(err.contains("sensor_msgs/Imu"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn observer_survives_lag() {
        let (tx, rx) = broadcast::channel(2);
        for i in 0..5 {
            tx.send(i).unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        observe("burst", rx, |i| seen.push(i)).await;
        // 0..=2 were overwritten; the newest two still arrive.
        assert_eq!(seen, vec![3, 4]);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn control_start_then_shutdown_kills_pipeline() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Engine::start(&parse(CONFIG)?)?;

        engine.broker.publish("control", b"start|idle")?;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while engine.supervisor.records().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "pipeline never launched");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(engine.shutdown(), 1);
        assert!(engine.supervisor.records().is_empty());
        Ok(())
    }
}
