//! In-process buses, a simulated OS and canned schemas for bridge tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use mqbridge_kernel::{
    GroupSignaler, Launcher, PipelineTable, PipelineTemplate, ProcessSupervisor, RunningProcess,
};
use mqbridge_middleware::{LocalBroker, LocalTopicBus};
use mqbridge_types::{BridgeError, FieldKind, Message, MessageSchema, SchemaRegistry};
use serde_json::{json, Value};

use crate::context::BridgeContext;

/// Launched processes run until their group is signalled.
#[derive(Default)]
pub struct FakeOs {
    next_pgid: AtomicI32,
    alive: Mutex<HashMap<i32, mpsc::Sender<()>>>,
    signalled: Mutex<Vec<i32>>,
}

impl FakeOs {
    pub fn signalled(&self) -> Vec<i32> {
        self.signalled.lock().unwrap().clone()
    }
}

struct FakeProcess {
    pgid: i32,
    exited: mpsc::Receiver<()>,
}

impl RunningProcess for FakeProcess {
    fn pgid(&self) -> i32 {
        self.pgid
    }

    fn wait(&mut self) -> Result<Option<i32>, BridgeError> {
        let _ = self.exited.recv();
        Ok(None)
    }
}

struct FakeLauncher(Arc<FakeOs>);

impl Launcher for FakeLauncher {
    fn launch(&self, _command: &str) -> Result<Box<dyn RunningProcess>, BridgeError> {
        let pgid = 2000 + self.0.next_pgid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        self.0.alive.lock().unwrap().insert(pgid, tx);
        Ok(Box::new(FakeProcess { pgid, exited: rx }))
    }
}

struct FakeSignaler(Arc<FakeOs>);

impl GroupSignaler for FakeSignaler {
    fn terminate(&self, pgid: i32) -> Result<(), BridgeError> {
        self.0.signalled.lock().unwrap().push(pgid);
        if let Some(tx) = self.0.alive.lock().unwrap().remove(&pgid) {
            let _ = tx.send(());
        }
        Ok(())
    }
}

pub fn schemas() -> SchemaRegistry {
    let mut schemas = SchemaRegistry::new();
    schemas.register(
        MessageSchema::new("geometry_msgs/Point")
            .with_field("x", FieldKind::Float)
            .with_field("y", FieldKind::Float)
            .with_field("z", FieldKind::Float),
    );
    schemas.register(MessageSchema::new("std_msgs/String").with_field("data", FieldKind::Text));
    schemas
}

pub fn point(x: f64) -> Message {
    let Value::Object(fields) = json!({ "x": x, "y": 0.0, "z": 0.0 }) else {
        unreachable!()
    };
    Message::new("geometry_msgs/Point", fields)
}

pub struct Harness {
    pub bus: LocalTopicBus,
    pub broker: LocalBroker,
    pub os: Arc<FakeOs>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub schemas: Arc<SchemaRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        let mut pipelines = PipelineTable::new();
        pipelines
            .register(PipelineTemplate {
                name: "imagenet".to_string(),
                steps: vec!["launch imagenet {args}".to_string()],
                allowed_args: vec!["width".to_string()],
            })
            .unwrap();
        let os = Arc::new(FakeOs::default());
        let supervisor = Arc::new(ProcessSupervisor::new(
            pipelines,
            Arc::new(FakeLauncher(Arc::clone(&os))),
            Arc::new(FakeSignaler(Arc::clone(&os))),
        ));
        Self {
            bus: LocalTopicBus::default(),
            broker: LocalBroker::default(),
            os,
            supervisor,
            schemas: Arc::new(schemas()),
        }
    }

    pub fn context(&self) -> BridgeContext {
        BridgeContext::new(
            Arc::new(self.bus.clone()),
            Arc::new(self.broker.clone()),
            Arc::clone(&self.schemas),
            Arc::clone(&self.supervisor),
        )
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        // Release fake processes so launch workers can exit.
        self.supervisor.stop();
    }
}

pub fn context() -> BridgeContext {
    Harness::new().context()
}
