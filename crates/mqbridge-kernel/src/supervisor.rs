//! [`ProcessSupervisor`] – lifecycle of processes launched from the control
//! channel.
//!
//! The supervisor owns the only mutable process state in the bridge: a
//! mutex-guarded registry of [`ProcessRecord`]s.  Its mutation entry points
//! are [`start`][ProcessSupervisor::start] and
//! [`stop`][ProcessSupervisor::stop]; launch workers insert and remove their
//! own record under the same mutex.
//!
//! # Start
//!
//! Steps run in order on the caller's thread.  A `sleep` step blocks the
//! caller (never while holding the registry mutex).  A command step is handed
//! to a tracked worker thread which launches it, records its process group,
//! waits for it to exit and then drops the record.
//!
//! # Stop
//!
//! Every process group present in the registry when `stop` takes it is
//! signalled exactly once, and the registry is empty before `stop` returns.
//! A launch racing with `stop` may land after the registry was taken; it
//! stays tracked for the next `stop`.
//!
//! # Shutdown
//!
//! [`shutdown`][ProcessSupervisor::shutdown] is final.  It latches the
//! supervisor before stopping: a `start` still sleeping between steps returns
//! without running the rest of its pipeline, later `start`s are refused, and a
//! launch that completes afterwards is signalled at once instead of being
//! recorded.
//!
//! # State
//!
//! ```text
//! Idle ──start──▶ Running ──stop──▶ Stopping ──▶ Idle
//!                   ▲  │
//!                   └──┘ start (more groups)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mqbridge_types::{ControlCommand, ControlVerb};
use tracing::{debug, info, warn};

use crate::pipeline::{PipelineStep, PipelineTable};
use crate::process::{GroupSignaler, Launcher};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// One launched and still-tracked process group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pgid: i32,
    pub command: String,
    pub launched_at: DateTime<Utc>,
}

/// Observable lifecycle state of a [`ProcessSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Nothing tracked.
    Idle,
    /// At least one process group tracked.
    Running,
    /// A `stop` is signalling process groups.
    Stopping,
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    records: Vec<ProcessRecord>,
    stops_in_flight: usize,
    shutting_down: bool,
}

struct Shared {
    registry: Mutex<Registry>,
    pending_launches: Mutex<usize>,
    launches_settled: Condvar,
    launch_failures: AtomicU64,
    launcher: Arc<dyn Launcher>,
    signaler: Arc<dyn GroupSignaler>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn shutting_down(&self) -> bool {
        self.registry().shutting_down
    }

    fn begin_launch(&self) {
        *self
            .pending_launches
            .lock()
            .unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn finish_launch(&self) {
        let mut pending = self
            .pending_launches
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.launches_settled.notify_all();
        }
    }

    /// Body of a launch worker.
    fn run_command(&self, command: String) {
        let mut process = match self.launcher.launch(&command) {
            Ok(process) => process,
            Err(e) => {
                self.launch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(command = %command, error = %e, "launch failed");
                self.finish_launch();
                return;
            }
        };
        let pgid = process.pgid();
        let recorded = {
            let mut registry = self.registry();
            let accepting = !registry.shutting_down;
            if accepting {
                registry.records.push(ProcessRecord {
                    pgid,
                    command: command.clone(),
                    launched_at: Utc::now(),
                });
            }
            accepting
        };
        if recorded {
            info!(pgid, command = %command, "process group launched");
        } else {
            warn!(pgid, command = %command, "launched during shutdown; terminating");
            if let Err(e) = self.signaler.terminate(pgid) {
                warn!(pgid, error = %e, "failed to signal process group");
            }
        }
        // Settled only once the group is either tracked or signalled.
        self.finish_launch();

        let status = process.wait();
        let still_tracked = {
            let mut registry = self.registry();
            let before = registry.records.len();
            registry.records.retain(|r| r.pgid != pgid);
            registry.records.len() != before
        };
        match status {
            Ok(code) => info!(pgid, ?code, still_tracked, "process group exited"),
            Err(e) => warn!(pgid, error = %e, "lost track of process group"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ProcessSupervisor
// ────────────────────────────────────────────────────────────────────────────

/// Launches configured pipelines and terminates them on request.
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
    pipelines: PipelineTable,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessSupervisor {
    pub fn new(
        pipelines: PipelineTable,
        launcher: Arc<dyn Launcher>,
        signaler: Arc<dyn GroupSignaler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                pending_launches: Mutex::new(0),
                launches_settled: Condvar::new(),
                launch_failures: AtomicU64::new(0),
                launcher,
                signaler,
            }),
            pipelines,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Supervisor running commands through `shell` and stopping them with
    /// `SIGTERM`.
    #[cfg(unix)]
    pub fn with_shell(pipelines: PipelineTable, shell: impl Into<std::path::PathBuf>) -> Self {
        Self::new(
            pipelines,
            Arc::new(crate::process::ShellLauncher::new(shell)),
            Arc::new(crate::process::SigtermSignaler),
        )
    }

    pub fn pipelines(&self) -> &PipelineTable {
        &self.pipelines
    }

    /// Execute a parsed control command.
    ///
    /// Returns the number of commands dispatched (`start`) or process groups
    /// signalled (`stop`).
    pub fn handle(&self, command: &ControlCommand) -> usize {
        match command.verb {
            ControlVerb::Start => match &command.pipeline {
                Some(pipeline) => self.start(pipeline, &command.args),
                None => {
                    warn!("start without a pipeline name; ignoring");
                    0
                }
            },
            ControlVerb::Stop => self.stop(),
        }
    }

    /// Run the steps of `pipeline` in order.
    ///
    /// Blocks for the total duration of the pipeline's sleep steps.  Unknown
    /// pipelines are a no-op.  Returns the number of command steps handed to
    /// launch workers; steps not yet reached when shutdown begins are skipped.
    pub fn start(&self, pipeline: &str, args: &[(String, String)]) -> usize {
        let Some(steps) = self.pipelines.resolve(pipeline, args) else {
            info!(pipeline, "unknown pipeline; ignoring start");
            return 0;
        };

        let mut dispatched = 0;
        for step in steps {
            if self.shared.shutting_down() {
                warn!(pipeline, dispatched, "shutting down; abandoning pipeline");
                return dispatched;
            }
            match step {
                PipelineStep::Sleep(duration) => {
                    debug!(pipeline, ?duration, "sleeping before next step");
                    thread::sleep(duration);
                }
                PipelineStep::Command(command) => {
                    if self.spawn_launch(command) {
                        dispatched += 1;
                    }
                }
            }
        }
        info!(pipeline, dispatched, "pipeline started");
        dispatched
    }

    fn spawn_launch(&self, command: String) -> bool {
        self.shared.begin_launch();
        let shared = Arc::clone(&self.shared);
        let label = command.clone();
        let spawned = thread::Builder::new()
            .name("mqbridge-launch".to_string())
            .spawn(move || shared.run_command(command));
        match spawned {
            Ok(handle) => {
                let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
                workers.retain(|worker| !worker.is_finished());
                workers.push(handle);
                true
            }
            Err(e) => {
                self.shared.finish_launch();
                self.shared.launch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(command = %label, error = %e, "could not spawn launch worker");
                false
            }
        }
    }

    /// Signal every tracked process group and clear the registry.
    ///
    /// Returns the number of groups taken from the registry; `0` when nothing
    /// was tracked.
    pub fn stop(&self) -> usize {
        let records = {
            let mut registry = self.shared.registry();
            if registry.records.is_empty() {
                info!("stop requested with no tracked process groups");
                return 0;
            }
            registry.stops_in_flight += 1;
            std::mem::take(&mut registry.records)
        };

        for record in &records {
            match self.shared.signaler.terminate(record.pgid) {
                Ok(()) => debug!(pgid = record.pgid, command = %record.command, "signalled"),
                Err(e) => warn!(pgid = record.pgid, error = %e, "failed to signal process group"),
            }
        }

        self.shared.registry().stops_in_flight -= 1;
        info!(count = records.len(), "stopped process groups");
        records.len()
    }

    pub fn state(&self) -> SupervisorState {
        let registry = self.shared.registry();
        if registry.stops_in_flight > 0 {
            SupervisorState::Stopping
        } else if registry.records.is_empty() {
            SupervisorState::Idle
        } else {
            SupervisorState::Running
        }
    }

    /// Snapshot of the tracked process groups.
    pub fn records(&self) -> Vec<ProcessRecord> {
        self.shared.registry().records.clone()
    }

    /// Number of commands whose launch failed since creation.
    pub fn launch_failures(&self) -> u64 {
        self.shared.launch_failures.load(Ordering::Relaxed)
    }

    /// Wait until every dispatched command has either been recorded or
    /// failed to launch.  Returns `false` on timeout.
    pub fn await_pending_launches(&self, timeout: Duration) -> bool {
        let pending = self
            .shared
            .pending_launches
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let (_pending, result) = self
            .shared
            .launches_settled
            .wait_timeout_while(pending, timeout, |pending| *pending > 0)
            .unwrap_or_else(|e| e.into_inner());
        !result.timed_out()
    }

    /// Stop everything and reap the launch workers.
    ///
    /// Latches the supervisor first (see the module docs), then waits up to
    /// `timeout` for in-flight launches and again for workers to observe
    /// their process exiting; workers still running afterwards are detached.
    pub fn shutdown(&self, timeout: Duration) -> usize {
        self.shared.registry().shutting_down = true;
        if !self.await_pending_launches(timeout) {
            warn!("launches still pending at shutdown");
        }
        let stopped = self.stop();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        let deadline = Instant::now() + timeout;
        while workers.iter().any(|w| !w.is_finished()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let (finished, running): (Vec<_>, Vec<_>) =
            workers.into_iter().partition(|w| w.is_finished());
        for worker in finished {
            if worker.join().is_err() {
                warn!("launch worker panicked");
            }
        }
        if !running.is_empty() {
            warn!(count = running.len(), "detaching launch workers whose processes are still alive");
        }
        stopped
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("state", &self.state())
            .field("tracked", &self.shared.registry().records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineTemplate;
    use crate::process::RunningProcess;
    use mqbridge_types::BridgeError;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicI32;
    use std::sync::mpsc;

    // ── Fakes ───────────────────────────────────────────────────────────────

    /// Simulated OS: launched processes run until signalled or `exit`ed.
    struct FakeOs {
        next_pgid: AtomicI32,
        alive: Mutex<HashMap<i32, mpsc::Sender<()>>>,
        launched: Mutex<Vec<(String, Instant)>>,
        signalled: Mutex<Vec<i32>>,
    }

    impl FakeOs {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next_pgid: AtomicI32::new(1000),
                alive: Mutex::new(HashMap::new()),
                launched: Mutex::new(Vec::new()),
                signalled: Mutex::new(Vec::new()),
            })
        }

        fn exit(&self, pgid: i32) {
            if let Some(tx) = self.alive.lock().unwrap().remove(&pgid) {
                let _ = tx.send(());
            }
        }

        fn launched_commands(&self) -> Vec<String> {
            self.launched
                .lock()
                .unwrap()
                .iter()
                .map(|(cmd, _)| cmd.clone())
                .collect()
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
            Ok(Some(0))
        }
    }

    struct FakeLauncher(Arc<FakeOs>);

    impl Launcher for FakeLauncher {
        fn launch(&self, command: &str) -> Result<Box<dyn RunningProcess>, BridgeError> {
            if command.starts_with("missing") {
                return Err(BridgeError::Launch {
                    command: command.to_string(),
                    details: "command not found".to_string(),
                });
            }
            if command.starts_with("slow") {
                thread::sleep(Duration::from_millis(300));
            }
            let pgid = self.0.next_pgid.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel();
            self.0.alive.lock().unwrap().insert(pgid, tx);
            self.0
                .launched
                .lock()
                .unwrap()
                .push((command.to_string(), Instant::now()));
            Ok(Box::new(FakeProcess { pgid, exited: rx }))
        }
    }

    struct FakeSignaler(Arc<FakeOs>);

    impl GroupSignaler for FakeSignaler {
        fn terminate(&self, pgid: i32) -> Result<(), BridgeError> {
            self.0.signalled.lock().unwrap().push(pgid);
            self.0.exit(pgid);
            Ok(())
        }
    }

    fn template(name: &str, steps: &[&str], allowed: &[&str]) -> PipelineTemplate {
        PipelineTemplate {
            name: name.to_string(),
            steps: steps.iter().map(|s| s.to_string()).collect(),
            allowed_args: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn supervisor(templates: Vec<PipelineTemplate>) -> (Arc<FakeOs>, ProcessSupervisor) {
        let mut table = PipelineTable::new();
        for t in templates {
            table.register(t).unwrap();
        }
        let os = FakeOs::new();
        let sup = ProcessSupervisor::new(
            table,
            Arc::new(FakeLauncher(Arc::clone(&os))),
            Arc::new(FakeSignaler(Arc::clone(&os))),
        );
        (os, sup)
    }

    const SETTLE: Duration = Duration::from_secs(5);

    // ── Tests ───────────────────────────────────────────────────────────────

    #[test]
    fn start_records_one_group_per_command() {
        let (os, sup) = supervisor(vec![template(
            "imagenet",
            &["launch imagenet {args}"],
            &["width"],
        )]);
        assert_eq!(sup.state(), SupervisorState::Idle);

        let cmd = ControlCommand::parse("start|imagenet|width=640").unwrap();
        assert_eq!(sup.handle(&cmd), 1);
        assert!(sup.await_pending_launches(SETTLE));

        let records = sup.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "launch imagenet width:=640");
        assert_eq!(os.launched_commands(), vec!["launch imagenet width:=640"]);
        assert_eq!(sup.state(), SupervisorState::Running);
    }

    #[test]
    fn unknown_pipeline_is_noop() {
        let (os, sup) = supervisor(vec![]);
        assert_eq!(sup.start("detectnet", &[]), 0);
        assert!(sup.await_pending_launches(SETTLE));
        assert!(sup.records().is_empty());
        assert!(os.launched_commands().is_empty());
    }

    #[test]
    fn start_without_pipeline_name_is_noop() {
        let (_os, sup) = supervisor(vec![template("a", &["run a"], &[])]);
        let cmd = ControlCommand::parse("start").unwrap();
        assert_eq!(sup.handle(&cmd), 0);
    }

    #[test]
    fn stop_signals_each_group_once_and_clears_registry() {
        let (os, sup) = supervisor(vec![template("pair", &["run a", "run b"], &[])]);
        sup.start("pair", &[]);
        assert!(sup.await_pending_launches(SETTLE));
        let mut pgids: Vec<i32> = sup.records().iter().map(|r| r.pgid).collect();
        pgids.sort_unstable();

        assert_eq!(sup.stop(), 2);
        assert!(sup.records().is_empty());
        assert_eq!(sup.state(), SupervisorState::Idle);

        let mut signalled = os.signalled.lock().unwrap().clone();
        signalled.sort_unstable();
        assert_eq!(signalled, pgids);
    }

    #[test]
    fn stop_twice_is_idempotent() {
        let (os, sup) = supervisor(vec![template("one", &["run"], &[])]);
        sup.start("one", &[]);
        assert!(sup.await_pending_launches(SETTLE));

        assert_eq!(sup.stop(), 1);
        assert_eq!(sup.stop(), 0);
        assert!(sup.records().is_empty());
        assert_eq!(os.signalled.lock().unwrap().len(), 1);
    }

    #[test]
    fn stop_with_empty_registry_is_noop() {
        let (os, sup) = supervisor(vec![]);
        assert_eq!(sup.handle(&ControlCommand::parse("stop").unwrap()), 0);
        assert!(os.signalled.lock().unwrap().is_empty());
        assert_eq!(sup.state(), SupervisorState::Idle);
    }

    #[test]
    fn sleep_step_delays_following_launch() {
        let (os, sup) = supervisor(vec![template(
            "camera_then_detector",
            &["run camera", "sleep:0.2", "run detector"],
            &[],
        )]);

        let started = Instant::now();
        assert_eq!(sup.start("camera_then_detector", &[]), 2);
        // The caller is blocked for the barrier.
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(sup.await_pending_launches(SETTLE));

        let launched = os.launched.lock().unwrap().clone();
        assert_eq!(launched.len(), 2);
        assert_eq!(launched[0].0, "run camera");
        assert_eq!(launched[1].0, "run detector");
        assert!(launched[1].1 >= started + Duration::from_millis(200));
        // The camera was launched without waiting for the barrier.
        assert!(launched[0].1 < launched[1].1);
    }

    #[test]
    fn concurrent_starts_then_stop_signal_every_group_exactly_once() {
        const N: usize = 8;
        let (os, sup) = supervisor(vec![template("worker", &["run worker"], &[])]);
        let sup = Arc::new(sup);

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let sup = Arc::clone(&sup);
                thread::spawn(move || sup.start("worker", &[]))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert!(sup.await_pending_launches(SETTLE));
        assert_eq!(sup.records().len(), N);

        assert_eq!(sup.stop(), N);
        assert!(sup.records().is_empty());

        let mut signalled = os.signalled.lock().unwrap().clone();
        signalled.sort_unstable();
        signalled.dedup();
        assert_eq!(signalled.len(), N);
        assert_eq!(os.signalled.lock().unwrap().len(), N);
    }

    #[test]
    fn launch_failure_is_counted_and_pipeline_continues() {
        let (_os, sup) = supervisor(vec![template(
            "partial",
            &["missing-binary --flag", "run ok"],
            &[],
        )]);

        assert_eq!(sup.start("partial", &[]), 2);
        assert!(sup.await_pending_launches(SETTLE));

        assert_eq!(sup.launch_failures(), 1);
        let records = sup.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "run ok");
    }

    #[test]
    fn exited_process_leaves_registry() {
        let (os, sup) = supervisor(vec![template("short", &["run short"], &[])]);
        sup.start("short", &[]);
        assert!(sup.await_pending_launches(SETTLE));
        let pgid = sup.records()[0].pgid;

        os.exit(pgid);

        let deadline = Instant::now() + SETTLE;
        while !sup.records().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(sup.records().is_empty());
        assert_eq!(sup.state(), SupervisorState::Idle);
        // Nothing left to stop.
        assert_eq!(sup.stop(), 0);
        assert!(os.signalled.lock().unwrap().is_empty());
    }

    #[test]
    fn shutdown_stops_and_reaps_workers() {
        let (os, sup) = supervisor(vec![template("pair", &["run a", "run b"], &[])]);
        sup.start("pair", &[]);

        assert_eq!(sup.shutdown(SETTLE), 2);
        assert!(sup.records().is_empty());
        assert!(sup.workers.lock().unwrap().is_empty());
        assert!(os.alive.lock().unwrap().is_empty());
    }

    #[test]
    fn shutdown_during_sleep_abandons_remaining_steps() {
        let (os, sup) = supervisor(vec![template(
            "staged",
            &["run a", "sleep:0.3", "run b"],
            &[],
        )]);
        let sup = Arc::new(sup);

        let starter = {
            let sup = Arc::clone(&sup);
            thread::spawn(move || sup.start("staged", &[]))
        };
        thread::sleep(Duration::from_millis(50));

        assert_eq!(sup.shutdown(Duration::from_millis(100)), 1);
        // Only the step reached before shutdown was dispatched.
        assert_eq!(starter.join().unwrap(), 1);
        assert!(sup.await_pending_launches(SETTLE));

        assert!(sup.records().is_empty());
        assert_eq!(os.launched_commands(), vec!["run a"]);
        assert_eq!(sup.start("staged", &[]), 0);
    }

    #[test]
    fn launch_landing_after_shutdown_is_terminated() {
        let (os, sup) = supervisor(vec![template("late", &["slow start"], &[])]);
        assert_eq!(sup.start("late", &[]), 1);

        // The launch outlives the wait, so shutdown finds nothing to stop.
        assert_eq!(sup.shutdown(Duration::from_millis(20)), 0);
        assert!(sup.await_pending_launches(SETTLE));

        assert!(sup.records().is_empty());
        assert_eq!(os.launched_commands(), vec!["slow start"]);
        assert_eq!(os.signalled.lock().unwrap().len(), 1);
        assert!(os.alive.lock().unwrap().is_empty());
    }
}
