//! `mqbridge` – bridge between a robotics topic bus and a message broker.
//!
//! Subcommands:
//!
//! - `check` – parse the configuration, connect every bridge to in-process
//!   buses and report what would run.
//! - `run` – connect every bridge and keep them running until Ctrl-C.  Lines
//!   typed on stdin as `<topic> <payload>` are published on the in-process
//!   broker, so the control channel and reverse bridges can be exercised by
//!   hand.
//! - `control <payload>` – execute one control payload
//!   (`start|<pipeline>|k=v…` or `stop`) against the configured pipelines.
//!
//! Ctrl-C always ends with every launched process group being signalled.

mod config;
mod engine;

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use mqbridge_middleware::BrokerClient;
use mqbridge_runtime::{init_tracing_with, Bridge, BridgeKind, LogFormat};
use mqbridge_types::{ControlCommand, ControlVerb};
use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::engine::Engine;

#[derive(Parser, Debug)]
#[command(name = "mqbridge", version)]
#[command(about = "Bridge a robotics topic bus and a message broker")]
struct Cli {
    /// Configuration file (default: ./mqbridge.toml)
    #[arg(short, long, env = "MQBRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Console log format: compact or json (default: $MQBRIDGE_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and list its bridges
    Check,
    /// Run every bridge until Ctrl-C
    Run,
    /// Execute one control payload against the configured pipelines
    Control {
        /// e.g. `start|imagenet|width=640` or `stop`
        payload: String,
    },
}

/// Events the foreground loop waits on.
enum Input {
    Line(String),
    Shutdown,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing_with("mqbridge", cli.log_format.unwrap_or_else(LogFormat::from_env));

    let path = config::config_path(cli.config.as_deref());
    let cfg = match config::load_from(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Check => check(&cfg, &path),
        Command::Run => run(&cfg),
        Command::Control { payload } => control(&cfg, &payload),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

fn check(cfg: &Config, path: &std::path::Path) -> Result<(), String> {
    let runtime = runtime()?;
    let _enter = runtime.enter();
    let engine = Engine::start(cfg)?;

    println!(
        "  {} {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    println!(
        "    {} schema(s), {} transform rule(s), {} pipeline(s), codec {}",
        cfg.schemas.len(),
        cfg.transforms.len(),
        cfg.pipelines.len(),
        cfg.broker.codec
    );
    print_bridges(&engine.bridges);
    Ok(())
}

fn run(cfg: &Config) -> Result<(), String> {
    let runtime = runtime()?;
    let _enter = runtime.enter();
    let engine = Engine::start(cfg)?;

    print_bridges(&engine.bridges);
    for bridge in &engine.bridges {
        spawn_observer(&runtime, &engine, bridge)?;
    }

    let (tx, rx) = mpsc::channel();
    install_ctrlc(tx.clone());
    spawn_stdin_reader(tx);
    println!(
        "\n  Running. Type {} to publish on the broker, Ctrl-C to stop.\n",
        "<topic> <payload>".bold().cyan()
    );

    while let Ok(input) = rx.recv() {
        match input {
            Input::Line(line) => publish_line(&engine, &line),
            Input::Shutdown => break,
        }
    }

    let stopped = engine.shutdown();
    println!("  {} Signalled {} process group(s).", "✓".green(), stopped);
    for bridge in &engine.bridges {
        let stats = bridge.stats();
        println!(
            "    {} → {}: forwarded {}, filtered {}, rate-limited {}, failed {}, control {}",
            bridge.topic_from(),
            display_topic(bridge.topic_to()),
            stats.forwarded,
            stats.filtered,
            stats.rate_limited,
            stats.failed,
            stats.control
        );
    }
    // Dispatchers never finish on their own; a handler may still be asleep
    // inside a control pipeline.
    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

fn control(cfg: &Config, payload: &str) -> Result<(), String> {
    let command = ControlCommand::parse(payload)
        .ok_or_else(|| format!("'{payload}' is not a control payload (expected start|… or stop)"))?;
    let supervisor = engine::supervisor(cfg)?;

    let affected = supervisor.handle(&command);
    if command.verb == ControlVerb::Stop || affected == 0 {
        println!("  Nothing running.");
        return Ok(());
    }
    if !supervisor.await_pending_launches(Duration::from_secs(cfg.supervisor.shutdown_timeout_secs)) {
        warn!("some launches did not settle");
    }
    for record in supervisor.records() {
        println!(
            "  {} pgid {} {}",
            "▶".green(),
            record.pgid.to_string().bold(),
            record.command.dimmed()
        );
    }
    if supervisor.launch_failures() > 0 {
        println!(
            "  {} {} launch failure(s); see log.",
            "!".yellow().bold(),
            supervisor.launch_failures()
        );
    }

    let (tx, rx) = mpsc::channel();
    install_ctrlc(tx);
    println!("\n  Press Ctrl-C to stop the pipeline.");
    let _ = rx.recv();

    let stopped = supervisor.shutdown(Duration::from_secs(cfg.supervisor.shutdown_timeout_secs));
    println!("  {} Signalled {} process group(s).", "✓".green(), stopped);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start Tokio runtime: {e}"))
}

fn install_ctrlc(tx: mpsc::Sender<Input>) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping bridges …".yellow().bold());
        let _ = tx.send(Input::Shutdown);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; launched processes will outlive the bridge");
    }
}

/// Forward stdin lines to the foreground loop.  EOF only ends the reader.
fn spawn_stdin_reader(tx: mpsc::Sender<Input>) {
    let spawned = std::thread::Builder::new()
        .name("mqbridge-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(Input::Line(line)).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "stdin reader unavailable");
    }
}

fn publish_line(engine: &Engine, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let Some((topic, payload)) = line.split_once(char::is_whitespace) else {
        println!("  {} expected `<topic> <payload>`", "?".yellow());
        return;
    };
    match engine.broker.publish(topic, payload.trim().as_bytes()) {
        Ok(n) => println!("  {} {} ({} subscriber(s))", "→".cyan(), topic.bold(), n),
        Err(e) => println!("  {}: {}", "Publish failed".red(), e),
    }
}

/// Print everything a bridge emits on its destination side.
fn spawn_observer(
    runtime: &tokio::runtime::Runtime,
    engine: &Engine,
    bridge: &Bridge,
) -> Result<(), String> {
    let topic = bridge.topic_to().to_string();
    if topic.is_empty() {
        return Ok(());
    }
    match bridge.kind() {
        BridgeKind::RosToMqtt => {
            let rx = engine.broker.receiver(&topic).map_err(|e| e.to_string())?;
            runtime.spawn(async move {
                engine::observe(&topic, rx, |delivery| {
                    println!(
                        "  {} {} {}",
                        "broker".magenta(),
                        delivery.topic.bold(),
                        String::from_utf8_lossy(&delivery.payload)
                    );
                })
                .await;
            });
        }
        BridgeKind::MqttToRos => {
            let rx = engine
                .bus
                .receiver(&topic, bridge.schema())
                .map_err(|e| e.to_string())?;
            runtime.spawn(async move {
                engine::observe(&topic, rx, |message| {
                    println!(
                        "  {} {} {}",
                        "bus".blue(),
                        topic.bold(),
                        Value::Object(message.fields)
                    );
                })
                .await;
            });
        }
    }
    Ok(())
}

fn print_bridges(bridges: &[Bridge]) {
    println!("  {} bridge(s):", bridges.len());
    for bridge in bridges {
        println!(
            "    {:<12} {} → {}  [{}]",
            bridge.kind().to_string().cyan(),
            bridge.topic_from(),
            display_topic(bridge.topic_to()),
            bridge.schema().dimmed()
        );
    }
}

fn display_topic(topic: &str) -> &str {
    if topic.is_empty() { "(control only)" } else { topic }
}
