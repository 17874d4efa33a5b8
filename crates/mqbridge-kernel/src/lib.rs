//! `mqbridge-kernel` – Regulation & Supervision
//!
//! The bridge's brainstem: it does not translate messages, it decides when
//! they may pass and keeps launched processes under control.
//!
//! # Modules
//!
//! - [`rate_limiter`] – [`RateLimiter`][rate_limiter::RateLimiter]:
//!   per-bridge minimum-interval gate with an atomic check-and-set, plus the
//!   [`Clock`][rate_limiter::Clock] seam used to test it deterministically.
//! - [`pipeline`] – [`PipelineTable`][pipeline::PipelineTable]: named
//!   command/sleep sequences with an argument allow-list.
//! - [`process`] – [`Launcher`][process::Launcher] and
//!   [`GroupSignaler`][process::GroupSignaler] seams over the OS process API.
//! - [`supervisor`] – [`ProcessSupervisor`][supervisor::ProcessSupervisor]:
//!   the mutex-guarded registry of launched process groups behind the
//!   control channel's `start` / `stop` verbs.

pub mod pipeline;
pub mod process;
pub mod rate_limiter;
pub mod supervisor;

pub use pipeline::{PipelineStep, PipelineTable, PipelineTemplate};
pub use process::{GroupSignaler, Launcher, RunningProcess, DEFAULT_SHELL};
#[cfg(unix)]
pub use process::{ShellLauncher, SigtermSignaler};
pub use rate_limiter::{Clock, ManualClock, RateLimiter, SystemClock};
pub use supervisor::{ProcessRecord, ProcessSupervisor, SupervisorState};
