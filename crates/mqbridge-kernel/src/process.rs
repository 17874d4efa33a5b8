//! OS process seams used by the [`ProcessSupervisor`][crate::supervisor::ProcessSupervisor].
//!
//! - [`Launcher`] starts one command in a fresh process group.
//! - [`RunningProcess`] is the handle to wait on it.
//! - [`GroupSignaler`] sends the group-wide termination signal.
//!
//! [`ShellLauncher`] and [`SigtermSignaler`] are the Unix implementations.

use mqbridge_types::BridgeError;

/// Handle to a launched process group leader.
pub trait RunningProcess: Send {
    /// Process-group id of the launched command.
    fn pgid(&self) -> i32;

    /// Block until the process exits, returning its exit code (`None` when
    /// it was terminated by a signal).
    fn wait(&mut self) -> Result<Option<i32>, BridgeError>;
}

/// Starts commands, each as the leader of a new process group.
pub trait Launcher: Send + Sync {
    fn launch(&self, command: &str) -> Result<Box<dyn RunningProcess>, BridgeError>;
}

/// Delivers a termination signal to a whole process group.
pub trait GroupSignaler: Send + Sync {
    fn terminate(&self, pgid: i32) -> Result<(), BridgeError>;
}

/// Shell used by [`ShellLauncher::default`].
pub const DEFAULT_SHELL: &str = "/bin/bash";

#[cfg(unix)]
pub use unix::{ShellLauncher, SigtermSignaler};

#[cfg(unix)]
mod unix {
    use std::os::unix::process::CommandExt;
    use std::path::PathBuf;
    use std::process::{Child, Command, Stdio};

    use mqbridge_types::BridgeError;

    use super::{GroupSignaler, Launcher, RunningProcess, DEFAULT_SHELL};

    /// Runs each command as `<shell> -c <command>` in a new process group.
    #[derive(Debug, Clone)]
    pub struct ShellLauncher {
        shell: PathBuf,
    }

    impl ShellLauncher {
        pub fn new(shell: impl Into<PathBuf>) -> Self {
            Self {
                shell: shell.into(),
            }
        }
    }

    impl Default for ShellLauncher {
        fn default() -> Self {
            Self::new(DEFAULT_SHELL)
        }
    }

    impl Launcher for ShellLauncher {
        fn launch(&self, command: &str) -> Result<Box<dyn RunningProcess>, BridgeError> {
            let launch_error = |details: String| BridgeError::Launch {
                command: command.to_string(),
                details,
            };
            let child = Command::new(&self.shell)
                .arg("-c")
                .arg(command)
                .process_group(0)
                .stdin(Stdio::null())
                .spawn()
                .map_err(|e| launch_error(e.to_string()))?;
            // The child leads its own group, so its pid is the pgid.
            let pgid = i32::try_from(child.id())
                .map_err(|_| launch_error(format!("pid {} out of range", child.id())))?;
            Ok(Box::new(ChildProcess {
                child,
                pgid,
                command: command.to_string(),
            }))
        }
    }

    struct ChildProcess {
        child: Child,
        pgid: i32,
        command: String,
    }

    impl RunningProcess for ChildProcess {
        fn pgid(&self) -> i32 {
            self.pgid
        }

        fn wait(&mut self) -> Result<Option<i32>, BridgeError> {
            self.child
                .wait()
                .map(|status| status.code())
                .map_err(|e| BridgeError::Launch {
                    command: self.command.clone(),
                    details: format!("wait failed: {e}"),
                })
        }
    }

    /// Sends `SIGTERM` to a process group; no forced-kill follow-up.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SigtermSignaler;

    impl GroupSignaler for SigtermSignaler {
        fn terminate(&self, pgid: i32) -> Result<(), BridgeError> {
            // killpg(0) and killpg(1) would hit our own group or init.
            if pgid <= 1 {
                return Err(BridgeError::Signal {
                    pgid,
                    details: "refusing to signal a reserved process group".to_string(),
                });
            }
            // SAFETY: killpg has no memory-safety preconditions.
            let rc = unsafe { libc::killpg(pgid, libc::SIGTERM) };
            if rc == 0 {
                Ok(())
            } else {
                Err(BridgeError::Signal {
                    pgid,
                    details: std::io::Error::last_os_error().to_string(),
                })
            }
        }
    }
}
