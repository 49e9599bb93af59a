//! Child process lifecycle.
//!
//! One tool server subprocess per live connection. All three stdio streams
//! are captured as pipes; stderr is folded into the outbound relay alongside
//! stdout rather than inherited. Termination is graceful-then-forcible and
//! always reaps, so no zombie survives a reconnect cycle.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// How long a terminated child gets to exit before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// The program to spawn plus its arguments, fixed at bridge start and reused
/// for every reconnect.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{stream} not captured")]
    StreamNotCaptured { stream: &'static str },
}

/// The child's captured stdio streams, handed to the stream bridge.
#[derive(Debug)]
pub struct ChildIo {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Extension point for different spawn strategies (tests swap in stubs).
pub trait ChildSpawner: Send + Sync {
    fn spawn(&self, spec: &ChildSpec) -> Result<(ToolProcess, ChildIo), SpawnError>;
}

/// Production spawner: runs the configured command line directly.
pub struct CommandSpawner;

impl ChildSpawner for CommandSpawner {
    fn spawn(&self, spec: &ChildSpec) -> Result<(ToolProcess, ChildIo), SpawnError> {
        ToolProcess::spawn(spec)
    }
}

/// Handle to one spawned tool server process.
#[derive(Debug)]
pub struct ToolProcess {
    child: Child,
}

impl ToolProcess {
    pub fn spawn(spec: &ChildSpec) -> Result<(Self, ChildIo), SpawnError> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // If the bridge itself dies mid-session, the child must not
            // linger detached from any connection.
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(SpawnError::StreamNotCaptured { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::StreamNotCaptured { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SpawnError::StreamNotCaptured { stream: "stderr" })?;

        tracing::debug!(program = %spec.program, pid = ?child.id(), "Spawned tool process");

        Ok((
            Self { child },
            ChildIo {
                stdin,
                stdout,
                stderr,
            },
        ))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Terminate and reap the process: graceful signal first, forcible kill
    /// if it does not exit within the grace window. Safe to call on a process
    /// that already exited — process-not-found means already terminated.
    pub async fn terminate(mut self) {
        self.signal_terminate();

        match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "Tool process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to wait for tool process");
            }
            Err(_elapsed) => {
                tracing::warn!("Tool process unresponsive after terminate, killing");
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill tool process");
                }
            }
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&self) {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return; // already reaped
        };

        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pid, error = %e, "Failed to signal tool process"),
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) {
        // No graceful signal available; wait/kill in terminate() handles it.
    }
}
