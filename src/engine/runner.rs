//! Process-runner seam.
//!
//! The dispatcher talks to external tools only through [`ProcessRunner`], so the same
//! workflow drives real processes, a dry run, or a recording fake in tests.

use crate::error::WorkflowError;
use crate::model::{ToolCommand, ToolExit};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

pub trait ProcessRunner {
    type Server: ServerProcess;

    /// Run `cmd` to completion. With a timeout, the tool is killed once it expires.
    async fn run(
        &self,
        cmd: &ToolCommand,
        timeout: Option<Duration>,
    ) -> Result<ToolExit, WorkflowError>;

    /// Start `cmd` in the background and hand ownership of it to the caller.
    fn spawn_background(&self, cmd: &ToolCommand) -> Result<Self::Server, WorkflowError>;
}

/// A background process owned by exactly one session.
pub trait ServerProcess {
    fn program(&self) -> &str;

    /// `Some` if the process has already exited.
    fn try_exit(&mut self) -> Result<Option<ToolExit>, WorkflowError>;

    /// Ask the process to stop, then kill it if it is still alive after `grace`.
    /// Returns `true` if it had to be killed.
    async fn terminate(&mut self, grace: Duration) -> Result<bool, WorkflowError>;

    async fn kill(&mut self) -> Result<(), WorkflowError>;
}

/// Spawns real processes with inherited stdin and stderr.
#[derive(Debug, Default)]
pub struct SystemRunner {
    /// Send tool stdout to our stderr, leaving stdout to the caller (JSON report).
    stdout_to_stderr: bool,
}

impl SystemRunner {
    pub fn new(stdout_to_stderr: bool) -> Self {
        Self { stdout_to_stderr }
    }

    fn command(&self, cmd: &ToolCommand) -> Command {
        let stdout = if self.stdout_to_stderr {
            Stdio::from(std::io::stderr())
        } else {
            Stdio::inherit()
        };
        let mut c = Command::new(&cmd.program);
        c.args(&cmd.args)
            .stdin(Stdio::inherit())
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        c
    }

    fn spawn(&self, cmd: &ToolCommand) -> Result<Child, WorkflowError> {
        self.command(cmd)
            .spawn()
            .map_err(|source| WorkflowError::Spawn {
                program: cmd.program.clone(),
                source,
            })
    }
}

impl ProcessRunner for SystemRunner {
    type Server = SystemServer;

    async fn run(
        &self,
        cmd: &ToolCommand,
        timeout: Option<Duration>,
    ) -> Result<ToolExit, WorkflowError> {
        let mut child = self.spawn(cmd)?;
        tracing::debug!(pid = child.id(), "Started {cmd}");

        let waited = match timeout {
            Some(after) => {
                let waited = tokio::time::timeout(after, child.wait()).await;
                match waited {
                    Ok(res) => res,
                    Err(_) => {
                        // kill_on_drop would also do this, but reap it so no zombie is left.
                        let _ = child.kill().await;
                        return Err(WorkflowError::TimedOut {
                            program: cmd.program.clone(),
                            after,
                        });
                    }
                }
            }
            None => child.wait().await,
        };

        let status = waited.map_err(|source| WorkflowError::Wait {
            program: cmd.program.clone(),
            source,
        })?;
        Ok(status.into())
    }

    fn spawn_background(&self, cmd: &ToolCommand) -> Result<SystemServer, WorkflowError> {
        let child = self.spawn(cmd)?;
        tracing::debug!(pid = child.id(), "Started {cmd} in the background");
        Ok(SystemServer {
            program: cmd.program.clone(),
            child,
        })
    }
}

#[derive(Debug)]
pub struct SystemServer {
    program: String,
    child: Child,
}

impl SystemServer {
    #[cfg(unix)]
    fn request_stop(&mut self) -> Result<(), WorkflowError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| WorkflowError::Signal {
            pid,
            reason: e.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) -> Result<(), WorkflowError> {
        // Windows has no polite equivalent for console tools; termination is immediate.
        let pid = self.child.id().unwrap_or_default();
        self.child.start_kill().map_err(|e| WorkflowError::Signal {
            pid,
            reason: e.to_string(),
        })
    }

    /// Wait out `grace` after a stop request. A failed request goes straight to a kill.
    async fn finish_stop(
        &mut self,
        requested: Result<(), WorkflowError>,
        grace: Duration,
    ) -> Result<bool, WorkflowError> {
        if let Err(e) = requested {
            tracing::warn!("{e}, killing {}", self.program);
            self.kill().await?;
            return Ok(true);
        }

        let waited = tokio::time::timeout(grace, self.child.wait()).await;
        match waited {
            Ok(res) => {
                res.map_err(|e| self.wait_error(e))?;
                Ok(false)
            }
            Err(_) => {
                tracing::warn!(
                    "{} ignored the stop request for {}, killing it",
                    self.program,
                    humantime::format_duration(grace)
                );
                self.kill().await?;
                Ok(true)
            }
        }
    }

    fn wait_error(&self, source: std::io::Error) -> WorkflowError {
        WorkflowError::Wait {
            program: self.program.clone(),
            source,
        }
    }
}

impl ServerProcess for SystemServer {
    fn program(&self) -> &str {
        &self.program
    }

    fn try_exit(&mut self) -> Result<Option<ToolExit>, WorkflowError> {
        match self.child.try_wait() {
            Ok(status) => Ok(status.map(ToolExit::from)),
            Err(e) => Err(self.wait_error(e)),
        }
    }

    async fn terminate(&mut self, grace: Duration) -> Result<bool, WorkflowError> {
        if self.try_exit()?.is_some() {
            return Ok(false);
        }
        let requested = self.request_stop();
        self.finish_stop(requested, grace).await
    }

    async fn kill(&mut self) -> Result<(), WorkflowError> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Already exited on its own.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(self.wait_error(e)),
        }
    }
}

/// Spawns nothing. Every tool "succeeds" immediately.
#[derive(Debug, Default)]
pub struct DryRunRunner;

impl ProcessRunner for DryRunRunner {
    type Server = DryRunServer;

    async fn run(
        &self,
        _cmd: &ToolCommand,
        _timeout: Option<Duration>,
    ) -> Result<ToolExit, WorkflowError> {
        Ok(ToolExit::SUCCESS)
    }

    fn spawn_background(&self, cmd: &ToolCommand) -> Result<DryRunServer, WorkflowError> {
        Ok(DryRunServer {
            program: cmd.program.clone(),
        })
    }
}

#[derive(Debug)]
pub struct DryRunServer {
    program: String,
}

impl ServerProcess for DryRunServer {
    fn program(&self) -> &str {
        &self.program
    }

    fn try_exit(&mut self) -> Result<Option<ToolExit>, WorkflowError> {
        Ok(None)
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<bool, WorkflowError> {
        Ok(false)
    }

    async fn kill(&mut self) -> Result<(), WorkflowError> {
        Ok(())
    }
}
