mod readiness;
pub mod runner;
mod session;

use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::model::{
    Action, CommandReport, Outcome, RunReport, SessionPhase, ToolCommand, ToolExit,
    WorkflowEvent, FLASH_ADDRESS,
};
use crate::platform::SessionPolicy;
use runner::ProcessRunner;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// Messages from the dispatcher to the presentation layer.
#[derive(Debug)]
pub enum Notice {
    Event(WorkflowEvent),
    /// Acknowledge once every earlier event has been written out.
    Sync(oneshot::Sender<()>),
}

/// Runs queued command tokens, one at a time, against a platform profile.
pub struct Dispatcher<'a, R> {
    cfg: &'a WorkflowConfig,
    runner: R,
    notice_tx: mpsc::UnboundedSender<Notice>,
}

impl<'a, R: ProcessRunner> Dispatcher<'a, R> {
    pub fn new(
        cfg: &'a WorkflowConfig,
        runner: R,
        notice_tx: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        Self {
            cfg,
            runner,
            notice_tx,
        }
    }

    /// Execute every token in order. Failures are recorded per command and never stop the
    /// queue.
    pub async fn run_queue(&self, tokens: &[String]) -> RunReport {
        let mut commands = Vec::with_capacity(tokens.len());
        for token in tokens {
            commands.push(self.run_token(token).await);
        }
        RunReport {
            platform: self.cfg.profile.platform,
            dry_run: self.cfg.dry_run,
            commands,
        }
    }

    async fn run_token(&self, token: &str) -> CommandReport {
        let started_utc = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into());
        let start = Instant::now();

        let Some(action) = self.cfg.profile.lookup(token) else {
            tracing::warn!(
                "{token:?} is not a command on {:?}, valid commands are {:?}",
                self.cfg.profile.platform,
                self.cfg.profile.action_names()
            );
            self.emit(WorkflowEvent::UnknownCommand {
                token: token.to_string(),
            });
            return CommandReport {
                token: token.to_string(),
                action: None,
                outcome: Outcome::Unknown,
                started_utc,
                elapsed: Duration::ZERO,
            };
        };

        tracing::info!("Running {}", action.as_str());
        self.emit(WorkflowEvent::CommandStarted { action });
        let outcome = match self.execute(action).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("{} failed: {e}", action.as_str());
                self.emit(WorkflowEvent::CommandFailed {
                    action,
                    message: e.to_string(),
                });
                Outcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        CommandReport {
            token: token.to_string(),
            action: Some(action),
            outcome,
            started_utc,
            elapsed: start.elapsed(),
        }
    }

    async fn execute(&self, action: Action) -> Result<Outcome, WorkflowError> {
        let cmd = match action {
            Action::Clean => self
                .cfg
                .profile
                .build
                .with_args([self.cfg.profile.clean_target]),
            Action::Build => self.cfg.profile.build.clone(),
            Action::Flash => self.flash_command(),
            Action::Run | Action::FlashRun => {
                let policy = self
                    .cfg
                    .profile
                    .session_policy(action)
                    .unwrap_or(SessionPolicy::AttachOnly);
                return session::run_session(self, policy).await;
            }
        };
        let exit = self.run_tool(&cmd, self.cfg.timing.tool_timeout).await?;
        Ok(outcome_for(&cmd.program, exit))
    }

    /// `st-flash write <binary> 0x08000000`
    fn flash_command(&self) -> ToolCommand {
        self.cfg.profile.flash.with_args([
            "write".to_string(),
            self.cfg.binary.display().to_string(),
            FLASH_ADDRESS.to_string(),
        ])
    }

    /// Run a foreground tool to completion. A non-zero exit is reported, not raised.
    async fn run_tool(
        &self,
        cmd: &ToolCommand,
        timeout: Option<Duration>,
    ) -> Result<ToolExit, WorkflowError> {
        self.emit(WorkflowEvent::ToolStarted {
            command: cmd.clone(),
            background: false,
        });
        self.sync_output().await;
        let exit = self.runner.run(cmd, timeout).await?;
        if !exit.success() {
            tracing::warn!("{} finished with {exit}", cmd.program);
        }
        self.emit(WorkflowEvent::ToolFinished {
            program: cmd.program.clone(),
            exit,
        });
        Ok(exit)
    }

    fn enter(&self, phase: SessionPhase) {
        tracing::debug!("Session phase: {phase:?}");
        self.emit(WorkflowEvent::PhaseEntered { phase });
    }

    fn emit(&self, event: WorkflowEvent) {
        let _ = self.notice_tx.send(Notice::Event(event));
    }

    /// Wait until everything emitted so far is written out. Called before a tool starts so
    /// its own output lands after the line announcing it.
    async fn sync_output(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.notice_tx.send(Notice::Sync(ack_tx)).is_ok() {
            // A dropped ack means the consumer is gone; nothing left to wait for.
            let _ = ack_rx.await;
        }
    }
}

fn outcome_for(program: &str, exit: ToolExit) -> Outcome {
    if exit.success() {
        Outcome::Succeeded
    } else {
        Outcome::ToolFailed {
            program: program.to_string(),
            exit,
        }
    }
}
