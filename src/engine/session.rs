//! The composite `run` / `flashrun` action.
//!
//! Idle -> Flashing -> ServerStarting -> ScriptCheck -> Debugging -> Teardown -> Idle.
//! Once the server has been spawned every path out of here goes through Teardown, and the
//! server is stopped exactly once.

use super::readiness::wait_until_ready;
use super::runner::{ProcessRunner, ServerProcess};
use super::{outcome_for, Dispatcher};
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::model::{Outcome, SessionPhase, ToolCommand, WorkflowEvent};
use crate::platform::SessionPolicy;

/// `<debugger> <elf> --batch --command=<script>`
pub(crate) fn debugger_command(cfg: &WorkflowConfig) -> ToolCommand {
    cfg.profile.debugger.with_args([
        cfg.elf.display().to_string(),
        "--batch".to_string(),
        format!("--command={}", cfg.script.display()),
    ])
}

pub(crate) async fn run_session<R: ProcessRunner>(
    d: &Dispatcher<'_, R>,
    policy: SessionPolicy,
) -> Result<Outcome, WorkflowError> {
    let cfg = d.cfg;

    if policy == SessionPolicy::FlashThenAttach {
        d.enter(SessionPhase::Flashing);
        let flash = d.flash_command();
        let exit = d.run_tool(&flash, cfg.timing.tool_timeout).await?;
        if !exit.success() {
            d.emit(WorkflowEvent::Warning(format!(
                "{} failed ({exit}), starting the debug session anyway",
                flash.program
            )));
        }
        tokio::time::sleep(cfg.timing.flash_settle).await;
    }

    d.enter(SessionPhase::ServerStarting);
    let server_cmd = &cfg.profile.server;
    d.emit(WorkflowEvent::ToolStarted {
        command: server_cmd.clone(),
        background: true,
    });
    d.sync_output().await;
    let mut server = d.runner.spawn_background(server_cmd)?;

    if let Err(e) = wait_until_ready(&mut server, &cfg.profile.readiness).await {
        abort(d, &mut server).await;
        return Err(e);
    }

    d.enter(SessionPhase::ScriptCheck);
    if !cfg.script.is_file() {
        abort(d, &mut server).await;
        return Err(WorkflowError::ScriptMissing {
            path: cfg.script.clone(),
        });
    }

    d.enter(SessionPhase::Debugging);
    let debugger = debugger_command(cfg);
    let debugged = d.run_tool(&debugger, cfg.timing.debugger_timeout).await;

    d.enter(SessionPhase::Teardown);
    tokio::time::sleep(cfg.timing.uart_flush).await;
    let stopped = server.terminate(cfg.timing.server_shutdown_grace).await;
    if let Ok(forced) = &stopped {
        d.emit(WorkflowEvent::ServerStopped {
            program: server.program().to_string(),
            forced: *forced,
        });
    }
    d.enter(SessionPhase::Idle);

    // A debugger failure is the more useful error to surface.
    let exit = debugged?;
    stopped?;
    Ok(outcome_for(&debugger.program, exit))
}

/// Error-path teardown: kill the server without the grace period.
async fn abort<R: ProcessRunner>(d: &Dispatcher<'_, R>, server: &mut R::Server) {
    d.enter(SessionPhase::Teardown);
    match server.kill().await {
        Ok(()) => d.emit(WorkflowEvent::ServerStopped {
            program: server.program().to_string(),
            forced: true,
        }),
        Err(e) => d.emit(WorkflowEvent::Warning(format!(
            "could not stop {}: {e}",
            server.program()
        ))),
    }
    d.enter(SessionPhase::Idle);
}
