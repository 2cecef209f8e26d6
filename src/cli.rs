use crate::config::{self, CliOverrides, WorkflowConfig};
use crate::engine::runner::{DryRunRunner, ProcessRunner, SystemRunner};
use crate::engine::{Dispatcher, Notice};
use crate::logging::LevelFilter;
use crate::model::{Platform, RunReport, WorkflowEvent};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
    /// Flush both streams, then acknowledge.
    Sync(oneshot::Sender<()>),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        // Locks are taken per line; tracing writes to stderr from other threads.
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(stdout.lock(), "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(stderr.lock(), "{}", msg);
                }
                OutputLine::Sync(ack) => {
                    let _ = stdout.lock().flush();
                    let _ = stderr.lock().flush();
                    let _ = ack.send(());
                }
            }
        }

        let _ = stdout.lock().flush();
        let _ = stderr.lock().flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "bfr",
    version,
    about = "Build, flash and debug STM32 firmware",
    override_usage = "bfr [OPTIONS] <COMMAND>..."
)]
pub struct Cli {
    /// Commands to run in order (clean, build, flash, run, flashrun; depends on platform)
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub commands: Vec<String>,

    /// Tool set and command table to use (defaults to the host OS)
    #[arg(long, value_enum)]
    pub platform: Option<Platform>,

    /// Configuration file (default: ./bfr.toml, then the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Binary image written by `flash`
    #[arg(long)]
    pub binary: Option<PathBuf>,

    /// ELF image loaded by the debugger
    #[arg(long)]
    pub elf: Option<PathBuf>,

    /// Debugger script (default: $BFR_ROOT/<platform script>)
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Print a JSON report of every command on stdout
    #[arg(long)]
    pub json: bool,

    /// Print the tool invocations without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with status 1 if any command failed or was unknown
    #[arg(long)]
    pub strict: bool,

    /// Log level (falls back to RUST_LOG, then WARN)
    #[arg(long, value_enum)]
    pub log_level: Option<LevelFilter>,
}

/// Build the `WorkflowConfig` from CLI arguments, the config file and the environment.
pub fn build_config(args: &Cli) -> Result<WorkflowConfig> {
    let file = config::load_file(args.config.as_deref())
        .context("failed to load configuration")?
        .map(|(_, file)| file);
    let env_root = std::env::var_os(config::ROOT_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let overrides = CliOverrides {
        platform: args.platform,
        binary: args.binary.clone(),
        elf: args.elf.clone(),
        script: args.script.clone(),
        dry_run: args.dry_run,
    };
    Ok(WorkflowConfig::resolve(&overrides, file, env_root))
}

pub fn usage(cfg: &WorkflowConfig) -> String {
    format!(
        "Usage: bfr [OPTIONS] <COMMAND>...\n\nCommands ({}): {}\n\nRun `bfr --help` for options.",
        platform_name(cfg.profile.platform),
        cfg.profile.action_names().join(" ")
    )
}

fn platform_name(platform: Platform) -> &'static str {
    match platform {
        Platform::PosixV1 => "posix-v1",
        Platform::PosixV2 => "posix-v2",
        Platform::Windows => "windows",
    }
}

/// Run the queued commands and return the process exit code.
pub async fn run(args: Cli) -> Result<i32> {
    let cfg = build_config(&args)?;
    let (out_tx, out_handle) = spawn_output_writer();

    if args.commands.is_empty() {
        let _ = out_tx.send(OutputLine::Stdout(usage(&cfg)));
        drop(out_tx);
        let _ = out_handle.await;
        return Ok(1);
    }

    tracing::debug!(?cfg, "Resolved configuration");

    let report = if cfg.dry_run {
        dispatch(&cfg, DryRunRunner, &args, &out_tx).await
    } else {
        // Under --json the tools' stdout would corrupt the report.
        dispatch(&cfg, SystemRunner::new(args.json), &args, &out_tx).await
    };

    if args.json {
        let out = serde_json::to_string_pretty(&report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    }

    drop(out_tx);
    let _ = out_handle.await;

    Ok(if args.strict && !report.all_succeeded() {
        1
    } else {
        0
    })
}

async fn dispatch<R: ProcessRunner>(
    cfg: &WorkflowConfig,
    runner: R,
    args: &Cli,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> RunReport {
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel::<Notice>();
    let dispatcher = Dispatcher::new(cfg, runner, notice_tx);
    let json = args.json;

    let run = async move {
        // Dropping the dispatcher closes the event channel and ends the render loop.
        let report = dispatcher.run_queue(&args.commands).await;
        drop(dispatcher);
        report
    };
    let render = async {
        while let Some(notice) = notice_rx.recv().await {
            let line = match notice {
                Notice::Event(ev) => render_event(&ev, json),
                Notice::Sync(ack) => Some(OutputLine::Sync(ack)),
            };
            if let Some(line) = line {
                let _ = out_tx.send(line);
            }
        }
    };

    let (report, ()) = tokio::join!(run, render);
    report
}

/// Turn an event into a user-facing line. In JSON mode stdout is reserved for the report.
fn render_event(ev: &WorkflowEvent, json: bool) -> Option<OutputLine> {
    let (to_stdout, msg) = match ev {
        WorkflowEvent::CommandStarted { action } => (false, format!("== {} ==", action.as_str())),
        WorkflowEvent::UnknownCommand { token } => (true, format!("Unknown command: {token}")),
        WorkflowEvent::PhaseEntered { .. } => return None,
        WorkflowEvent::ToolStarted {
            command,
            background,
        } => {
            let suffix = if *background { " &" } else { "" };
            (true, format!("$ {command}{suffix}"))
        }
        WorkflowEvent::ToolFinished { program, exit } => {
            if exit.success() {
                return None;
            }
            (true, format!("{program} exited with {exit}"))
        }
        WorkflowEvent::ServerStopped { program, forced } => {
            let verb = if *forced { "Killed" } else { "Stopped" };
            (false, format!("{verb} {program}"))
        }
        WorkflowEvent::Warning(msg) => (true, format!("Warning: {msg}")),
        WorkflowEvent::CommandFailed { action, message } => {
            (true, format!("Error: {} aborted: {message}", action.as_str()))
        }
    };

    Some(if to_stdout && !json {
        OutputLine::Stdout(msg)
    } else {
        OutputLine::Stderr(msg)
    })
}
