use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Address programmed by the flashing tool: start of STM32 main flash.
pub const FLASH_ADDRESS: &str = "0x08000000";

/// A program plus its leading arguments.
///
/// Deserializes from a non-empty list of strings, e.g. `["make", "-j8"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns a copy with `extra` appended to the argument list.
    pub fn with_args<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = self.clone();
        cmd.args.extend(extra.into_iter().map(Into::into));
        cmd
    }
}

impl TryFrom<Vec<String>> for ToolCommand {
    type Error = ConfigError;

    fn try_from(mut parts: Vec<String>) -> Result<Self, Self::Error> {
        if parts.is_empty() || parts[0].trim().is_empty() {
            return Err(ConfigError::EmptyTool);
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
        })
    }
}

impl From<ToolCommand> for Vec<String> {
    fn from(cmd: ToolCommand) -> Self {
        std::iter::once(cmd.program).chain(cmd.args).collect()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// How an external tool finished. `code` is `None` when it was ended by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExit {
    pub code: Option<i32>,
}

impl ToolExit {
    pub const SUCCESS: ToolExit = ToolExit { code: Some(0) };

    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ToolExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ToolExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Host OS / toolchain combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    /// OpenOCD + gdb-multiarch, `run` attaches without flashing
    PosixV1,
    /// OpenOCD + gdb-multiarch, `flashrun` flashes then attaches
    PosixV2,
    /// st-util + arm-none-eabi-gdb.exe, `run` attaches without flashing
    Windows,
}

impl Platform {
    pub fn host_default() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::PosixV2
        }
    }
}

/// A recognized command token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Clean,
    Build,
    Flash,
    Run,
    FlashRun,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Clean => "clean",
            Action::Build => "build",
            Action::Flash => "flash",
            Action::Run => "run",
            Action::FlashRun => "flashrun",
        }
    }
}

/// States of the composite debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    Flashing,
    ServerStarting,
    ScriptCheck,
    Debugging,
    Teardown,
}

/// Progress emitted by the dispatcher and consumed by the output layer.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    CommandStarted { action: Action },
    UnknownCommand { token: String },
    PhaseEntered { phase: SessionPhase },
    ToolStarted { command: ToolCommand, background: bool },
    ToolFinished { program: String, exit: ToolExit },
    ServerStopped { program: String, forced: bool },
    Warning(String),
    CommandFailed { action: Action, message: String },
}

/// Result of one queued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    ToolFailed { program: String, exit: ToolExit },
    Failed { error: String },
    Unknown,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReport {
    pub token: String,
    pub action: Option<Action>,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub started_utc: String,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub platform: Platform,
    pub dry_run: bool,
    pub commands: Vec<CommandReport>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.commands.iter().all(|c| c.outcome.is_success())
    }
}
