//! Error types for the workflow dispatcher.
//!
//! `WorkflowError` covers failures inside a single queued command. These never cross a
//! command boundary: the dispatcher records them in the run report and moves on.
//! `ConfigError` covers startup failures, which are fatal.

use crate::model::ToolExit;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("debugger script not found: {}", path.display())]
    ScriptMissing { path: PathBuf },

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` did not finish within {}", humantime::format_duration(*after))]
    TimedOut { program: String, after: Duration },

    #[error(
        "debug server did not accept connections on {addr} within {}",
        humantime::format_duration(*timeout)
    )]
    ServerNotReady { addr: String, timeout: Duration },

    #[error("debug server exited before it became ready ({exit})")]
    ServerExited { exit: ToolExit },

    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("tool command must name a program, got an empty list")]
    EmptyTool,
}
