//! Layered configuration.
//!
//! Built-in platform profile, then an optional TOML file, then `BFR_ROOT`, then CLI flags.
//! The result is an immutable [`WorkflowConfig`] built once at startup.

use crate::error::ConfigError;
use crate::model::{Platform, ToolCommand};
use crate::platform::{PlatformProfile, Readiness};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the directory that holds the debugger script.
pub const ROOT_ENV: &str = "BFR_ROOT";

const LOCAL_CONFIG: &str = "bfr.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    /// Pause after flashing so the flashing tool releases the probe.
    pub flash_settle: Duration,
    /// Pause after the debugger exits so target serial output can drain.
    pub uart_flush: Duration,
    /// How long a terminated server gets before it is killed.
    pub server_shutdown_grace: Duration,
    pub debugger_timeout: Option<Duration>,
    pub tool_timeout: Option<Duration>,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            flash_settle: Duration::from_millis(300),
            uart_flush: Duration::from_millis(500),
            server_shutdown_grace: Duration::from_secs(5),
            debugger_timeout: None,
            tool_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    pub profile: PlatformProfile,
    pub binary: PathBuf,
    pub elf: PathBuf,
    pub script: PathBuf,
    pub timing: Timing,
    pub dry_run: bool,
}

/// Values taken from the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub platform: Option<Platform>,
    pub binary: Option<PathBuf>,
    pub elf: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub platform: Option<Platform>,
    pub binary: Option<PathBuf>,
    pub elf: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub tools: ToolOverrides,
    pub timing: TimingOverrides,
    pub readiness: Option<Readiness>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolOverrides {
    pub build: Option<ToolCommand>,
    pub flash: Option<ToolCommand>,
    pub server: Option<ToolCommand>,
    pub debugger: Option<ToolCommand>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingOverrides {
    #[serde(with = "humantime_serde")]
    pub flash_settle: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub uart_flush: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub server_shutdown_grace: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub debugger_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub tool_timeout: Option<Duration>,
}

impl FileConfig {
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Find and parse the configuration file, if any.
///
/// An explicit path must exist. Otherwise `./bfr.toml` and then the user config
/// directory are tried, and a missing file is not an error.
pub fn load_file(explicit: Option<&Path>) -> Result<Option<(PathBuf, FileConfig)>, ConfigError> {
    let path = match explicit {
        Some(p) if p.is_file() => p.to_path_buf(),
        Some(p) => return Err(ConfigError::NotFound(p.to_path_buf())),
        None => match discover() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let parsed = FileConfig::parse(&path, &text)?;
    tracing::debug!("Loaded configuration from {}", path.display());
    Ok(Some((path, parsed)))
}

fn discover() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|d| d.join("bfr").join("config.toml"))
        .filter(|p| p.is_file())
}

impl WorkflowConfig {
    /// Merge all layers. `env_root` is the value of [`ROOT_ENV`], if set.
    pub fn resolve(cli: &CliOverrides, file: Option<FileConfig>, env_root: Option<PathBuf>) -> Self {
        let file = file.unwrap_or_default();
        let platform = cli
            .platform
            .or(file.platform)
            .unwrap_or_else(Platform::host_default);

        let mut profile = PlatformProfile::for_platform(platform);
        let FileConfig {
            tools,
            timing: timing_overrides,
            readiness,
            ..
        } = file;
        if let Some(build) = tools.build {
            profile.build = build;
        }
        if let Some(flash) = tools.flash {
            profile.flash = flash;
        }
        if let Some(server) = tools.server {
            profile.server = server;
        }
        if let Some(debugger) = tools.debugger {
            profile.debugger = debugger;
        }
        if let Some(readiness) = readiness {
            profile.readiness = readiness;
        }

        let defaults = Timing::default();
        let timing = Timing {
            flash_settle: timing_overrides
                .flash_settle
                .unwrap_or(defaults.flash_settle),
            uart_flush: timing_overrides.uart_flush.unwrap_or(defaults.uart_flush),
            server_shutdown_grace: timing_overrides
                .server_shutdown_grace
                .unwrap_or(defaults.server_shutdown_grace),
            debugger_timeout: timing_overrides.debugger_timeout,
            tool_timeout: timing_overrides.tool_timeout,
        };

        let script = cli.script.clone().or(file.script).unwrap_or_else(|| {
            env_root
                .unwrap_or_else(|| PathBuf::from("."))
                .join(profile.script_name)
        });

        let mut cfg = Self {
            profile,
            binary: cli
                .binary
                .clone()
                .or(file.binary)
                .unwrap_or_else(|| PathBuf::from("./BareBones.bin")),
            elf: cli
                .elf
                .clone()
                .or(file.elf)
                .unwrap_or_else(|| PathBuf::from("./BareBones.elf")),
            script,
            timing,
            dry_run: false,
        };
        if cli.dry_run {
            cfg = cfg.into_dry_run();
        }
        cfg
    }

    /// Nothing is spawned in a dry run, so there is nothing to wait for.
    pub fn into_dry_run(mut self) -> Self {
        self.dry_run = true;
        self.timing.flash_settle = Duration::ZERO;
        self.timing.uart_flush = Duration::ZERO;
        self.profile.readiness = Readiness::Delay {
            delay: Duration::ZERO,
        };
        self
    }
}
