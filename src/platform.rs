//! Built-in tool profiles and dispatch tables, one per supported platform.

use crate::model::{Action, Platform, ToolCommand};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// OpenOCD's Tcl control port.
const OPENOCD_TCL_PORT: u16 = 6666;

/// How the dispatcher decides the debug server is ready for a debugger connection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Readiness {
    /// Sleep a fixed duration after spawning the server.
    Delay {
        #[serde(with = "humantime_serde", default = "default_delay")]
        delay: Duration,
    },
    /// Poll a TCP connect to `addr` until it succeeds or `timeout` elapses.
    Port {
        addr: SocketAddr,
        #[serde(with = "humantime_serde", default = "default_port_timeout")]
        timeout: Duration,
        #[serde(with = "humantime_serde", default = "default_poll_interval")]
        poll_interval: Duration,
    },
}

fn default_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_port_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

/// What the composite action does before attaching the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPolicy {
    AttachOnly,
    FlashThenAttach,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub build: ToolCommand,
    pub clean_target: &'static str,
    pub flash: ToolCommand,
    pub server: ToolCommand,
    pub debugger: ToolCommand,
    pub script_name: &'static str,
    pub readiness: Readiness,
    actions: &'static [(Action, Option<SessionPolicy>)],
}

impl PlatformProfile {
    pub fn for_platform(platform: Platform) -> Self {
        let openocd = ToolCommand::new(
            "openocd",
            ["-f", "interface/stlink.cfg", "-f", "target/stm32f4x.cfg"],
        );
        let openocd_ready = Readiness::Port {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, OPENOCD_TCL_PORT)),
            timeout: default_port_timeout(),
            poll_interval: default_poll_interval(),
        };

        match platform {
            Platform::PosixV1 => Self {
                platform,
                build: ToolCommand::new("make", Vec::<String>::new()),
                clean_target: "clean",
                flash: ToolCommand::new("st-flash", Vec::<String>::new()),
                server: openocd,
                debugger: ToolCommand::new("gdb-multiarch", Vec::<String>::new()),
                script_name: "gdbscript",
                readiness: openocd_ready,
                actions: &[
                    (Action::Clean, None),
                    (Action::Build, None),
                    (Action::Run, Some(SessionPolicy::AttachOnly)),
                ],
            },
            Platform::PosixV2 => Self {
                platform,
                build: ToolCommand::new("make", Vec::<String>::new()),
                clean_target: "clean",
                flash: ToolCommand::new("st-flash", Vec::<String>::new()),
                server: openocd,
                debugger: ToolCommand::new("gdb-multiarch", Vec::<String>::new()),
                script_name: "gdbscript",
                readiness: openocd_ready,
                actions: &[
                    (Action::Clean, None),
                    (Action::Build, None),
                    (Action::Flash, None),
                    (Action::FlashRun, Some(SessionPolicy::FlashThenAttach)),
                ],
            },
            // st-util quits once its first client disconnects, so a connect probe
            // would consume the session meant for the debugger.
            Platform::Windows => Self {
                platform,
                build: ToolCommand::new("make", Vec::<String>::new()),
                clean_target: "clean",
                flash: ToolCommand::new("st-flash", Vec::<String>::new()),
                server: ToolCommand::new("st-util", Vec::<String>::new()),
                debugger: ToolCommand::new("arm-none-eabi-gdb.exe", Vec::<String>::new()),
                script_name: "gdbscript_windows",
                readiness: Readiness::Delay {
                    delay: default_delay(),
                },
                actions: &[
                    (Action::Clean, None),
                    (Action::Build, None),
                    (Action::Flash, None),
                    (Action::Run, Some(SessionPolicy::AttachOnly)),
                ],
            },
        }
    }

    /// Resolve a command token against this platform's dispatch table.
    pub fn lookup(&self, token: &str) -> Option<Action> {
        self.actions
            .iter()
            .map(|(action, _)| *action)
            .find(|action| action.as_str() == token)
    }

    /// Session policy for a composite action, `None` for simple actions.
    pub fn session_policy(&self, action: Action) -> Option<SessionPolicy> {
        self.actions
            .iter()
            .find(|(a, _)| *a == action)
            .and_then(|(_, policy)| *policy)
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|(a, _)| a.as_str()).collect()
    }
}
