//! Launches the HTTP server as a single child process.
//!
//! ```text
//! Supervisor::run
//!   1. Preflight ── not root, uploads writable, port bindable
//!   2. Spawn     ── exactly one server process
//!   3. Wait      ── SIGTERM/SIGINT forwarded to the child
//!                   health gate (optional) terminates it when unhealthy
//!                   SIGKILL once the shutdown grace period runs out
//!   4. Exit      ── 0 graceful, 1 unhealthy, server code otherwise
//! ```

use std::net::TcpListener;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use strata_core::{ServerConfig, StrataConfig};
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::Instant;

use crate::health::{HealthGate, HealthProbe, HealthStatus};
use crate::uploads::{ProvisionError, write_probe};

/// Exit code for configuration and preflight failures.
pub const EXIT_CONFIG: i32 = 2;

/// Server settings after environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub server: ServerConfig,
    /// Name of the variable the upload root is advertised under.
    pub uploads_var: String,
    pub uploads_dir: PathBuf,
}

impl SupervisorConfig {
    /// Loads `.env` (if present) and applies process environment overrides.
    pub fn from_env(base: &StrataConfig) -> Result<Self, SupervisorError> {
        let dotenv_loaded = dotenvy::dotenv().is_ok();
        tracing::debug!(dotenv = dotenv_loaded, "loading supervisor settings");
        Self::from_lookup(base, |key| {
            std::env::var(key)
                // arch-lint: allow(no-silent-result-drop) reason="an unset or non-UTF-8 variable keeps the strata.toml value"
                .ok()
        })
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(base: &StrataConfig, lookup: F) -> Result<Self, SupervisorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut server = base.server.clone();
        if let Some(module) = lookup("APP_MODULE") {
            server.module = module;
        }
        if let Some(host) = lookup("HOST") {
            server.host = host;
        }
        if let Some(value) = lookup("PORT") {
            server.port = parse_number("PORT", &value)?;
        }
        if let Some(value) = lookup("WORKERS") {
            server.workers = parse_number("WORKERS", &value)?;
        }
        if let Some(value) = lookup("LIMIT_CONCURRENCY") {
            server.limit_concurrency = parse_number("LIMIT_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("KEEP_ALIVE") {
            server.keep_alive = parse_number("KEEP_ALIVE", &value)?;
        }
        if let Some(value) = lookup("ACCESS_LOG") {
            server.access_log = parse_bool("ACCESS_LOG", &value)?;
        }

        let uploads_var = base.uploads.env_var.clone();
        let uploads_dir = match lookup(&uploads_var) {
            Some(dir) => dir,
            None => base.uploads.path.clone(),
        };

        if server.port == 0 {
            return Err(SupervisorError::InvalidEnv {
                var: "PORT".to_owned(),
                value: "0".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if server.workers == 0 {
            return Err(SupervisorError::InvalidEnv {
                var: "WORKERS".to_owned(),
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            server,
            uploads_var,
            uploads_dir: PathBuf::from(uploads_dir),
        })
    }
}

fn parse_number<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, SupervisorError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| SupervisorError::InvalidEnv {
            var: var.to_owned(),
            value: value.to_owned(),
            reason: e.to_string(),
        })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, SupervisorError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SupervisorError::InvalidEnv {
            var: var.to_owned(),
            value: value.to_owned(),
            reason: "expected true or false".to_owned(),
        }),
    }
}

/// How the supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Graceful,
    Unhealthy,
    Server(i32),
}

impl Exit {
    pub fn code(self) -> i32 {
        match self {
            Self::Graceful => 0,
            Self::Unhealthy => 1,
            Self::Server(code) => code,
        }
    }

    /// Maps a child exit status. A child that dies from the signal we
    /// forwarded to it shut down gracefully.
    pub fn from_status(status: ExitStatus, forwarded: Option<Signal>) -> Self {
        if status.success() {
            return Self::Graceful;
        }
        if let Some(code) = status.code() {
            return Self::Server(code);
        }
        match status.signal() {
            Some(sig) if forwarded.is_some_and(|f| f as i32 == sig) => Self::Graceful,
            Some(sig) => Self::Server(128 + sig),
            None => Self::Server(1),
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    command: Vec<String>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let command = config.server.argv();
        Self { config, command }
    }

    /// Replaces the server command line, keeping preflight and signal
    /// handling.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Preflight for the current effective uid.
    pub fn preflight(&self) -> Result<(), SupervisorError> {
        self.preflight_as(nix::unistd::geteuid().as_raw())
    }

    /// Refuses root, then checks the upload root and the listen address.
    pub fn preflight_as(&self, euid: u32) -> Result<(), SupervisorError> {
        if euid == 0 {
            return Err(SupervisorError::RunningAsRoot);
        }

        write_probe(&self.config.uploads_dir).map_err(|e| SupervisorError::Uploads {
            path: self.config.uploads_dir.clone(),
            source: e,
        })?;

        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).map_err(|e| SupervisorError::PortUnavailable {
            addr: addr.clone(),
            source: e,
        })?;
        drop(listener);

        tracing::debug!(uid = euid, addr = %addr, "preflight passed");
        Ok(())
    }

    /// Spawns the server and waits for it. With a gate, an UNHEALTHY
    /// verdict terminates the server and yields [`Exit::Unhealthy`].
    ///
    /// A server still running `shutdown_grace_secs` after the first
    /// SIGTERM/SIGINT is killed.
    pub async fn run<P: HealthProbe>(
        &self,
        gate: Option<&HealthGate<P>>,
    ) -> Result<Exit, SupervisorError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(SupervisorError::EmptyCommand)?;

        let mut sigterm =
            signal(SignalKind::terminate()).map_err(|e| SupervisorError::Signals { source: e })?;
        let mut sigint =
            signal(SignalKind::interrupt()).map_err(|e| SupervisorError::Signals { source: e })?;

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .env(&self.config.uploads_var, &self.config.uploads_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::Spawn {
                program: program.clone(),
                source: e,
            })?;
        let pid = child.id().ok_or(SupervisorError::ExitedEarly)?;
        tracing::info!(pid, command = %self.command.join(" "), "server started");

        let health = async {
            match gate {
                Some(gate) => gate.run(std::future::pending::<()>()).await,
                None => std::future::pending::<HealthStatus>().await,
            }
        };
        tokio::pin!(health);

        let grace = self.config.server.shutdown_grace();
        let escalation = tokio::time::sleep(grace);
        tokio::pin!(escalation);
        let mut escalating = false;

        let mut forwarded: Option<Signal> = None;
        let mut unhealthy = false;
        let mut gate_done = false;
        let status = loop {
            let stop = tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| SupervisorError::Wait { source: e })?;
                }
                _ = sigterm.recv() => Signal::SIGTERM,
                _ = sigint.recv() => Signal::SIGINT,
                status = &mut health, if !gate_done => {
                    gate_done = true;
                    if status != HealthStatus::Unhealthy {
                        continue;
                    }
                    tracing::error!(pid, "health gate reported unhealthy; stopping server");
                    unhealthy = true;
                    Signal::SIGTERM
                }
                () = &mut escalation, if escalating => {
                    escalating = false;
                    tracing::warn!(
                        pid,
                        grace_secs = grace.as_secs(),
                        "server outlived the shutdown grace period; killing it"
                    );
                    forward(pid, Signal::SIGKILL)?;
                    continue;
                }
            };

            forwarded = Some(stop);
            forward(pid, stop)?;
            if !escalating {
                escalation.as_mut().reset(Instant::now() + grace);
                escalating = true;
            }
        };

        let exit = if unhealthy {
            Exit::Unhealthy
        } else {
            Exit::from_status(status, forwarded)
        };
        tracing::info!(code = exit.code(), "server exited");
        Ok(exit)
    }
}

fn forward(pid: u32, sig: Signal) -> Result<(), SupervisorError> {
    tracing::info!(pid, signal = sig.as_str(), "forwarding signal");
    kill(Pid::from_raw(pid as i32), sig).map_err(|e| SupervisorError::Forward {
        signal: sig.as_str(),
        source: e,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    #[error("refusing to start the server as root")]
    RunningAsRoot,

    #[error("upload directory {path} failed the write probe")]
    Uploads {
        path: PathBuf,
        source: ProvisionError,
    },

    #[error("cannot bind {addr}")]
    PortUnavailable {
        addr: String,
        source: std::io::Error,
    },

    #[error("server command is empty")]
    EmptyCommand,

    #[error("server exited before it could be supervised")]
    ExitedEarly,

    #[error("failed to install signal handlers")]
    Signals { source: std::io::Error },

    #[error("failed to start {program}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to wait for the server process")]
    Wait { source: std::io::Error },

    #[error("failed to forward {signal} to the server")]
    Forward {
        signal: &'static str,
        source: nix::errno::Errno,
    },
}

impl SupervisorError {
    /// Every supervisor error happens before or around start-up.
    pub fn exit_code(&self) -> i32 {
        EXIT_CONFIG
    }
}
