use std::process::{ExitStatus, Stdio};

use tokio::process::Command;

use crate::docker::EngineError;

/// Runs container engine subcommands. Everything above this trait only
/// ever sees argument vectors, so tests swap in a mockall mock.
#[allow(async_fn_in_trait)]
pub trait ContainerEngine: Send + Sync {
    /// Runs `args` and returns captured stdout.
    async fn exec(&self, args: &[String]) -> Result<String, EngineError>;

    /// Runs `args` with output passed through, for long builds.
    async fn exec_streaming(&self, args: &[String]) -> Result<(), EngineError>;
}

/// A docker-compatible CLI: `docker` unless told otherwise.
pub struct DockerEngine {
    program: String,
}

impl DockerEngine {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    /// Drives another CLI with the same subcommands, e.g. `podman`.
    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_owned(),
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn unavailable(&self, source: std::io::Error) -> EngineError {
        EngineError::NotFound {
            program: self.program.clone(),
            source,
        }
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerEngine for DockerEngine {
    async fn exec(&self, args: &[String]) -> Result<String, EngineError> {
        let output = self
            .command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.unavailable(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(args, output.status, stderr.trim()));
        }
        String::from_utf8(output.stdout).map_err(|e| EngineError::InvalidUtf8 { source: e })
    }

    async fn exec_streaming(&self, args: &[String]) -> Result<(), EngineError> {
        tracing::debug!(program = %self.program, args = %args.join(" "), "running engine command");
        let status = self
            .command(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.unavailable(e))?;

        if status.success() {
            Ok(())
        } else {
            Err(failed(args, status, "output shown above"))
        }
    }
}

fn failed(args: &[String], status: ExitStatus, detail: &str) -> EngineError {
    let stderr = match status.code() {
        Some(code) => format!("exit code {code}: {detail}"),
        None => format!("terminated by a signal: {detail}"),
    };
    EngineError::CommandFailed {
        args: args.to_vec(),
        stderr,
    }
}
