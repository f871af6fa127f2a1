use std::fmt;
use std::path::Path;

use strata_core::RuntimeIdentity;

use crate::docker::EngineError;
use crate::executor::{ContainerEngine, DockerEngine};

/// Binaries that must not be resolvable inside a runtime image.
pub const TOOLCHAIN_BINARIES: &[&str] = &["gcc", "cc", "g++", "make"];

/// Container engine client, parameterized over the executor for testability.
pub struct EngineClient<E: ContainerEngine = DockerEngine> {
    executor: E,
}

impl EngineClient<DockerEngine> {
    pub fn new() -> Self {
        Self {
            executor: DockerEngine::new(),
        }
    }
}

impl Default for EngineClient<DockerEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ContainerEngine> EngineClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Doctor ──

    /// Run the engine checks without early return. Project checks
    /// (`config_file`, `manifest`) are filled in by the caller.
    pub async fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport::default();

        // 1. CLI
        match self
            .executor
            .exec(&args(["version", "--format", "{{.Client.Version}}"]))
            .await
        {
            Ok(v) => report.engine = CheckResult::ok(v.trim()),
            Err(e) => report.engine = CheckResult::fail(&e.to_string()),
        }

        // 2. Daemon
        match self
            .executor
            .exec(&args(["info", "--format", "{{.ServerVersion}}"]))
            .await
        {
            Ok(v) if !v.trim().is_empty() => {
                report.daemon = CheckResult::ok(&format!("server {}", v.trim()));
            }
            _ => report.daemon = CheckResult::fail("daemon not reachable"),
        }

        report
    }

    // ── Build ──

    /// Builds the bundle, optionally stopping at `target`.
    pub async fn build(
        &self,
        bundle_dir: &Path,
        tag: &str,
        target: Option<&str>,
    ) -> Result<(), BuildError> {
        let bundle_str = bundle_dir
            .to_str()
            .ok_or_else(|| BuildError::InvalidPath(bundle_dir.to_path_buf()))?;

        let mut cmd = args(["build", "--tag", tag]);
        if let Some(target) = target {
            cmd.push("--target".to_owned());
            cmd.push(target.to_owned());
        }
        cmd.push(bundle_str.to_owned());

        tracing::debug!(tag, target, "building image");
        self.executor
            .exec_streaming(&cmd)
            .await
            .map_err(|e| BuildError::Build { source: e })
    }

    // ── Inspection ──

    /// The `USER` the image starts its process as, empty when unset.
    pub async fn image_user(&self, tag: &str) -> Result<String, VerifyError> {
        let user = self
            .executor
            .exec(&args(["image", "inspect", "--format", "{{.Config.User}}", tag]))
            .await
            .map_err(|e| VerifyError::Inspect { source: e })?;
        Ok(user.trim().to_owned())
    }

    /// Paths of the given binaries that resolve inside the image.
    pub async fn find_binaries(
        &self,
        tag: &str,
        binaries: &[&str],
    ) -> Result<Vec<String>, VerifyError> {
        let script = format!(
            "for b in {}; do command -v \"$b\" || true; done",
            binaries.join(" ")
        );
        let output = self
            .executor
            .exec(&args(["run", "--rm", "--entrypoint", "sh", tag, "-c", &script]))
            .await
            .map_err(|e| VerifyError::Inspect { source: e })?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }

    /// Checks the built image: it starts as `identity`, never as root, and
    /// carries no compiler toolchain.
    pub async fn verify_image(
        &self,
        tag: &str,
        identity: &RuntimeIdentity,
    ) -> Result<ImageReport, VerifyError> {
        let user = self.image_user(tag).await?;
        if is_root_user(&user) {
            return Err(VerifyError::RootUser { user });
        }
        let expected = format!("{}:{}", identity.uid, identity.gid);
        if user != expected {
            return Err(VerifyError::UserMismatch {
                expected,
                actual: user,
            });
        }

        let found = self.find_binaries(tag, TOOLCHAIN_BINARIES).await?;
        if !found.is_empty() {
            return Err(VerifyError::ToolchainPresent { binaries: found });
        }

        Ok(ImageReport {
            tag: tag.to_owned(),
            user,
        })
    }

    pub async fn remove_image(&self, tag: &str) -> Result<(), EngineError> {
        self.executor
            .exec(&args(["image", "rm", "--force", tag]))
            .await
            .map(|_| ())
    }
}

fn is_root_user(user: &str) -> bool {
    let name = match user.split_once(':') {
        Some((name, _)) => name,
        None => user,
    };
    name.is_empty() || name == "root" || name == "0"
}

// ── Helper ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

// ── Doctor types ──

#[derive(Debug, Default)]
pub struct DoctorReport {
    pub engine: CheckResult,
    pub daemon: CheckResult,
    pub config_file: CheckResult,
    pub manifest: CheckResult,
}

impl DoctorReport {
    pub fn all_passed(&self) -> bool {
        self.engine.passed && self.daemon.passed && self.config_file.passed && self.manifest.passed
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Container engine", &self.engine),
            ("Engine daemon", &self.daemon),
            ("strata.toml", &self.config_file),
            ("Manifest", &self.manifest),
        ];
        for (label, check) in rows {
            writeln!(f, "  {:<18} {}  {}", label, check.icon(), check.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReport {
    pub tag: String,
    pub user: String,
}

// ── Error types ──

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("bundle path is not valid UTF-8: {0}")]
    InvalidPath(std::path::PathBuf),

    #[error("image build failed")]
    Build { source: EngineError },
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("failed to inspect image")]
    Inspect { source: EngineError },

    #[error("image starts as root (USER '{user}')")]
    RootUser { user: String },

    #[error("image starts as '{actual}', expected '{expected}'")]
    UserMismatch { expected: String, actual: String },

    #[error("toolchain binaries present in runtime image: {}", binaries.join(", "))]
    ToolchainPresent { binaries: Vec<String> },
}
