//! Build plan model: ordered stages, their instructions, and the
//! content-addressed layer keys derived from them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BuildError;
use crate::runtime::is_toolchain_package;

/// A single Dockerfile instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Run(String),
    Env {
        key: String,
        value: String,
    },
    Workdir(String),
    Copy {
        /// Earlier stage to copy from; `None` copies from the build context.
        from: Option<String>,
        sources: Vec<String>,
        dest: String,
        /// Digest of the local inputs, folded into the layer key.
        inputs: Option<String>,
    },
    User {
        uid: u32,
        gid: u32,
    },
    /// A build-time self check. Rendered as `RUN`; a failure aborts the build.
    Check(String),
    Expose(u16),
    Healthcheck {
        interval_secs: u64,
        timeout_secs: u64,
        start_period_secs: u64,
        retries: u32,
        command: Vec<String>,
    },
    Cmd(Vec<String>),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(cmd) | Self::Check(cmd) => write!(f, "RUN {cmd}"),
            Self::Env { key, value } => write!(f, "ENV {key}={}", quote_env(value)?),
            Self::Workdir(dir) => write!(f, "WORKDIR {dir}"),
            Self::Copy {
                from,
                sources,
                dest,
                ..
            } => {
                write!(f, "COPY ")?;
                if let Some(stage) = from {
                    write!(f, "--from={stage} ")?;
                }
                write!(f, "{} {dest}", sources.join(" "))
            }
            Self::User { uid, gid } => write!(f, "USER {uid}:{gid}"),
            Self::Expose(port) => write!(f, "EXPOSE {port}"),
            Self::Healthcheck {
                interval_secs,
                timeout_secs,
                start_period_secs,
                retries,
                command,
            } => write!(
                f,
                "HEALTHCHECK --interval={interval_secs}s --timeout={timeout_secs}s \
                 --start-period={start_period_secs}s --retries={retries} CMD {}",
                exec_form(command)?
            ),
            Self::Cmd(argv) => write!(f, "CMD {}", exec_form(argv)?),
        }
    }
}

/// A named build phase with its own base image and toolchain scope.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub base: String,
    /// System packages this stage installs.
    pub packages: Vec<String>,
    pub instructions: Vec<Instruction>,
    /// Paths later stages may import.
    pub artifacts: Vec<String>,
}

/// One cacheable layer of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub stage: String,
    pub index: usize,
    pub instruction: String,
    pub key: String,
}

/// Strictly ordered stages; the last one is the runtime image.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    stages: Vec<Stage>,
}

impl BuildPlan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn runtime_stage(&self) -> Option<&Stage> {
        self.stages.last()
    }

    /// Checks the structural invariants of the plan:
    /// - every instruction renders to exactly one Dockerfile line;
    /// - stage names are unique and `COPY --from` only looks backwards;
    /// - the runtime stage installs no toolchain package;
    /// - stage imports precede build-context copies in the runtime stage;
    /// - the runtime stage switches to a non-root user, then runs a self
    ///   check, before its `CMD`.
    pub fn validate(&self) -> Result<(), BuildError> {
        for stage in &self.stages {
            let header = format!("FROM {} AS {}", stage.base, stage.name);
            let lines =
                std::iter::once(header).chain(stage.instructions.iter().map(ToString::to_string));
            for line in lines {
                if line.contains(char::is_control) {
                    return Err(BuildError::ControlCharacter {
                        stage: stage.name.clone(),
                        line,
                    });
                }
            }
        }

        let mut seen: Vec<&str> = Vec::new();
        for stage in &self.stages {
            if seen.contains(&stage.name.as_str()) {
                return Err(BuildError::DuplicateStage(stage.name.clone()));
            }
            for inst in &stage.instructions {
                if let Instruction::Copy {
                    from: Some(from), ..
                } = inst
                {
                    if !seen.contains(&from.as_str()) {
                        return Err(BuildError::BackReference {
                            stage: stage.name.clone(),
                            from: from.clone(),
                        });
                    }
                }
            }
            seen.push(&stage.name);
        }

        let runtime = self.runtime_stage().ok_or(BuildError::EmptyPlan)?;

        if let Some(pkg) = runtime.packages.iter().find(|p| is_toolchain_package(p)) {
            return Err(BuildError::ToolchainInRuntime {
                package: pkg.clone(),
            });
        }

        let mut copied_context = false;
        let mut user: Option<u32> = None;
        let mut checked_as_user = false;
        let mut has_cmd = false;
        for inst in &runtime.instructions {
            match inst {
                Instruction::Copy { from: None, .. } => copied_context = true,
                Instruction::Copy { from: Some(from), .. } if copied_context => {
                    return Err(BuildError::LayerOrder {
                        stage: runtime.name.clone(),
                        detail: format!("import from '{from}' follows a source copy"),
                    });
                }
                Instruction::User { uid, .. } => {
                    user = Some(*uid);
                    checked_as_user = false;
                }
                Instruction::Check(_) if user.is_some() => checked_as_user = true,
                Instruction::Cmd(_) => {
                    match user {
                        None | Some(0) => {
                            return Err(BuildError::RootAtStart {
                                stage: runtime.name.clone(),
                            });
                        }
                        Some(_) => {}
                    }
                    if !checked_as_user {
                        return Err(BuildError::MissingWriteProbe {
                            stage: runtime.name.clone(),
                        });
                    }
                    has_cmd = true;
                }
                _ => {}
            }
        }
        if !has_cmd {
            return Err(BuildError::MissingCmd {
                stage: runtime.name.clone(),
            });
        }

        Ok(())
    }

    /// Content-addressed layer keys.
    ///
    /// Each key hashes its parent key, the rendered instruction and the
    /// digest of any local inputs; imports from another stage fold in that
    /// stage's final key. Unchanged inputs always yield unchanged keys.
    pub fn layers(&self) -> Vec<Layer> {
        let mut stage_keys: HashMap<&str, String> = HashMap::new();
        let mut layers = Vec::new();

        for stage in &self.stages {
            let mut key = digest([&b"FROM "[..], stage.base.as_bytes()]);
            for (index, inst) in stage.instructions.iter().enumerate() {
                let rendered = inst.to_string();
                let extra = match inst {
                    Instruction::Copy {
                        from: Some(from), ..
                    } => stage_keys
                        .get(from.as_str())
                        .cloned()
                        // arch-lint: allow(no-silent-result-drop) reason="validate() rejects imports from unknown stages"
                        .unwrap_or_default(),
                    Instruction::Copy {
                        inputs: Some(inputs),
                        ..
                    } => inputs.clone(),
                    _ => String::new(),
                };
                key = digest([key.as_bytes(), rendered.as_bytes(), extra.as_bytes()]);
                layers.push(Layer {
                    stage: stage.name.clone(),
                    index,
                    instruction: rendered,
                    key: key.clone(),
                });
            }
            stage_keys.insert(stage.name.as_str(), key);
        }

        layers
    }

    /// Renders the plan as a multi-stage Dockerfile.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push_str(&format!("# === Stage {}: {} ===\n", idx + 1, stage.name));
            out.push_str(&format!("FROM {} AS {}\n", stage.base, stage.name));
            for inst in &stage.instructions {
                out.push_str(&inst.to_string());
                out.push('\n');
            }
        }
        out
    }
}

fn digest<const N: usize>(parts: [&[u8]; N]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of a local input.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// JSON array form, one escaped string per argument.
fn exec_form(argv: &[String]) -> Result<String, fmt::Error> {
    let quoted = argv
        .iter()
        .map(|arg| json_string(arg))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("[{}]", quoted.join(", ")))
}

fn json_string(value: &str) -> Result<String, fmt::Error> {
    serde_json::to_string(value).map_err(|_| fmt::Error)
}

fn quote_env(value: &str) -> Result<String, fmt::Error> {
    let bare = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, '"' | '\\' | '\''));
    if bare {
        Ok(value.to_owned())
    } else {
        json_string(value)
    }
}
