use strata_core::{Manifest, PackageManager, Packaging, StagerConfig};

use crate::plan::{Instruction, Stage, content_digest};
use crate::runtime::{NativeLibrary, install_command, push_unique};

/// Name of the dependency stage.
pub const BUILDER_STAGE: &str = "builder";

/// Prefix used by the `prefix` packaging strategy.
const PREFIX_DIR: &str = "/install";

/// What the runtime stage imports from the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedEnvironment {
    pub stage: String,
    /// Path inside the builder.
    pub source: String,
    /// Path inside the runtime image.
    pub target: String,
    /// Directory to prepend to `PATH`, if the layout needs one.
    pub bin_dir: Option<String>,
}

/// Resolves and compiles the manifest into an isolated, relocatable
/// environment, using a toolchain that exists only in this stage.
pub struct DependencyStager<'a> {
    config: &'a StagerConfig,
    manifest: &'a Manifest,
    manifest_path: &'a str,
    libraries: &'a [NativeLibrary],
}

impl<'a> DependencyStager<'a> {
    pub fn new(
        config: &'a StagerConfig,
        manifest: &'a Manifest,
        manifest_path: &'a str,
        libraries: &'a [NativeLibrary],
    ) -> Self {
        Self {
            config,
            manifest,
            manifest_path,
            libraries,
        }
    }

    /// Toolchain packages, in a stable order: base toolchain, linked
    /// library headers, then configured extras.
    pub fn toolchain(&self) -> Vec<String> {
        let base = match self.config.package_manager() {
            PackageManager::Apt => "build-essential",
            PackageManager::Apk => "build-base",
        };
        let mut packages = vec![base.to_owned()];
        for lib in self.libraries {
            push_unique(&mut packages, &lib.build);
        }
        for pkg in &self.config.toolchain {
            push_unique(&mut packages, pkg);
        }
        packages
    }

    pub fn environment(&self) -> StagedEnvironment {
        match self.config.packaging {
            Packaging::Venv => StagedEnvironment {
                stage: BUILDER_STAGE.to_owned(),
                source: self.config.env_path.clone(),
                target: self.config.env_path.clone(),
                bin_dir: Some(format!("{}/bin", self.config.env_path)),
            },
            Packaging::Prefix => StagedEnvironment {
                stage: BUILDER_STAGE.to_owned(),
                source: PREFIX_DIR.to_owned(),
                target: "/usr/local".to_owned(),
                bin_dir: None,
            },
        }
    }

    pub fn stage(&self) -> Stage {
        let toolchain = self.toolchain();
        let env = self.environment();
        let mut instructions = vec![
            env_var("PYTHONDONTWRITEBYTECODE", "1"),
            env_var("PIP_NO_CACHE_DIR", "1"),
            env_var("PIP_DISABLE_PIP_VERSION_CHECK", "1"),
        ];
        if let Some(cmd) = install_command(self.config.package_manager(), &toolchain) {
            instructions.push(Instruction::Run(cmd));
        }

        let install = match self.config.packaging {
            Packaging::Venv => {
                instructions.push(Instruction::Run(format!(
                    "python -m venv {}",
                    self.config.env_path
                )));
                instructions.push(env_var("PATH", &format!("{}/bin:$PATH", self.config.env_path)));
                "pip install --no-cache-dir -r requirements.txt".to_owned()
            }
            Packaging::Prefix => {
                format!("pip install --no-cache-dir --prefix={PREFIX_DIR} -r requirements.txt")
            }
        };

        instructions.push(Instruction::Workdir("/build".to_owned()));
        instructions.push(Instruction::Copy {
            from: None,
            sources: vec![self.manifest_path.to_owned()],
            dest: "requirements.txt".to_owned(),
            inputs: Some(content_digest(self.manifest.content().as_bytes())),
        });
        instructions.push(Instruction::Run(format!(
            "{install} && find {} -name __pycache__ -prune -exec rm -rf {{}} +",
            env.source
        )));

        tracing::debug!(
            requirements = self.manifest.requirements().len(),
            toolchain = ?toolchain,
            "planned dependency stage"
        );

        Stage {
            name: BUILDER_STAGE.to_owned(),
            base: self.config.image.clone(),
            packages: toolchain,
            instructions,
            artifacts: vec![env.source],
        }
    }
}

fn env_var(key: &str, value: &str) -> Instruction {
    Instruction::Env {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}
