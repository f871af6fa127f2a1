use strata_core::StrataConfig;

use crate::plan::{Instruction, Stage};
use crate::provision::PermissionProvisioner;
use crate::runtime::RuntimeBase;
use crate::stager::StagedEnvironment;

/// Name of the final stage.
pub const RUNTIME_STAGE: &str = "runtime";

/// The application source copied into the runtime stage.
#[derive(Debug, Clone)]
pub struct SourceTree {
    /// `None` copies the whole build context (`COPY . .`).
    pub include: Option<Vec<String>>,
    /// Digest of the copied files.
    pub digest: String,
}

/// Composes the runtime stage: base, shared libraries, the staged
/// environment, then the source tree, then provisioning.
///
/// Manifest-derived layers always precede source-derived layers so that a
/// source-only change leaves the dependency layers cached.
pub struct ImageAssembler<'a> {
    config: &'a StrataConfig,
    base: &'a RuntimeBase,
    env: &'a StagedEnvironment,
    source: &'a SourceTree,
}

impl<'a> ImageAssembler<'a> {
    pub fn new(
        config: &'a StrataConfig,
        base: &'a RuntimeBase,
        env: &'a StagedEnvironment,
        source: &'a SourceTree,
    ) -> Self {
        Self {
            config,
            base,
            env,
            source,
        }
    }

    pub fn stage(&self) -> Stage {
        let app_root = &self.config.project.app_root;
        let mut instructions = Vec::new();

        if let Some(cmd) = self.base.install_command() {
            instructions.push(Instruction::Run(cmd));
        }

        instructions.push(env_var("PYTHONDONTWRITEBYTECODE", "1"));
        instructions.push(env_var("PYTHONUNBUFFERED", "1"));
        if let Some(bin) = &self.env.bin_dir {
            instructions.push(env_var("PATH", &format!("{bin}:$PATH")));
        }
        instructions.push(env_var(&self.config.uploads.env_var, &self.config.uploads.path));
        for (key, value) in &self.config.build.env {
            instructions.push(env_var(key, value));
        }

        instructions.push(Instruction::Copy {
            from: Some(self.env.stage.clone()),
            sources: vec![self.env.source.clone()],
            dest: self.env.target.clone(),
            inputs: None,
        });

        instructions.push(Instruction::Workdir(app_root.clone()));
        match &self.source.include {
            None => instructions.push(Instruction::Copy {
                from: None,
                sources: vec![".".to_owned()],
                dest: ".".to_owned(),
                inputs: Some(self.source.digest.clone()),
            }),
            Some(paths) => {
                for path in paths {
                    instructions.push(Instruction::Copy {
                        from: None,
                        sources: vec![path.clone()],
                        dest: format!("./{path}"),
                        inputs: Some(self.source.digest.clone()),
                    });
                }
            }
        }
        instructions.push(Instruction::Run(format!(
            "find {app_root} -name __pycache__ -prune -exec rm -rf {{}} + \
             && find {app_root} -name '*.pyc' -delete"
        )));

        let provisioner = PermissionProvisioner::new(
            &self.config.identity,
            &self.config.uploads,
            app_root,
            self.base.package_manager,
        );
        instructions.extend(provisioner.instructions());

        let server = &self.config.server;
        let health = &self.config.health;
        instructions.push(Instruction::Expose(server.port));
        instructions.push(Instruction::Healthcheck {
            interval_secs: health.interval_secs,
            timeout_secs: health.timeout_secs,
            start_period_secs: health.start_period_secs,
            retries: health.retries,
            command: probe_command(server.port, &health.path, health.timeout_secs),
        });
        instructions.push(Instruction::Cmd(server.argv()));

        Stage {
            name: RUNTIME_STAGE.to_owned(),
            base: self.base.image.clone(),
            packages: self.base.packages.clone(),
            instructions,
            artifacts: Vec::new(),
        }
    }
}

/// Health probe runnable inside a slim Python image, which ships no curl.
/// `urlopen` raises on non-2xx/3xx statuses, which exits non-zero. The URL
/// travels as an argument, never as part of the Python source.
fn probe_command(port: u16, path: &str, timeout_secs: u64) -> Vec<String> {
    vec![
        "python".to_owned(),
        "-c".to_owned(),
        format!(
            "import sys, urllib.request; urllib.request.urlopen(sys.argv[1], \
             timeout={timeout_secs})"
        ),
        format!("http://127.0.0.1:{port}{path}"),
    ]
}

fn env_var(key: &str, value: &str) -> Instruction {
    Instruction::Env {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}
