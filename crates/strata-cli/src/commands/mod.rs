mod build;
mod check_uploads;
mod doctor;
mod eject;
mod health;
mod init;
mod plan;
mod render;
mod serve;

use std::path::{Path, PathBuf};

use strata_build::{SourceTree, bundle};
use strata_core::{Manifest, StrataConfig};
use strata_engine::{DockerEngine, EngineClient};

pub use build::build;
pub use check_uploads::check_uploads;
pub use doctor::doctor;
pub use eject::eject;
pub use health::health;
pub use init::init_project;
pub use plan::plan;
pub use render::render;
pub use serve::serve;

/// Variable naming a docker-compatible CLI to use instead of `docker`.
pub(crate) const ENGINE_VAR: &str = "STRATA_ENGINE";

pub(crate) fn engine_client() -> EngineClient<DockerEngine> {
    match std::env::var_os(ENGINE_VAR) {
        Some(program) => {
            let program = program.to_string_lossy();
            tracing::debug!(program = %program, "using container engine from {ENGINE_VAR}");
            EngineClient::with_executor(DockerEngine::with_program(&program))
        }
        None => EngineClient::new(),
    }
}

/// Everything a plan is generated from.
pub(crate) struct Project {
    pub config: StrataConfig,
    pub manifest: Manifest,
    /// Files that go into the build context, relative to the project.
    pub files: Vec<PathBuf>,
    pub source: SourceTree,
}

impl Project {
    pub(crate) fn load(project_dir: &Path) -> anyhow::Result<Self> {
        let config = StrataConfig::load(project_dir)?;
        let manifest_path = project_dir.join(&config.project.manifest);
        let manifest = Manifest::load(&manifest_path)?;

        let uploads = local_uploads_dir(&config);
        let files = bundle::list_source_files(project_dir, uploads.as_deref())?;
        let include = config.build.include.clone();
        let digest = bundle::source_digest(project_dir, &files, include.as_deref())?;
        tracing::debug!(files = files.len(), digest = %digest, "hashed source tree");

        Ok(Self {
            config,
            manifest,
            files,
            source: SourceTree { include, digest },
        })
    }

    pub(crate) fn image_name(&self, project_dir: &Path) -> String {
        if let Some(name) = &self.config.project.name {
            return name.clone();
        }
        project_dir
            .canonicalize()
            // arch-lint: allow(no-silent-result-drop) reason="an unresolvable directory falls back to the default image name"
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_lowercase()))
            // arch-lint: allow(no-silent-result-drop) reason="a root or unresolvable directory has no usable name"
            .unwrap_or_else(|| "app".to_owned())
    }
}

/// The upload root relative to the app root, i.e. where a local checkout
/// keeps uploaded media that must stay out of the build context.
fn local_uploads_dir(config: &StrataConfig) -> Option<PathBuf> {
    Path::new(&config.uploads.path)
        .strip_prefix(&config.project.app_root)
        // arch-lint: allow(no-silent-result-drop) reason="validate() rejects an upload root outside the app root"
        .ok()
        .map(Path::to_path_buf)
}
