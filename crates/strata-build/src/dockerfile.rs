use strata_core::{Manifest, StrataConfig};

use crate::assembler::{ImageAssembler, SourceTree};
use crate::error::BuildError;
use crate::plan::BuildPlan;
use crate::runtime::{NativeCatalog, RuntimeBaseSelector};
use crate::stager::DependencyStager;

/// Generates the two-stage Dockerfile for a Python service.
///
/// The builder and runtime stages may use different package managers, so
/// native libraries are resolved against one catalog per side.
pub struct DockerfileGenerator<'a> {
    config: &'a StrataConfig,
    manifest: &'a Manifest,
    source: SourceTree,
}

impl<'a> DockerfileGenerator<'a> {
    pub fn new(config: &'a StrataConfig, manifest: &'a Manifest, source: SourceTree) -> Self {
        Self {
            config,
            manifest,
            source,
        }
    }

    /// Builds and validates the plan. Nothing is rendered from a plan that
    /// fails validation.
    pub fn plan(&self) -> Result<BuildPlan, BuildError> {
        self.config.validate()?;

        let build_catalog =
            NativeCatalog::new(self.config.stager.package_manager(), &self.config.native);
        let runtime_catalog =
            NativeCatalog::new(self.config.runtime.package_manager(), &self.config.native);
        let build_libs = build_catalog.required_by(self.manifest);
        let runtime_libs = runtime_catalog.required_by(self.manifest);
        tracing::debug!(
            libraries = ?build_libs.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(),
            "native libraries linked by manifest"
        );

        let base = RuntimeBaseSelector::new(&self.config.runtime).select(&runtime_libs)?;

        let stager = DependencyStager::new(
            &self.config.stager,
            self.manifest,
            &self.config.project.manifest,
            &build_libs,
        );
        let env = stager.environment();
        let builder = stager.stage();
        let runtime = ImageAssembler::new(self.config, &base, &env, &self.source).stage();

        let plan = BuildPlan::new(vec![builder, runtime]);
        plan.validate()?;
        Ok(plan)
    }

    pub fn render(&self) -> Result<String, BuildError> {
        Ok(self.plan()?.render())
    }
}
