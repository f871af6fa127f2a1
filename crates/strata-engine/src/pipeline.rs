use std::path::Path;

use strata_build::{BuildPlan, Stage};
use strata_core::RuntimeIdentity;

use crate::client::{BuildError, EngineClient, ImageReport, VerifyError};
use crate::executor::ContainerEngine;

/// Runs a validated plan stage by stage against a written bundle.
///
/// Every stage before the last is built with `--target`, in plan order. A
/// failing stage aborts the run, so no runtime image is produced from a
/// broken dependency stage. Intermediate stage images are discarded once
/// the run ends, whatever the outcome; an image that fails verification is
/// discarded with them.
pub struct Pipeline<'a, E: ContainerEngine> {
    client: &'a EngineClient<E>,
    plan: &'a BuildPlan,
    identity: &'a RuntimeIdentity,
}

impl<'a, E: ContainerEngine> Pipeline<'a, E> {
    pub fn new(
        client: &'a EngineClient<E>,
        plan: &'a BuildPlan,
        identity: &'a RuntimeIdentity,
    ) -> Self {
        Self {
            client,
            plan,
            identity,
        }
    }

    pub async fn run(&self, bundle_dir: &Path, tag: &str) -> Result<PipelineReport, PipelineError> {
        let stages = self.plan.stages();
        let Some((runtime, intermediate)) = stages.split_last() else {
            return Err(PipelineError::EmptyPlan);
        };

        let mut discard = Vec::new();
        let outcome = self
            .build_and_verify(bundle_dir, tag, runtime, intermediate, &mut discard)
            .await;
        let retained = self.discard(&discard).await;

        let (stages, image) = outcome?;
        Ok(PipelineReport {
            stages,
            image,
            retained,
        })
    }

    /// Builds every stage, then verifies the final image. Tags that must
    /// not outlive the run are pushed onto `discard` as they appear.
    async fn build_and_verify(
        &self,
        bundle_dir: &Path,
        tag: &str,
        runtime: &Stage,
        intermediate: &[Stage],
        discard: &mut Vec<String>,
    ) -> Result<(Vec<String>, ImageReport), PipelineError> {
        let mut built = Vec::new();
        for stage in intermediate {
            let stage_tag = stage_tag(tag, &stage.name);
            tracing::info!(stage = %stage.name, tag = %stage_tag, "building stage");
            self.client
                .build(bundle_dir, &stage_tag, Some(&stage.name))
                .await
                .map_err(|e| PipelineError::StageFailed {
                    stage: stage.name.clone(),
                    source: e,
                })?;
            discard.push(stage_tag);
            built.push(stage.name.clone());
        }

        tracing::info!(stage = %runtime.name, tag, "building stage");
        self.client
            .build(bundle_dir, tag, None)
            .await
            .map_err(|e| PipelineError::StageFailed {
                stage: runtime.name.clone(),
                source: e,
            })?;
        built.push(runtime.name.clone());

        let image = self
            .client
            .verify_image(tag, self.identity)
            .await
            .map_err(|e| {
                tracing::warn!(tag, error = %e, "image failed verification");
                discard.push(tag.to_owned());
                PipelineError::Verification { source: e }
            })?;
        tracing::info!(tag, user = %image.user, "image verified");

        Ok((built, image))
    }

    /// Removes each tag; returns the ones the engine refused to remove.
    async fn discard(&self, tags: &[String]) -> Vec<String> {
        let mut retained = Vec::new();
        for tag in tags {
            match self.client.remove_image(tag).await {
                Ok(()) => tracing::debug!(tag = %tag, "discarded image"),
                Err(e) => {
                    tracing::warn!(tag = %tag, error = %e, "failed to discard image");
                    retained.push(tag.clone());
                }
            }
        }
        retained
    }
}

/// Tag an intermediate stage is built under.
pub fn stage_tag(tag: &str, stage: &str) -> String {
    format!("{tag}-{stage}")
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Stage names in the order they were built.
    pub stages: Vec<String>,
    pub image: ImageReport,
    /// Intermediate images that could not be discarded.
    pub retained: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("build plan has no stages")]
    EmptyPlan,

    #[error("stage '{stage}' failed to build")]
    StageFailed { stage: String, source: BuildError },

    #[error("built image failed verification")]
    Verification { source: VerifyError },
}
