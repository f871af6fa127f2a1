use std::path::PathBuf;

use strata_build::{DockerfileGenerator, LayerCache, LayerStatus, bundle, eject as eject_mod};
use strata_engine::Pipeline;

use super::Project;

/// Execute the full build pipeline.
pub async fn build(allow_dirty: bool, tag: Option<String>) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let client = super::engine_client();

    // Dirty check: refuse to build uncommitted changes unless --allow-dirty
    if !bundle::is_git_work_tree(&project_dir) {
        tracing::info!("not a git work tree; skipping the uncommitted-changes check");
    } else if !allow_dirty && bundle::is_dirty(&project_dir)? {
        anyhow::bail!(
            "uncommitted changes detected.\n\
             Commit your changes, or use `strata build --allow-dirty` to build anyway."
        );
    }

    let project = Project::load(&project_dir)?;
    let image_tag = match tag {
        Some(tag) => tag,
        None => format!("{}:latest", project.image_name(&project_dir)),
    };

    // The plan drives stage targets even when the Dockerfile is ejected
    let generator =
        DockerfileGenerator::new(&project.config, &project.manifest, project.source.clone());
    let plan = generator.plan()?;
    let layers = plan.layers();

    let ejected = eject_mod::is_ejected(&project_dir);
    let dockerfile_content = if ejected {
        let file = eject_mod::load_ejected_dockerfile(&project_dir)?;
        println!("Using ejected Dockerfile from .strata/Dockerfile");
        if file.is_stale(&plan) {
            tracing::warn!("the build plan changed since the Dockerfile was ejected");
            println!("Note: the plan changed since eject; compare with `strata render`.");
        }
        file.content
    } else {
        plan.render()
    };

    let mut cache = LayerCache::load(&project_dir)?;
    let rebuilt = cache
        .diff(&layers)
        .iter()
        .filter(|r| r.status == LayerStatus::Rebuilt)
        .count();
    println!("{} layers, {rebuilt} to rebuild", layers.len());

    println!("Bundling source...");
    let bundle_dir = bundle::create_bundle(&project_dir, &project.files, &dockerfile_content)?;

    println!("Building {image_tag}...");
    let report = Pipeline::new(&client, &plan, &project.config.identity)
        .run(&bundle_dir, &image_tag)
        .await?;

    if !ejected {
        cache.record(&layers);
        cache.save(&project_dir)?;
    }

    println!();
    println!("Stages: {}", report.stages.join(" -> "));
    println!("Built: {} (user {})", report.image.tag, report.image.user);
    if !report.retained.is_empty() {
        println!(
            "Could not remove intermediate images: {}",
            report.retained.join(", ")
        );
    }

    Ok(())
}
