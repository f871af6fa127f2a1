use std::path::Path;

use strata_build::{DockerfileGenerator, LayerCache, LayerStatus};

use super::Project;

/// Prints every layer of the plan and whether the last build already
/// produced it.
pub async fn plan(json: bool) -> anyhow::Result<()> {
    let project_dir = Path::new(".");
    let project = Project::load(project_dir)?;

    let generator =
        DockerfileGenerator::new(&project.config, &project.manifest, project.source.clone());
    let plan = generator.plan()?;
    let cache = LayerCache::load(project_dir)?;
    let report = cache.diff(&plan.layers());

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut current_stage = "";
    for entry in &report {
        if entry.layer.stage != current_stage {
            current_stage = entry.layer.stage.as_str();
            println!("stage {current_stage}");
        }
        let status = match entry.status {
            LayerStatus::Reused => "reused ",
            LayerStatus::Rebuilt => "rebuilt",
        };
        println!(
            "  {status}  {}  {}",
            &entry.layer.key[..12.min(entry.layer.key.len())],
            entry.layer.instruction
        );
    }

    let rebuilt = report
        .iter()
        .filter(|r| r.status == LayerStatus::Rebuilt)
        .count();
    println!();
    println!("{} layers, {rebuilt} to rebuild", report.len());
    Ok(())
}
