use std::path::PathBuf;

use strata_build::DockerfileGenerator;

use super::Project;

pub async fn eject() -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let project = Project::load(&project_dir)?;

    let generator =
        DockerfileGenerator::new(&project.config, &project.manifest, project.source.clone());
    let plan = generator.plan()?;

    let path = strata_build::eject::eject(&project_dir, &plan)?;

    println!("Ejected the build plan to {}", path.display());
    println!("Edit it freely; strata build uses it from now on, without plan validation.");
    Ok(())
}
