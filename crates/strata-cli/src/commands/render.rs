use std::path::Path;

use strata_build::DockerfileGenerator;

use super::Project;

pub async fn render() -> anyhow::Result<()> {
    let project = Project::load(Path::new("."))?;
    let generator =
        DockerfileGenerator::new(&project.config, &project.manifest, project.source.clone());
    print!("{}", generator.render()?);
    Ok(())
}
