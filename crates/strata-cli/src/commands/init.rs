use std::path::Path;

use strata_core::CONFIG_FILE;

const STRATA_TOML: &str = r#"[project]
# name = "my-service"
# manifest = "requirements.txt"
# app_root = "/app"

[stager]
# image = "python:3.12-slim"
# packaging = "venv"

[runtime]
# image = "python:3.12-slim"
# packages = ["ffmpeg"]

[identity]
# user = "app"
# group = "app"
# uid = 1000
# gid = 1000

[uploads]
# path = "/app/uploads"
# policy = "owner"
# env_var = "UPLOADS"

[health]
# path = "/health"
# interval_secs = 30
# timeout_secs = 5
# start_period_secs = 30
# retries = 3

[server]
# module = "main:app"
# port = 8000
# workers = 4
"#;

const REQUIREMENTS: &str = "fastapi\nuvicorn[standard]\n";

/// Initialize strata in an existing Python project.
pub async fn init_project() -> anyhow::Result<()> {
    let mut created = Vec::new();

    let config_path = Path::new(CONFIG_FILE);
    if config_path.exists() {
        eprintln!("{CONFIG_FILE} already exists, skipping");
    } else {
        std::fs::write(config_path, STRATA_TOML)?;
        created.push(CONFIG_FILE);
    }

    let requirements_path = Path::new("requirements.txt");
    if requirements_path.exists() {
        eprintln!("requirements.txt already exists, skipping");
    } else {
        std::fs::write(requirements_path, REQUIREMENTS)?;
        created.push("requirements.txt");
    }

    if created.is_empty() {
        println!("Nothing to create, already initialized.");
    } else {
        for f in &created {
            println!("Created {f}");
        }
    }

    println!();
    println!("Next steps:");
    println!();
    println!("  1. Serve a health endpoint from your app:");
    println!();
    println!("     @app.get(\"/health\")");
    println!("     def health():");
    println!("         return {{\"status\": \"ok\"}}");
    println!();
    println!("  2. Review the generated Dockerfile:");
    println!("     strata render");
    println!();
    println!("  3. Build:");
    println!("     strata build");

    Ok(())
}
