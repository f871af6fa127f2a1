mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Build and run Python ASGI services as minimal, non-root containers"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add strata.toml to an existing Python project
    Init,
    /// Show the build plan and which layers a rebuild would reuse
    Plan {
        /// Print the layer report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the generated Dockerfile
    Render,
    /// Build the image stage by stage and verify it
    Build {
        /// Allow building with uncommitted changes
        #[arg(long)]
        allow_dirty: bool,
        /// Image tag (default: <name>:latest)
        #[arg(long, short = 't')]
        tag: Option<String>,
    },
    /// Eject Dockerfile for manual customization
    Eject,
    /// Check container engine and project readiness
    Doctor,
    /// Probe the service health endpoint
    Health {
        /// Host the service listens on
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port (default: server.port from strata.toml)
        #[arg(long)]
        port: Option<u16>,
        /// Keep probing on the configured interval until unhealthy
        #[arg(long)]
        watch: bool,
    },
    /// Supervise the HTTP server (container entry point)
    Serve {
        /// Do not run the health gate alongside the server
        #[arg(long)]
        no_health: bool,
    },
    /// Verify the upload directory is writable and the app root is not
    CheckUploads {
        /// Upload directory (default: the uploads variable, then strata.toml)
        dir: Option<PathBuf>,
        /// Application root that must stay read-only
        #[arg(long)]
        app_root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                // arch-lint: allow(no-silent-result-drop) reason="an unset or unparsable RUST_LOG falls back to info"
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init_project().await?,
        Commands::Plan { json } => commands::plan(json).await?,
        Commands::Render => commands::render().await?,
        Commands::Build { allow_dirty, tag } => commands::build(allow_dirty, tag).await?,
        Commands::Eject => commands::eject().await?,
        Commands::Doctor => commands::doctor().await?,
        Commands::Health { host, port, watch } => commands::health(&host, port, watch).await?,
        Commands::Serve { no_health } => std::process::exit(commands::serve(no_health).await),
        Commands::CheckUploads { dir, app_root } => {
            commands::check_uploads(dir, app_root).await?
        }
    }

    Ok(())
}
