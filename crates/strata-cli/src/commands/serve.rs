use std::path::Path;

use strata_core::StrataConfig;
use strata_runtime::{EXIT_CONFIG, HealthGate, HttpProbe, Supervisor, SupervisorConfig};

/// Runs the supervisor and returns the process exit code.
///
/// Configuration and preflight failures exit with [`EXIT_CONFIG`].
pub async fn serve(no_health: bool) -> i32 {
    match run(no_health).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "server not started");
            eprintln!("Error: {e:#}");
            EXIT_CONFIG
        }
    }
}

async fn run(no_health: bool) -> anyhow::Result<i32> {
    let config = StrataConfig::load(Path::new("."))?;
    config.validate()?;

    let settings = SupervisorConfig::from_env(&config)?;
    let probe_port = settings.server.port;
    let supervisor = Supervisor::new(settings);
    supervisor.preflight()?;

    let exit = if no_health {
        supervisor.run::<HttpProbe>(None).await?
    } else {
        let probe = HttpProbe::new("127.0.0.1", probe_port, &config.health)?;
        let gate = HealthGate::new(probe, config.health.clone());
        supervisor.run(Some(&gate)).await?
    };

    Ok(exit.code())
}
