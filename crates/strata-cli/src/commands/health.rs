use std::path::Path;

use strata_core::StrataConfig;
use strata_runtime::{HealthGate, HealthStatus, HttpProbe, ProbeOutcome};

/// Probes the health endpoint once, or on the configured schedule with
/// `--watch`.
pub async fn health(host: &str, port: Option<u16>, watch: bool) -> anyhow::Result<()> {
    let config = StrataConfig::load(Path::new("."))?;
    config.validate()?;
    let port = match port {
        Some(port) => port,
        None => config.server.port,
    };

    let probe = HttpProbe::new(host, port, &config.health)?;
    let url = probe.url().to_owned();
    let gate = HealthGate::new(probe, config.health.clone());

    if !watch {
        return match gate.check_once().await {
            ProbeOutcome::Success => {
                println!("healthy: {url}");
                Ok(())
            }
            ProbeOutcome::Failure(reason) => anyhow::bail!("unhealthy: {reason}"),
        };
    }

    println!(
        "Watching {url} every {}s (timeout {}s, {} retries)",
        config.health.interval_secs, config.health.timeout_secs, config.health.retries
    );
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C; watching until unhealthy");
            std::future::pending::<()>().await;
        }
    };

    match gate.run(shutdown).await {
        HealthStatus::Unhealthy => anyhow::bail!("{url} is unhealthy"),
        status => {
            println!("stopped, last status {}", status.as_str());
            Ok(())
        }
    }
}
