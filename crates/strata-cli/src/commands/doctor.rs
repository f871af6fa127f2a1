use std::path::Path;

use strata_core::{CONFIG_FILE, Manifest, StrataConfig};
use strata_engine::CheckResult;

pub async fn doctor() -> anyhow::Result<()> {
    let client = super::engine_client();
    let mut report = client.doctor().await;

    // Config file check
    let config = match StrataConfig::load(Path::new(".")) {
        Ok(config) => {
            report.config_file = match config.validate() {
                Ok(()) if Path::new(CONFIG_FILE).exists() => CheckResult::ok("Found"),
                Ok(()) => CheckResult::ok("Not found, using defaults"),
                Err(e) => CheckResult::fail(&e.to_string()),
            };
            Some(config)
        }
        Err(e) => {
            report.config_file = CheckResult::fail(&e.to_string());
            None
        }
    };

    // Manifest check
    let manifest_path = match &config {
        Some(config) => config.project.manifest.clone(),
        None => "requirements.txt".to_owned(),
    };
    report.manifest = match Manifest::load(Path::new(&manifest_path)) {
        Ok(m) => CheckResult::ok(&format!(
            "{manifest_path} ({} requirements)",
            m.requirements().len()
        )),
        Err(e) => CheckResult::fail(&e.to_string()),
    };

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed, see above for details");
    }

    Ok(())
}
