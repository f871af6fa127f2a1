use std::path::{Path, PathBuf};

use strata_core::StrataConfig;
use strata_runtime::{ensure_read_only, write_probe};

/// Runs the provisioning write probe against a real filesystem: the upload
/// root must accept a file and a nested directory, the app root must not.
pub async fn check_uploads(dir: Option<PathBuf>, app_root: Option<PathBuf>) -> anyhow::Result<()> {
    let config = StrataConfig::load(Path::new("."))?;

    let dir = match dir {
        Some(dir) => dir,
        None => match std::env::var_os(&config.uploads.env_var) {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(&config.uploads.path),
        },
    };

    write_probe(&dir)?;
    println!("writable: {}", dir.display());

    if let Some(root) = app_root {
        ensure_read_only(&root)?;
        println!("read-only: {}", root.display());
    }

    Ok(())
}
