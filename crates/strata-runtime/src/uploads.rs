use std::path::{Path, PathBuf};

/// Name shared with the build-time probe.
const PROBE_NAME: &str = ".strata-probe";

/// Creates a file and a nested directory with a file in `dir`, then
/// removes them. Succeeds only if the current identity can do all of it.
pub fn write_probe(dir: &Path) -> Result<(), ProvisionError> {
    if !dir.is_dir() {
        return Err(ProvisionError::Missing(dir.to_path_buf()));
    }

    let file = dir.join(PROBE_NAME);
    std::fs::write(&file, b"probe").map_err(|e| ProvisionError::NotWritable {
        path: file.clone(),
        source: e,
    })?;
    std::fs::remove_file(&file).map_err(|e| ProvisionError::Cleanup {
        path: file.clone(),
        source: e,
    })?;

    let tree = dir.join(format!("{PROBE_NAME}.d"));
    let nested = tree.join("nested");
    std::fs::create_dir_all(&nested).map_err(|e| ProvisionError::NotWritable {
        path: nested.clone(),
        source: e,
    })?;
    let nested_file = nested.join("file");
    std::fs::write(&nested_file, b"probe").map_err(|e| ProvisionError::NotWritable {
        path: nested_file,
        source: e,
    })?;
    std::fs::remove_dir_all(&tree).map_err(|e| ProvisionError::Cleanup {
        path: tree.clone(),
        source: e,
    })?;

    tracing::debug!(dir = %dir.display(), "upload directory is writable");
    Ok(())
}

/// Fails if the current identity can create entries in `dir`.
pub fn ensure_read_only(dir: &Path) -> Result<(), ProvisionError> {
    let file = dir.join(PROBE_NAME);
    match std::fs::File::create(&file) {
        Ok(_) => {
            std::fs::remove_file(&file).map_err(|e| ProvisionError::Cleanup {
                path: file.clone(),
                source: e,
            })?;
            Err(ProvisionError::Writable(dir.to_path_buf()))
        }
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "write rejected as expected");
            Ok(())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("upload directory {0} does not exist")]
    Missing(PathBuf),

    #[error("cannot write {path}")]
    NotWritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to remove probe {path}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0} is writable by the runtime identity but must be read-only")]
    Writable(PathBuf),
}
