//! `.strata/Dockerfile`: a rendered plan handed over to the user.
//!
//! The first line records the key of the plan's last layer, so a later
//! build can tell that the project moved on since the file was written.

use std::path::{Path, PathBuf};

use crate::plan::BuildPlan;

const STAMP: &str = "# strata-plan: ";

/// Location of the ejected Dockerfile inside `project_dir`.
pub fn ejected_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".strata").join("Dockerfile")
}

/// Renders `plan` into `.strata/Dockerfile`. Refuses to overwrite an
/// earlier eject; edits there belong to the user.
pub fn eject(project_dir: &Path, plan: &BuildPlan) -> Result<PathBuf, EjectError> {
    let path = ejected_path(project_dir);
    if path.exists() {
        return Err(EjectError::AlreadyEjected(path));
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| EjectError::CreateDir {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }

    let mut content = String::new();
    if let Some(key) = plan_key(plan) {
        content.push_str(&format!("{STAMP}{key}\n"));
    }
    content.push_str(&plan.render());
    std::fs::write(&path, content).map_err(|e| EjectError::Write {
        path: path.clone(),
        source: e,
    })?;

    tracing::debug!(path = %path.display(), "ejected Dockerfile");
    Ok(path)
}

pub fn is_ejected(project_dir: &Path) -> bool {
    ejected_path(project_dir).exists()
}

/// An ejected Dockerfile as found on disk.
#[derive(Debug, Clone)]
pub struct EjectedDockerfile {
    pub content: String,
    /// Plan key stamped at eject time; gone if the user removed the line.
    pub plan_key: Option<String>,
}

impl EjectedDockerfile {
    /// Whether `plan` differs from the one this file was rendered from.
    /// A file without a stamp is never reported as stale.
    pub fn is_stale(&self, plan: &BuildPlan) -> bool {
        match &self.plan_key {
            Some(key) => plan_key(plan).as_deref() != Some(key.as_str()),
            None => false,
        }
    }
}

pub fn load_ejected_dockerfile(project_dir: &Path) -> Result<EjectedDockerfile, EjectError> {
    let path = ejected_path(project_dir);
    let content =
        std::fs::read_to_string(&path).map_err(|e| EjectError::Read { path, source: e })?;
    let plan_key = content
        .lines()
        .next()
        .and_then(|line| line.strip_prefix(STAMP))
        .map(|key| key.trim().to_owned());
    Ok(EjectedDockerfile { content, plan_key })
}

fn plan_key(plan: &BuildPlan) -> Option<String> {
    plan.layers().pop().map(|layer| layer.key)
}

#[derive(Debug, thiserror::Error)]
pub enum EjectError {
    #[error("failed to create {path}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0} already ejected; edit it in place, or delete it and eject again")]
    AlreadyEjected(PathBuf),

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read ejected Dockerfile at {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}
