use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Directory the build context is written to.
pub const BUNDLE_DIR: &str = ".strata-bundle";

/// Path components strata always keeps out of the build context,
/// regardless of .gitignore content.
const STRATA_EXCLUDES: &[&str] = &[
    BUNDLE_DIR,
    ".strata",
    ".git",
    ".venv",
    "venv",
    "__pycache__",
];

const DOCKERIGNORE: &str = "Dockerfile\n.dockerignore\n**/__pycache__\n**/*.pyc\n";

/// Lists the project's source files, relative to `project_dir`, sorted.
///
/// Inside a git work tree this is `git ls-files` (tracked plus untracked
/// but not ignored); elsewhere the directory is walked. `exclude` names an
/// additional relative directory to skip, typically the local upload root.
pub fn list_source_files(
    project_dir: &Path,
    exclude: Option<&Path>,
) -> Result<Vec<PathBuf>, BundleError> {
    let candidates = if is_git_work_tree(project_dir) {
        git_ls_files(project_dir)?
    } else {
        walk_files(project_dir)?
    };

    let mut files: Vec<PathBuf> = candidates
        .into_iter()
        .filter(|path| !is_excluded(path, exclude))
        .collect();
    files.sort();
    files.dedup();
    Ok(files)
}

/// SHA-256 over the relative paths and contents of `files`.
///
/// With `include`, only files under one of the listed paths count, which
/// mirrors what the runtime stage actually copies.
pub fn source_digest(
    project_dir: &Path,
    files: &[PathBuf],
    include: Option<&[String]>,
) -> Result<String, BundleError> {
    let mut hasher = Sha256::new();
    for relative in files {
        if let Some(paths) = include {
            let selected = paths
                .iter()
                .any(|p| relative.starts_with(p.trim_end_matches('/')));
            if !selected {
                continue;
            }
        }
        let content = std::fs::read(project_dir.join(relative)).map_err(|e| BundleError::Hash {
            path: relative.clone(),
            source: e,
        })?;
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Copies `files` into `.strata-bundle/` and writes the Dockerfile next to
/// them.
pub fn create_bundle(
    project_dir: &Path,
    files: &[PathBuf],
    dockerfile_content: &str,
) -> Result<PathBuf, BundleError> {
    let bundle_dir = project_dir.join(BUNDLE_DIR);

    // Clean previous bundle
    if bundle_dir.exists() {
        std::fs::remove_dir_all(&bundle_dir).map_err(|e| BundleError::Cleanup {
            path: bundle_dir.clone(),
            source: e,
        })?;
    }
    std::fs::create_dir_all(&bundle_dir).map_err(|e| BundleError::Create {
        path: bundle_dir.clone(),
        source: e,
    })?;

    for relative_path in files {
        let src = project_dir.join(relative_path);
        let dst = bundle_dir.join(relative_path);

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BundleError::Create {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::copy(&src, &dst).map_err(|e| BundleError::CopyFile {
            path: src,
            source: e,
        })?;
    }

    let dockerfile = bundle_dir.join("Dockerfile");
    std::fs::write(&dockerfile, dockerfile_content).map_err(|e| BundleError::Write {
        path: dockerfile.clone(),
        source: e,
    })?;
    let ignore = bundle_dir.join(".dockerignore");
    std::fs::write(&ignore, DOCKERIGNORE).map_err(|e| BundleError::Write {
        path: ignore.clone(),
        source: e,
    })?;

    tracing::debug!(dir = %bundle_dir.display(), files = files.len(), "bundle written");
    Ok(bundle_dir)
}

fn is_excluded(path: &Path, extra: Option<&Path>) -> bool {
    if let Some(extra) = extra {
        if path.starts_with(extra) {
            return true;
        }
    }
    if path.extension().is_some_and(|ext| ext == "pyc") {
        return true;
    }
    path.components().any(|c| {
        STRATA_EXCLUDES
            .iter()
            .any(|ex| c.as_os_str() == std::ffi::OsStr::new(ex))
    })
}

fn walk_files(project_dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(project_dir).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !STRATA_EXCLUDES
                .iter()
                .any(|ex| entry.file_name() == std::ffi::OsStr::new(ex))
    });
    for entry in walker {
        let entry = entry.map_err(|e| BundleError::Walk {
            path: project_dir.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(project_dir) {
            files.push(relative.to_path_buf());
        }
    }
    Ok(files)
}

/// Returns the list of files git considers part of the project:
/// tracked files + untracked files that are not .gitignored.
fn git_ls_files(project_dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    let output = Command::new("git")
        .args(["ls-files", "--cached", "--others", "--exclude-standard"])
        .current_dir(project_dir)
        .output()
        .map_err(|e| BundleError::GitCommand {
            detail: "failed to execute git ls-files".to_owned(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BundleError::GitFailed {
            detail: format!(
                "git ls-files exited with {}: {}",
                output.status,
                stderr.trim()
            ),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        // deleted-but-tracked files are still listed by --cached
        .filter(|relative| project_dir.join(relative).is_file())
        .collect())
}

/// Whether `project_dir` is the top of a git work tree.
pub fn is_git_work_tree(project_dir: &Path) -> bool {
    project_dir.join(".git").exists()
}

/// Checks whether the git working tree has uncommitted changes.
pub fn is_dirty(project_dir: &Path) -> Result<bool, BundleError> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(project_dir)
        .output()
        .map_err(|e| BundleError::GitCommand {
            detail: "failed to execute git status".to_owned(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BundleError::GitFailed {
            detail: format!(
                "git status exited with {}: {}",
                output.status,
                stderr.trim()
            ),
        });
    }

    Ok(!output.stdout.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("failed to clean up bundle directory {path}")]
    Cleanup {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy file {path}")]
    CopyFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read {path} while hashing the source tree")]
    Hash {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to walk {path}")]
    Walk {
        path: std::path::PathBuf,
        source: walkdir::Error,
    },
    #[error("git command failed: {detail}")]
    GitCommand {
        detail: String,
        source: std::io::Error,
    },
    #[error("git failed: {detail}")]
    GitFailed { detail: String },
}
