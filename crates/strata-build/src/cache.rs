use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::plan::Layer;

/// Index file, relative to the project directory.
pub const CACHE_INDEX: &str = ".strata/layers.json";

/// Whether a layer's key was seen by a previous build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
    Reused,
    Rebuilt,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    #[serde(flatten)]
    pub layer: Layer,
    pub status: LayerStatus,
}

/// Content-addressed record of built layer keys.
///
/// Keys are chained, so a layer is only reported as reused when every
/// layer before it in the same stage is reused as well.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerCache {
    keys: BTreeSet<String>,
}

impl LayerCache {
    pub fn index_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CACHE_INDEX)
    }

    /// Loads the index, or an empty cache when none exists yet.
    pub fn load(project_dir: &Path) -> Result<Self, CacheError> {
        let path = Self::index_path(project_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| CacheError::Read {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| CacheError::Parse { path, source: e })
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), CacheError> {
        let path = Self::index_path(project_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| CacheError::Parse {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, content).map_err(|e| CacheError::Write { path, source: e })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn diff(&self, layers: &[Layer]) -> Vec<LayerReport> {
        layers
            .iter()
            .map(|layer| LayerReport {
                layer: layer.clone(),
                status: if self.contains(&layer.key) {
                    LayerStatus::Reused
                } else {
                    LayerStatus::Rebuilt
                },
            })
            .collect()
    }

    pub fn record(&mut self, layers: &[Layer]) {
        self.keys.extend(layers.iter().map(|l| l.key.clone()));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to read layer cache {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("layer cache {path} is corrupt")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write layer cache {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
