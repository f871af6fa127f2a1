use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("runtime identity must not be root ({detail})")]
    RootIdentity { detail: String },

    // ── Dependency manifest ──
    #[error("failed to read dependency manifest {path}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid requirement on line {line}: {reason}")]
    ManifestParse { line: usize, reason: String },

    #[error("requirement '{name}' declared twice (lines {first} and {second})")]
    DuplicateRequirement {
        name: String,
        first: usize,
        second: usize,
    },
}
