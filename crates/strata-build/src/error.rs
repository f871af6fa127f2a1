#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] strata_core::Error),

    // ── Runtime base ──
    #[error(
        "native library '{library}' is linked by the dependency stage but runtime package \
         '{package}' is not installed; add it to [runtime].packages or enable auto_libraries"
    )]
    MissingRuntimeLibrary { library: String, package: String },

    #[error("toolchain package '{package}' must not be installed in the runtime stage")]
    ToolchainInRuntime { package: String },

    // ── Plan structure ──
    #[error("build plan has no stages")]
    EmptyPlan,

    #[error("stage '{stage}' has a line that would not render as one instruction: {line:?}")]
    ControlCharacter { stage: String, line: String },

    #[error("stage '{0}' is declared twice")]
    DuplicateStage(String),

    #[error("stage '{stage}' imports from '{from}', which is not an earlier stage")]
    BackReference { stage: String, from: String },

    #[error("layer order violated in stage '{stage}': {detail}")]
    LayerOrder { stage: String, detail: String },

    #[error("stage '{stage}' would start its process as root")]
    RootAtStart { stage: String },

    #[error("stage '{stage}' has no upload write probe running as the runtime identity")]
    MissingWriteProbe { stage: String },

    #[error("stage '{stage}' declares no CMD")]
    MissingCmd { stage: String },
}
