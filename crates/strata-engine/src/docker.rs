#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("container engine `{program}` could not be started; install Docker or set STRATA_ENGINE")]
    NotFound {
        program: String,
        source: std::io::Error,
    },

    #[error("engine command failed: {}\n{stderr}", args.join(" "))]
    CommandFailed { args: Vec<String>, stderr: String },

    #[error("engine output was not valid UTF-8")]
    InvalidUtf8 { source: std::string::FromUtf8Error },
}
