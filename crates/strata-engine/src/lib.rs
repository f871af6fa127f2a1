pub mod client;
pub mod docker;
pub mod executor;
pub mod pipeline;

pub use client::{
    BuildError, CheckResult, DoctorReport, EngineClient, ImageReport, TOOLCHAIN_BINARIES,
    VerifyError,
};
pub use docker::EngineError;
pub use executor::{ContainerEngine, DockerEngine};
pub use pipeline::{Pipeline, PipelineError, PipelineReport};
