//! Build planning, Dockerfile rendering, and source bundling for strata.
//!
//! # Plan
//!
//! ```text
//! strata.toml + requirements.txt
//!   1. Catalog   ── native libraries linked by the manifest
//!   2. Runtime   ── RuntimeBaseSelector: image + shared libraries, no toolchain
//!   3. Builder   ── DependencyStager: toolchain, venv or prefix install
//!   4. Runtime   ── ImageAssembler: env import, source, provisioning, CMD
//!   5. Validate  ── BuildPlan::validate()
//! ```
//!
//! # Caching
//!
//! Every instruction gets a chained SHA-256 key covering the base image,
//! all earlier instructions of the stage, and the content it copies.
//! Manifest-derived layers come before source-derived layers, so editing
//! application code only invalidates layers from the source `COPY` on.
//!
//! # Provisioning
//!
//! The runtime stage installs as root, fixes ownership and modes, then
//! switches to the unprivileged identity and proves the upload directory
//! is writable before the `CMD` is reached.

pub mod assembler;
pub mod bundle;
pub mod cache;
pub mod dockerfile;
pub mod eject;
pub mod error;
pub mod plan;
pub mod provision;
pub mod runtime;
pub mod stager;

pub use assembler::{ImageAssembler, RUNTIME_STAGE, SourceTree};
pub use cache::{LayerCache, LayerReport, LayerStatus};
pub use dockerfile::DockerfileGenerator;
pub use error::BuildError;
pub use plan::{BuildPlan, Instruction, Layer, Stage};
pub use provision::{PermissionPlan, PermissionProvisioner};
pub use runtime::{NativeCatalog, NativeLibrary, RuntimeBase, RuntimeBaseSelector};
pub use stager::{BUILDER_STAGE, DependencyStager, StagedEnvironment};
