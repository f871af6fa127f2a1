//! Core types and configuration for strata.
//!
//! This crate defines the `strata.toml` schema ([`StrataConfig`]), the
//! dependency manifest ([`Manifest`]), the non-root [`RuntimeIdentity`],
//! the upload directory policy ([`UploadPolicy`]), and shared error types.

pub mod config;
pub mod error;
pub mod identity;
pub mod manifest;

pub use config::{
    BuildConfig, CONFIG_FILE, HealthConfig, NativeLibraryConfig, PackageManager, Packaging,
    ProjectConfig, RuntimeConfig, ServerConfig, ServerKind, StagerConfig, StrataConfig,
    UploadsConfig,
};
pub use error::{Error, Result};
pub use identity::{RuntimeIdentity, UploadPolicy};
pub use manifest::{Manifest, Requirement, normalize_name};
