use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::{RuntimeIdentity, UploadPolicy};

/// Name of the configuration file looked up in the project directory.
pub const CONFIG_FILE: &str = "strata.toml";

/// strata.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub stager: StagerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Extra native libraries, on top of the built-in catalog.
    #[serde(default)]
    pub native: Vec<NativeLibraryConfig>,
    #[serde(default)]
    pub identity: RuntimeIdentity,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Image name (defaults to the project directory name)
    pub name: Option<String>,
    /// Dependency manifest, relative to the project directory
    #[serde(default = "default_manifest")]
    pub manifest: String,
    /// Application root inside the image
    #[serde(default = "default_app_root")]
    pub app_root: String,
}

/// How the dependency stage lays out the isolated environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Packaging {
    /// A relocatable virtualenv copied as a whole.
    #[default]
    Venv,
    /// `pip install --prefix`, merged into `/usr/local` at runtime.
    Prefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Apk,
}

impl PackageManager {
    /// Infers the distribution package manager from an image reference.
    pub fn for_image(image: &str) -> Self {
        if image.contains("alpine") {
            Self::Apk
        } else {
            Self::Apt
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagerConfig {
    /// Builder image, carrying the interpreter the environment is built for
    #[serde(default = "default_python_image")]
    pub image: String,
    #[serde(default)]
    pub packaging: Packaging,
    /// Location of the isolated environment inside the builder
    #[serde(default = "default_env_path")]
    pub env_path: String,
    /// Additional toolchain packages installed only in the builder
    #[serde(default)]
    pub toolchain: Vec<String>,
    /// Overrides the package manager inferred from `image`
    #[serde(default)]
    pub package_manager: Option<PackageManager>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Runtime base image
    #[serde(default = "default_python_image")]
    pub image: String,
    /// Extra runtime packages (e.g. `ffmpeg` for media transcoding)
    #[serde(default)]
    pub packages: Vec<String>,
    /// Add the runtime package of every linked native library automatically.
    /// When false, `packages` must already cover them.
    #[serde(default = "default_true")]
    pub auto_libraries: bool,
    /// Overrides the package manager inferred from `image`
    #[serde(default)]
    pub package_manager: Option<PackageManager>,
}

/// A native library some Python package links against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeLibraryConfig {
    pub name: String,
    /// Python distributions whose native extensions link this library
    pub packages: Vec<String>,
    /// Build-time (headers) package
    pub build: String,
    /// Run-time (shared object) package
    pub runtime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// The single writable directory inside the image
    #[serde(default = "default_uploads_path")]
    pub path: String,
    #[serde(default)]
    pub policy: UploadPolicy,
    /// Environment variable advertising `path` to the application
    #[serde(default = "default_uploads_env")]
    pub env_var: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_start_period_secs")]
    pub start_period_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    #[default]
    Uvicorn,
    Gunicorn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub kind: ServerKind,
    /// ASGI entry point, `module:attribute`
    #[serde(default = "default_module")]
    pub module: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// Maximum concurrent connections per worker
    #[serde(default = "default_limit_concurrency")]
    pub limit_concurrency: u32,
    /// Keep-alive timeout in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u32,
    #[serde(default = "default_true")]
    pub access_log: bool,
    /// Seconds between asking the server to stop and killing it
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Files/directories to include in the runtime image.
    /// When None, the entire bundle is copied (COPY . .).
    #[serde(default)]
    pub include: Option<Vec<String>>,
    /// Static environment variables baked into the runtime image.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: None,
            manifest: default_manifest(),
            app_root: default_app_root(),
        }
    }
}

impl Default for StagerConfig {
    fn default() -> Self {
        Self {
            image: default_python_image(),
            packaging: Packaging::default(),
            env_path: default_env_path(),
            toolchain: Vec::new(),
            package_manager: None,
        }
    }
}

impl StagerConfig {
    pub fn package_manager(&self) -> PackageManager {
        match self.package_manager {
            Some(manager) => manager,
            None => PackageManager::for_image(&self.image),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: default_python_image(),
            packages: Vec::new(),
            auto_libraries: true,
            package_manager: None,
        }
    }
}

impl RuntimeConfig {
    pub fn package_manager(&self) -> PackageManager {
        match self.package_manager {
            Some(manager) => manager,
            None => PackageManager::for_image(&self.image),
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            path: default_uploads_path(),
            policy: UploadPolicy::default(),
            env_var: default_uploads_env(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            start_period_secs: default_start_period_secs(),
            retries: default_retries(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn start_period(&self) -> Duration {
        Duration::from_secs(self.start_period_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            kind: ServerKind::default(),
            module: default_module(),
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            limit_concurrency: default_limit_concurrency(),
            keep_alive: default_keep_alive(),
            access_log: true,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Command line that starts the HTTP server with these tunables.
    ///
    /// Used both for the image `CMD` and by the process supervisor.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = match self.kind {
            ServerKind::Uvicorn => vec![
                "uvicorn".to_owned(),
                self.module.clone(),
                "--host".to_owned(),
                self.host.clone(),
                "--port".to_owned(),
                self.port.to_string(),
                "--workers".to_owned(),
                self.workers.to_string(),
                "--limit-concurrency".to_owned(),
                self.limit_concurrency.to_string(),
                "--timeout-keep-alive".to_owned(),
                self.keep_alive.to_string(),
            ],
            ServerKind::Gunicorn => vec![
                "gunicorn".to_owned(),
                self.module.clone(),
                "--worker-class".to_owned(),
                "uvicorn.workers.UvicornWorker".to_owned(),
                "--bind".to_owned(),
                format!("{}:{}", self.host, self.port),
                "--workers".to_owned(),
                self.workers.to_string(),
                "--worker-connections".to_owned(),
                self.limit_concurrency.to_string(),
                "--keep-alive".to_owned(),
                self.keep_alive.to_string(),
            ],
        };
        match (self.kind, self.access_log) {
            (ServerKind::Uvicorn, false) => argv.push("--no-access-log".to_owned()),
            (ServerKind::Gunicorn, true) => {
                argv.push("--access-logfile".to_owned());
                argv.push("-".to_owned());
            }
            _ => {}
        }
        argv
    }
}

impl StrataConfig {
    /// Load from strata.toml at the given path, or return defaults if not found.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            let config: Self =
                toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                    path: config_path.clone(),
                    source: e,
                })?;
            tracing::debug!(path = %config_path.display(), "loaded config");
            Ok(config)
        } else {
            tracing::debug!(dir = %project_dir.display(), "no strata.toml, using defaults");
            Ok(Self::default())
        }
    }

    /// Checks cross-field invariants that serde defaults cannot express.
    ///
    /// Every value that ends up inside a Dockerfile line or a shell command
    /// is restricted to a character set that needs no quoting there.
    pub fn validate(&self) -> crate::Result<()> {
        self.identity.validate()?;

        check_absolute_path("project.app_root", &self.project.app_root)?;
        check_absolute_path("uploads.path", &self.uploads.path)?;
        check_absolute_path("stager.env_path", &self.stager.env_path)?;
        check_token("stager.image", &self.stager.image)?;
        check_token("runtime.image", &self.runtime.image)?;
        for package in self.stager.toolchain.iter().chain(&self.runtime.packages) {
            check_token("packages", package)?;
        }
        for native in &self.native {
            check_token("native.name", &native.name)?;
            check_token("native.build", &native.build)?;
            check_token("native.runtime", &native.runtime)?;
        }
        for path in self.build.include.iter().flatten() {
            check_path("build.include", path)?;
        }
        for (key, value) in &self.build.env {
            check_env_name("build.env", key)?;
            if value.contains(char::is_control) {
                return Err(invalid(
                    "build.env",
                    format!("value of {key} contains a control character"),
                ));
            }
        }

        let app_root = Path::new(&self.project.app_root);
        let uploads = Path::new(&self.uploads.path);
        if uploads == app_root || !uploads.starts_with(app_root) {
            return Err(invalid(
                "uploads.path",
                format!("must be a subdirectory of {}", self.project.app_root),
            ));
        }
        check_env_name("uploads.env_var", &self.uploads.env_var)?;
        if self.uploads.policy == UploadPolicy::World {
            tracing::warn!(
                path = %self.uploads.path,
                "upload directory is world-writable; prefer policy = \"owner\""
            );
        }

        let health = &self.health;
        if !health.path.starts_with('/') {
            return Err(invalid("health.path", "must start with '/'"));
        }
        if !health.path.chars().all(|c| c.is_ascii_graphic()) {
            return Err(invalid(
                "health.path",
                "must be printable ASCII without spaces; percent-encode anything else",
            ));
        }
        if health.interval_secs == 0 || health.timeout_secs == 0 {
            return Err(invalid("health", "interval and timeout must be positive"));
        }
        if health.timeout_secs > health.interval_secs {
            return Err(invalid(
                "health.timeout_secs",
                format!(
                    "timeout ({}s) must not exceed interval ({}s)",
                    health.timeout_secs, health.interval_secs
                ),
            ));
        }
        if health.retries == 0 {
            return Err(invalid("health.retries", "must be at least 1"));
        }

        if self.server.port == 0 {
            return Err(invalid("server.port", "must be non-zero"));
        }
        if self.server.workers == 0 {
            return Err(invalid("server.workers", "must be at least 1"));
        }
        let module = &self.server.module;
        let well_formed = module.split_once(':').is_some_and(|(path, attr)| {
            let ident = |s: &str| {
                !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            };
            path.split('.').all(ident) && ident(attr)
        });
        if !well_formed {
            return Err(invalid("server.module", "expected `module:attribute`"));
        }
        check_token("server.host", &self.server.host)?;

        Ok(())
    }
}

/// A relative or absolute path made of `A-Z a-z 0-9 / . _ - + @ ,` only.
fn check_path(field: &'static str, value: &str) -> crate::Result<()> {
    if value.is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    let unsupported = value.chars().find(|c| {
        !(c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | '@' | ','))
    });
    match unsupported {
        Some(c) => Err(invalid(
            field,
            format!("unsupported character {c:?} in {value:?}"),
        )),
        None => Ok(()),
    }
}

fn check_absolute_path(field: &'static str, value: &str) -> crate::Result<()> {
    if !value.starts_with('/') {
        return Err(invalid(field, "must be an absolute path"));
    }
    check_path(field, value)
}

/// A single word: an image reference, a package name or a host.
fn check_token(field: &'static str, value: &str) -> crate::Result<()> {
    let valid = !value.is_empty()
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+' | ':' | '/' | '@'));
    if valid {
        Ok(())
    } else {
        Err(invalid(field, format!("{value:?} is not a single word")))
    }
}

fn check_env_name(field: &'static str, name: &str) -> crate::Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(invalid(field, format!("{name:?} is not a valid variable name")))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> crate::Error {
    crate::Error::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

fn default_true() -> bool {
    true
}

fn default_manifest() -> String {
    "requirements.txt".to_owned()
}

fn default_app_root() -> String {
    "/app".to_owned()
}

fn default_python_image() -> String {
    "python:3.12-slim".to_owned()
}

fn default_env_path() -> String {
    "/opt/venv".to_owned()
}

fn default_uploads_path() -> String {
    "/app/uploads".to_owned()
}

fn default_uploads_env() -> String {
    "UPLOADS".to_owned()
}

fn default_health_path() -> String {
    "/health".to_owned()
}

fn default_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_start_period_secs() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_module() -> String {
    "main:app".to_owned()
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8000
}

fn default_workers() -> u32 {
    4
}

fn default_limit_concurrency() -> u32 {
    100
}

fn default_keep_alive() -> u32 {
    5
}

fn default_shutdown_grace_secs() -> u64 {
    10
}
