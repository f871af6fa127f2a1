//! Runtime base selection.
//!
//! The dependency stage links native extensions against shared libraries.
//! The runtime stage must ship exactly the run-time half of those
//! libraries: every library the stager builds against needs its shared
//! object package in the runtime image, and no compiler or header package
//! may follow it there.

use strata_core::{Manifest, NativeLibraryConfig, PackageManager, RuntimeConfig, normalize_name};

use crate::error::BuildError;

/// A shared library some Python distribution links against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLibrary {
    pub name: String,
    /// Normalized names of the distributions that need it.
    pub packages: Vec<String>,
    /// Headers and link-time package, builder only.
    pub build: String,
    /// Shared object package, runtime only.
    pub runtime: String,
}

/// (library, python distributions, apt build, apt runtime, apk build, apk runtime)
const BUILTIN: &[(&str, &[&str], &str, &str, &str, &str)] = &[
    (
        "libjpeg",
        &["pillow"],
        "libjpeg62-turbo-dev",
        "libjpeg62-turbo",
        "libjpeg-turbo-dev",
        "libjpeg-turbo",
    ),
    ("zlib", &["pillow"], "zlib1g-dev", "zlib1g", "zlib-dev", "zlib"),
    (
        "libwebp",
        &["pillow"],
        "libwebp-dev",
        "libwebp7",
        "libwebp-dev",
        "libwebp",
    ),
    (
        "libpq",
        &["psycopg2", "asyncpg"],
        "libpq-dev",
        "libpq5",
        "postgresql-dev",
        "libpq",
    ),
    (
        "libxml2",
        &["lxml"],
        "libxml2-dev",
        "libxml2",
        "libxml2-dev",
        "libxml2",
    ),
    (
        "libxslt",
        &["lxml"],
        "libxslt1-dev",
        "libxslt1.1",
        "libxslt-dev",
        "libxslt",
    ),
    (
        "libffi",
        &["cffi"],
        "libffi-dev",
        "libffi8",
        "libffi-dev",
        "libffi",
    ),
    (
        "openssl",
        &["cryptography"],
        "libssl-dev",
        "libssl3",
        "openssl-dev",
        "libssl3",
    ),
    (
        "libmagic",
        &["python-magic"],
        "libmagic-dev",
        "libmagic1",
        "file-dev",
        "libmagic",
    ),
    (
        "libmysqlclient",
        &["mysqlclient"],
        "default-libmysqlclient-dev",
        "libmariadb3",
        "mariadb-dev",
        "mariadb-connector-c",
    ),
];

/// Built-in library table for one package manager, extended from config.
#[derive(Debug, Clone)]
pub struct NativeCatalog {
    libraries: Vec<NativeLibrary>,
}

impl NativeCatalog {
    pub fn new(manager: PackageManager, extra: &[NativeLibraryConfig]) -> Self {
        let mut libraries: Vec<NativeLibrary> = BUILTIN
            .iter()
            .map(|(name, pkgs, apt_build, apt_rt, apk_build, apk_rt)| {
                let (build, runtime) = match manager {
                    PackageManager::Apt => (apt_build, apt_rt),
                    PackageManager::Apk => (apk_build, apk_rt),
                };
                NativeLibrary {
                    name: (*name).to_owned(),
                    packages: pkgs.iter().map(|p| (*p).to_owned()).collect(),
                    build: (*build).to_owned(),
                    runtime: (*runtime).to_owned(),
                }
            })
            .collect();

        for lib in extra {
            let entry = NativeLibrary {
                name: lib.name.clone(),
                packages: lib.packages.iter().map(|p| normalize_name(p)).collect(),
                build: lib.build.clone(),
                runtime: lib.runtime.clone(),
            };
            match libraries.iter_mut().find(|l| l.name == lib.name) {
                Some(existing) => *existing = entry,
                None => libraries.push(entry),
            }
        }

        Self { libraries }
    }

    /// Libraries linked by the manifest's distributions, in catalog order.
    pub fn required_by(&self, manifest: &Manifest) -> Vec<NativeLibrary> {
        self.libraries
            .iter()
            .filter(|lib| lib.packages.iter().any(|p| manifest.contains(p)))
            .cloned()
            .collect()
    }
}

/// The minimal image the assembler builds on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeBase {
    pub image: String,
    pub package_manager: PackageManager,
    pub packages: Vec<String>,
}

impl RuntimeBase {
    pub fn install_command(&self) -> Option<String> {
        install_command(self.package_manager, &self.packages)
    }
}

/// Picks the runtime image and the shared-library packages it must carry.
pub struct RuntimeBaseSelector<'a> {
    config: &'a RuntimeConfig,
}

impl<'a> RuntimeBaseSelector<'a> {
    pub fn new(config: &'a RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn select(&self, required: &[NativeLibrary]) -> Result<RuntimeBase, BuildError> {
        let mut packages: Vec<String> = Vec::new();
        for pkg in &self.config.packages {
            push_unique(&mut packages, pkg);
        }

        for lib in required {
            if packages.contains(&lib.runtime) {
                continue;
            }
            if !self.config.auto_libraries {
                return Err(BuildError::MissingRuntimeLibrary {
                    library: lib.name.clone(),
                    package: lib.runtime.clone(),
                });
            }
            push_unique(&mut packages, &lib.runtime);
        }

        if let Some(pkg) = packages.iter().find(|p| is_toolchain_package(p)) {
            return Err(BuildError::ToolchainInRuntime {
                package: pkg.clone(),
            });
        }

        tracing::debug!(
            image = %self.config.image,
            packages = ?packages,
            "selected runtime base"
        );

        Ok(RuntimeBase {
            image: self.config.image.clone(),
            package_manager: self.config.package_manager(),
            packages,
        })
    }
}

/// Compilers, headers and build meta-packages.
pub fn is_toolchain_package(name: &str) -> bool {
    const EXACT: &[&str] = &[
        "build-essential",
        "build-base",
        "gcc",
        "g++",
        "cc",
        "clang",
        "make",
        "cmake",
        "gfortran",
        "pkg-config",
        "pkgconf",
        "rustc",
        "cargo",
        "autoconf",
        "automake",
        "libtool",
    ];
    let name = name.trim();
    EXACT.contains(&name)
        || name.starts_with("gcc-")
        || name.starts_with("g++-")
        || name.ends_with("-dev")
        || name.ends_with("-devel")
        || name.ends_with("-headers")
}

/// Package installation that leaves no package index or cache behind.
pub fn install_command(manager: PackageManager, packages: &[String]) -> Option<String> {
    if packages.is_empty() {
        return None;
    }
    let list = packages.join(" ");
    Some(match manager {
        PackageManager::Apt => format!(
            "apt-get update && apt-get install -y --no-install-recommends {list} \
             && rm -rf /var/lib/apt/lists/*"
        ),
        PackageManager::Apk => format!("apk add --no-cache {list}"),
    })
}

pub(crate) fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_owned());
    }
}
