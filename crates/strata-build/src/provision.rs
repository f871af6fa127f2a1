//! Identity and permission provisioning.
//!
//! Ordering: files are copied as root, ownership and modes are fixed, and
//! only then does the image switch to the runtime identity. The final
//! step is a write probe executed as that identity; the build fails if the
//! upload root is not writable or if the rest of the app root is.

use std::path::Path;

use strata_core::{PackageManager, RuntimeIdentity, UploadsConfig};

use crate::plan::Instruction;

/// File name used by the write probe inside the upload root.
pub const PROBE_NAME: &str = ".strata-probe";

/// Who owns a governed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Root,
    Identity,
}

/// Ownership and mode applied to one path (recursively for the app root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub path: String,
    pub owner: Owner,
    /// Group owner is the identity's group rather than root.
    pub identity_group: bool,
    pub dir_mode: u32,
    /// Mode of a regular, non-executable file under the path.
    pub file_mode: u32,
}

/// The ownership policy as data: the app root read-only to the identity,
/// the upload root writable per [`strata_core::UploadPolicy`].
#[derive(Debug, Clone)]
pub struct PermissionPlan {
    pub identity: RuntimeIdentity,
    pub rules: Vec<PathRule>,
}

impl PermissionPlan {
    /// The most specific rule governing `path`.
    pub fn rule_for(&self, path: &str) -> Option<&PathRule> {
        self.rules
            .iter()
            .filter(|r| Path::new(path).starts_with(&r.path))
            .max_by_key(|r| r.path.len())
    }

    /// Whether `uid`/`gid` may create entries in the directory at `path`.
    pub fn can_write(&self, uid: u32, gid: u32, path: &str) -> bool {
        let Some(rule) = self.rule_for(path) else {
            return false;
        };
        if uid == 0 {
            return true;
        }
        let owner_uid = match rule.owner {
            Owner::Root => 0,
            Owner::Identity => self.identity.uid,
        };
        let group_gid = if rule.identity_group {
            self.identity.gid
        } else {
            0
        };
        let bit = if uid == owner_uid {
            0o200
        } else if gid == group_gid {
            0o020
        } else {
            0o002
        };
        rule.dir_mode & bit != 0
    }

    /// Shorthand for [`Self::can_write`] with the runtime identity.
    pub fn identity_can_write(&self, path: &str) -> bool {
        self.can_write(self.identity.uid, self.identity.gid, path)
    }
}

pub struct PermissionProvisioner<'a> {
    identity: &'a RuntimeIdentity,
    uploads: &'a UploadsConfig,
    app_root: &'a str,
    manager: PackageManager,
}

impl<'a> PermissionProvisioner<'a> {
    pub fn new(
        identity: &'a RuntimeIdentity,
        uploads: &'a UploadsConfig,
        app_root: &'a str,
        manager: PackageManager,
    ) -> Self {
        Self {
            identity,
            uploads,
            app_root,
            manager,
        }
    }

    pub fn plan(&self) -> PermissionPlan {
        let mode = self.uploads.policy.mode();
        PermissionPlan {
            identity: self.identity.clone(),
            rules: vec![
                PathRule {
                    path: self.app_root.to_owned(),
                    owner: Owner::Root,
                    identity_group: false,
                    dir_mode: 0o755,
                    file_mode: 0o644,
                },
                PathRule {
                    path: self.uploads.path.clone(),
                    owner: Owner::Identity,
                    identity_group: true,
                    dir_mode: mode,
                    file_mode: mode & 0o666,
                },
            ],
        }
    }

    pub fn create_identity(&self) -> String {
        let id = self.identity;
        let home = id.home_dir();
        match self.manager {
            PackageManager::Apt => format!(
                "groupadd --system --gid {gid} {group} \
                 && useradd --system --uid {uid} --gid {group} --home-dir {home} \
                 --create-home --shell /usr/sbin/nologin {user}",
                gid = id.gid,
                group = id.group,
                uid = id.uid,
                user = id.user,
            ),
            PackageManager::Apk => format!(
                "addgroup -S -g {gid} {group} \
                 && adduser -S -D -u {uid} -G {group} -h {home} -s /sbin/nologin {user}",
                gid = id.gid,
                group = id.group,
                uid = id.uid,
                user = id.user,
            ),
        }
    }

    /// Applies [`Self::plan`] to the image filesystem.
    pub fn apply_permissions(&self) -> String {
        let plan = self.plan();
        let mut steps = Vec::new();
        for rule in &plan.rules {
            let owner = match rule.owner {
                Owner::Root => "root".to_owned(),
                Owner::Identity => self.identity.user.clone(),
            };
            let group = if rule.identity_group {
                self.identity.group.clone()
            } else {
                "root".to_owned()
            };
            if rule.path == self.uploads.path {
                steps.push(format!("mkdir -p {}", rule.path));
                steps.push(format!("chown -R {owner}:{group} {}", rule.path));
                steps.push(format!("chmod {:04o} {}", rule.dir_mode, rule.path));
            } else {
                // Drops group/other write bits and keeps existing execute bits.
                steps.push(format!("chown -R {owner}:{group} {}", rule.path));
                steps.push(format!("chmod -R u+rwX,go+rX,go-w {}", rule.path));
            }
        }
        steps.join(" && ")
    }

    /// Must run as the runtime identity: writes a file and a nested
    /// directory into the upload root, removes them, then asserts the app
    /// root itself rejects writes.
    pub fn write_probe(&self) -> String {
        let uploads = &self.uploads.path;
        let root = self.app_root;
        format!(
            "touch {uploads}/{PROBE_NAME} \
             && mkdir -p {uploads}/{PROBE_NAME}.d/nested \
             && touch {uploads}/{PROBE_NAME}.d/nested/file \
             && rm -rf {uploads}/{PROBE_NAME} {uploads}/{PROBE_NAME}.d \
             && if touch {root}/{PROBE_NAME} 2>/dev/null; then \
             echo \"{root} is writable by the runtime identity\" >&2; exit 1; fi"
        )
    }

    /// Provisioning instructions in protocol order.
    pub fn instructions(&self) -> Vec<Instruction> {
        vec![
            Instruction::Run(self.create_identity()),
            Instruction::Run(self.apply_permissions()),
            Instruction::User {
                uid: self.identity.uid,
                gid: self.identity.gid,
            },
            Instruction::Check(self.write_probe()),
        ]
    }
}
