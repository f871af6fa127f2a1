use serde::{Deserialize, Serialize};

/// The non-privileged user/group the application process runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeIdentity {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_id")]
    pub uid: u32,
    #[serde(default = "default_id")]
    pub gid: u32,
    /// Home directory; defaults to `/home/<user>` when omitted.
    #[serde(default)]
    pub home: Option<String>,
}

impl Default for RuntimeIdentity {
    fn default() -> Self {
        Self {
            user: default_user(),
            group: default_group(),
            uid: default_id(),
            gid: default_id(),
            home: None,
        }
    }
}

impl RuntimeIdentity {
    pub fn home_dir(&self) -> String {
        match &self.home {
            Some(home) => home.clone(),
            None => format!("/home/{}", self.user),
        }
    }

    /// `user:group`, as used by `chown` and `COPY --chown`.
    pub fn owner_spec(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }

    /// Rejects any identity that would resolve to root inside the container.
    pub fn validate(&self) -> crate::Result<()> {
        if self.uid == 0 {
            return Err(crate::Error::RootIdentity {
                detail: "uid 0".to_owned(),
            });
        }
        if self.gid == 0 {
            return Err(crate::Error::RootIdentity {
                detail: "gid 0".to_owned(),
            });
        }
        if self.user == "root" || self.group == "root" {
            return Err(crate::Error::RootIdentity {
                detail: format!("{} name", self.owner_spec()),
            });
        }
        for (field, name) in [("identity.user", &self.user), ("identity.group", &self.group)] {
            if !is_account_name(name) {
                return Err(crate::Error::InvalidConfig {
                    field,
                    reason: format!("{name:?} is not a valid account name"),
                });
            }
        }
        if let Some(home) = &self.home {
            let valid = home.starts_with('/')
                && home
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'));
            if !valid {
                return Err(crate::Error::InvalidConfig {
                    field: "identity.home",
                    reason: format!("{home:?} is not a plain absolute path"),
                });
            }
        }
        Ok(())
    }
}

/// Portable account name: `[a-z_][a-z0-9_-]*`, at most 32 characters.
fn is_account_name(name: &str) -> bool {
    let mut chars = name.chars();
    name.len() <= 32
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
}

/// Who may write into the upload root.
///
/// `World` is accepted for compatibility with looser deployments but is
/// never the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPolicy {
    /// Owned by the runtime identity, writable by it alone.
    #[default]
    Owner,
    /// Owned by the runtime identity, writable by its group as well.
    Group,
    /// Writable by every identity.
    World,
}

impl UploadPolicy {
    /// Directory mode applied to the upload root.
    pub fn mode(self) -> u32 {
        match self {
            Self::Owner => 0o750,
            Self::Group => 0o770,
            Self::World => 0o777,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Group => "group",
            Self::World => "world",
        }
    }
}

fn default_user() -> String {
    "app".to_owned()
}

fn default_group() -> String {
    "app".to_owned()
}

fn default_id() -> u32 {
    1000
}
