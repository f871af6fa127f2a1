use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};

/// One `name constraint` entry of the dependency manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    /// Everything after the name: extras, version specifiers, markers.
    /// Empty when the requirement is unpinned.
    pub constraint: String,
}

impl Requirement {
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Ordered, immutable list of third-party requirements.
///
/// Parsed from a pip requirements file. Comments, blank lines and option
/// lines (`-r`, `--index-url`, ...) are skipped.
#[derive(Debug, Clone)]
pub struct Manifest {
    requirements: Vec<Requirement>,
    content: String,
}

impl Manifest {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| crate::Error::ManifestRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let manifest = Self::parse(&content)?;
        tracing::debug!(
            path = %path.display(),
            requirements = manifest.requirements.len(),
            "loaded dependency manifest"
        );
        Ok(manifest)
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        let mut requirements = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_comment(raw).trim();
            if line.is_empty() || line.starts_with('-') {
                continue;
            }

            let name_len = line
                .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
                // arch-lint: allow(no-silent-result-drop) reason="no delimiter means the whole line is the name"
                .unwrap_or(line.len());
            let name = &line[..name_len];
            if name.is_empty() {
                return Err(crate::Error::ManifestParse {
                    line: line_no,
                    reason: format!("expected a package name, found {line:?}"),
                });
            }

            let normalized = normalize_name(name);
            if let Some(first) = seen.insert(normalized.clone(), line_no) {
                return Err(crate::Error::DuplicateRequirement {
                    name: normalized,
                    first,
                    second: line_no,
                });
            }

            requirements.push(Requirement {
                name: name.to_owned(),
                constraint: line[name_len..].trim().to_owned(),
            });
        }

        Ok(Self {
            requirements,
            content: content.to_owned(),
        })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        let wanted = normalize_name(name);
        self.requirements
            .iter()
            .any(|r| r.normalized_name() == wanted)
    }

    /// The manifest file exactly as read; this is what the builder copies.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// SHA-256 over the ordered entries, insensitive to comments and
    /// whitespace.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for req in &self.requirements {
            hasher.update(req.normalized_name().as_bytes());
            hasher.update(b"\t");
            hasher.update(req.constraint.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// PEP 503 style name normalization.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(pos) => &line[..pos],
        None => line,
    }
}
