use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical, workspace-relative resource identifier.
///
/// # Invariants
///
/// - `/`-separated, no leading `./`, no `.` or `..` components
/// - never empty and never absolute
///
/// Normalization is purely lexical (`a/../b` becomes `b`); symlinks are not
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourcePathError {
    #[error("resource path is empty")]
    Empty,
    #[error("resource path contains control characters")]
    ControlChars,
    #[error("resource path '{0}' escapes the workspace")]
    Escapes(String),
}

impl ResourcePath {
    /// Normalize a workspace-relative path.
    pub fn new(raw: &str) -> Result<Self, ResourcePathError> {
        Self::normalize(raw, None)
    }

    /// Normalize a path that may be absolute under `root`.
    pub fn from_workspace(raw: &str, root: &Path) -> Result<Self, ResourcePathError> {
        Self::normalize(raw, Some(root))
    }

    fn normalize(raw: &str, root: Option<&Path>) -> Result<Self, ResourcePathError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ResourcePathError::Empty);
        }
        if raw.chars().any(char::is_control) {
            return Err(ResourcePathError::ControlChars);
        }
        let unified = raw.replace('\\', "/");
        let mut path = PathBuf::from(&unified);
        if path.is_absolute() {
            let stripped = root
                .and_then(|root| path.strip_prefix(root).ok())
                .ok_or_else(|| ResourcePathError::Escapes(raw.to_string()))?;
            path = stripped.to_path_buf();
        }

        let mut parts: Vec<String> = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir if parts.pop().is_some() => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ResourcePathError::Escapes(raw.to_string()));
                }
            }
        }
        if parts.is_empty() {
            return Err(ResourcePathError::Empty);
        }
        Ok(Self(parts.join("/")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Location of this resource on disk under `root`.
    #[must_use]
    pub fn to_path(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = ResourcePathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(value: ResourcePath) -> Self {
        value.0
    }
}

impl AsRef<str> for ResourcePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
