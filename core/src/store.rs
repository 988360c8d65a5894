//! Read access to governed resources.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use warden_types::ResourcePath;

/// Source of current resource content.
///
/// `Ok(None)` means the resource does not exist; `Err` means it exists (or
/// might) but could not be read.
pub trait ResourceStore: Send + Sync {
    fn read(&self, resource: &ResourcePath) -> io::Result<Option<Vec<u8>>>;
}

/// Files under a workspace root.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceStore for WorkspaceStore {
    fn read(&self, resource: &ResourcePath) -> io::Result<Option<Vec<u8>>> {
        match fs::read(resource.to_path(&self.root)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}
