//! The seam between governance and the code that actually touches resources.
//!
//! The pipeline hands every executor a compare-and-swap precondition per
//! target. An executor must refuse to act if any precondition no longer
//! holds at the moment it writes.

use std::fmt;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use warden_types::{Fingerprint, ResourcePath};
use warden_utils::{AtomicWriteOptions, PersistMode, atomic_write_with_options, fingerprint_file};

use crate::action::Action;

pub type ExecFut<'a> =
    Pin<Box<dyn Future<Output = Result<ExecutionReport, ExecutionError>> + Send + 'a>>;

/// What a resource must look like when the executor writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// The resource must not exist.
    Absent,
    Matches(Fingerprint),
    /// Not governed by freshness (unobserved resource).
    Any,
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Matches(fp) => write!(f, "{fp}"),
            Self::Any => f.write_str("any"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub resource: ResourcePath,
    pub expected: Expected,
}

impl Precondition {
    /// Check against the file currently under `root`.
    pub fn verify(&self, root: &Path) -> Result<(), ExecutionError> {
        let actual = fingerprint_file(&self.resource.to_path(root)).map_err(|e| {
            ExecutionError::Failed {
                message: format!("{}: {e}", self.resource),
            }
        })?;
        let holds = match self.expected {
            Expected::Any => true,
            Expected::Absent => actual.is_none(),
            Expected::Matches(fp) => actual == Some(fp),
        };
        if holds {
            Ok(())
        } else {
            Err(ExecutionError::PreconditionFailed {
                resource: self.resource.clone(),
                expected: self.expected,
                actual,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub output: String,
}

impl ExecutionReport {
    #[must_use]
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("precondition failed for {resource}: expected {expected}, found {}", display_actual(.actual))]
    PreconditionFailed {
        resource: ResourcePath,
        expected: Expected,
        actual: Option<Fingerprint>,
    },
    #[error("bad action args: {message}")]
    BadArgs { message: String },
    #[error("action failed: {message}")]
    Failed { message: String },
    #[error("unsupported action: {name}")]
    Unsupported { name: String },
}

fn display_actual(actual: &Option<Fingerprint>) -> String {
    actual.map_or_else(|| "absent".to_string(), |fp| fp.to_string())
}

/// Performs actions on behalf of the pipeline.
pub trait ActionExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        action: &'a Action,
        preconditions: &'a [Precondition],
    ) -> ExecFut<'a>;
}

/// Built-in file actions over a workspace directory.
///
/// | action | params |
/// |---|---|
/// | `read_file` | `path` |
/// | `write_file`, `write_to_file` | `path`, `content` |
/// | `edit_file`, `search_and_replace` | `path`, `old_string`, `new_string`, `replace_all?` |
/// | `insert_content` | `path`, `line` (1-based; 0 appends), `content` |
/// | `delete_file` | `path` |
#[derive(Debug, Clone)]
pub struct WorkspaceExecutor {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    #[serde(alias = "file_path", alias = "target_file")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    #[serde(alias = "file_path", alias = "target_file")]
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct EditArgs {
    #[serde(alias = "file_path", alias = "target_file")]
    path: String,
    #[serde(alias = "search")]
    old_string: String,
    #[serde(alias = "replace")]
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[derive(Debug, Deserialize)]
struct InsertArgs {
    #[serde(alias = "file_path", alias = "target_file")]
    path: String,
    line: usize,
    content: String,
}

impl WorkspaceExecutor {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn args<T: DeserializeOwned>(action: &Action) -> Result<T, ExecutionError> {
        serde_json::from_value(action.params.clone()).map_err(|e| ExecutionError::BadArgs {
            message: format!("{}: {e}", action.name),
        })
    }

    fn resolve(&self, raw: &str) -> Result<(ResourcePath, PathBuf), ExecutionError> {
        let resource = ResourcePath::from_workspace(raw, &self.root)
            .map_err(|e| ExecutionError::BadArgs { message: e.to_string() })?;
        let path = resource.to_path(&self.root);
        Ok((resource, path))
    }

    fn run(
        &self,
        action: &Action,
        preconditions: &[Precondition],
    ) -> Result<ExecutionReport, ExecutionError> {
        for precondition in preconditions {
            precondition.verify(&self.root)?;
        }

        match action.name.as_str() {
            "read_file" => {
                let args: PathArgs = Self::args(action)?;
                let (resource, path) = self.resolve(&args.path)?;
                let bytes = fs::read(&path).map_err(|e| io_failed(&resource, &e))?;
                Ok(ExecutionReport::new(String::from_utf8_lossy(&bytes)))
            }
            "write_file" | "write_to_file" => {
                let args: WriteArgs = Self::args(action)?;
                let (resource, path) = self.resolve(&args.path)?;
                write(&resource, &path, args.content.as_bytes())?;
                Ok(ExecutionReport::new(format!(
                    "Wrote {} bytes to {resource}",
                    args.content.len()
                )))
            }
            "edit_file" | "search_and_replace" => {
                let args: EditArgs = Self::args(action)?;
                let (resource, path) = self.resolve(&args.path)?;
                let original = fs::read_to_string(&path).map_err(|e| io_failed(&resource, &e))?;
                let updated = replace(&original, &args)?;
                write(&resource, &path, updated.as_bytes())?;
                Ok(ExecutionReport::new(format!("Edited {resource}")))
            }
            "insert_content" => {
                let args: InsertArgs = Self::args(action)?;
                let (resource, path) = self.resolve(&args.path)?;
                let original = match fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
                    Err(e) => return Err(io_failed(&resource, &e)),
                };
                let updated = insert_at_line(&original, args.line, &args.content)?;
                write(&resource, &path, updated.as_bytes())?;
                Ok(ExecutionReport::new(format!("Inserted content into {resource}")))
            }
            "delete_file" => {
                let args: PathArgs = Self::args(action)?;
                let (resource, path) = self.resolve(&args.path)?;
                fs::remove_file(&path).map_err(|e| io_failed(&resource, &e))?;
                Ok(ExecutionReport::new(format!("Deleted {resource}")))
            }
            other => Err(ExecutionError::Unsupported {
                name: other.to_string(),
            }),
        }
    }
}

impl ActionExecutor for WorkspaceExecutor {
    fn execute<'a>(
        &'a self,
        action: &'a Action,
        preconditions: &'a [Precondition],
    ) -> ExecFut<'a> {
        Box::pin(async move { self.run(action, preconditions) })
    }
}

fn io_failed(resource: &ResourcePath, err: &io::Error) -> ExecutionError {
    ExecutionError::Failed {
        message: format!("{resource}: {err}"),
    }
}

fn write(resource: &ResourcePath, path: &Path, bytes: &[u8]) -> Result<(), ExecutionError> {
    atomic_write_with_options(
        path,
        bytes,
        AtomicWriteOptions {
            mode: PersistMode::of_existing(path),
            ..AtomicWriteOptions::default()
        },
    )
    .map_err(|e| io_failed(resource, &e))
}

fn replace(original: &str, args: &EditArgs) -> Result<String, ExecutionError> {
    if args.old_string.is_empty() {
        return Err(ExecutionError::BadArgs {
            message: "old_string must not be empty".to_string(),
        });
    }
    match original.matches(args.old_string.as_str()).count() {
        0 => Err(ExecutionError::Failed {
            message: format!("old_string not found in {}", args.path),
        }),
        1 => Ok(original.replacen(&args.old_string, &args.new_string, 1)),
        n if args.replace_all => {
            tracing::debug!(path = %args.path, count = n, "Replacing all occurrences");
            Ok(original.replace(&args.old_string, &args.new_string))
        }
        n => Err(ExecutionError::Failed {
            message: format!(
                "old_string matches {n} times in {}; set replace_all or add context",
                args.path
            ),
        }),
    }
}

fn insert_at_line(original: &str, line: usize, content: &str) -> Result<String, ExecutionError> {
    let mut block = content.to_string();
    if !block.ends_with('\n') {
        block.push('\n');
    }
    let mut lines: Vec<&str> = original.split_inclusive('\n').collect();

    if line == 0 || line == lines.len() + 1 {
        let mut out = original.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&block);
        return Ok(out);
    }
    if line > lines.len() {
        return Err(ExecutionError::BadArgs {
            message: format!("line {line} is past the end ({} lines)", lines.len()),
        });
    }
    lines.insert(line - 1, &block);
    Ok(lines.concat())
}
