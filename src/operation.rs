//! Planned, reversible file operations.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::FilesError;
use crate::fsops::{DIR_MODE, FilesService, non_empty_parent};

/// Discriminator used in messages and dry-run output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Copy,
    Move,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Move => write!(f, "move"),
        }
    }
}

/// A single planned unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Copy `source` to `destination`; undone by deleting the destination.
    Copy {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Rename `source` to `destination`; undone by renaming it back.
    Move {
        source: PathBuf,
        destination: PathBuf,
    },
}

impl Operation {
    pub fn copy(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Copy {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn move_to(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Move {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn new(
        kind: OperationKind,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        match kind {
            OperationKind::Copy => Self::copy(source, destination),
            OperationKind::Move => Self::move_to(source, destination),
        }
    }

    pub fn source(&self) -> &Path {
        match self {
            Self::Copy { source, .. } | Self::Move { source, .. } => source,
        }
    }

    pub fn destination(&self) -> &Path {
        match self {
            Self::Copy { destination, .. } | Self::Move { destination, .. } => destination,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Copy { .. } => OperationKind::Copy,
            Self::Move { .. } => OperationKind::Move,
        }
    }

    /// Apply the operation.
    ///
    /// With `overwrite` unset an existing destination is an error. With it
    /// set, a copy is staged next to the destination and renamed over it,
    /// and a move renames over it directly.
    pub fn execute(&self, fs: &dyn FilesService, overwrite: bool) -> Result<(), FilesError> {
        match self {
            Self::Copy {
                source,
                destination,
            } => {
                if overwrite && fs.is_file(destination) {
                    replace(fs, source, destination)
                } else {
                    fs.copy(source, destination).map(|_| ())
                }
            }
            Self::Move {
                source,
                destination,
            } => {
                if !overwrite && (fs.is_file(destination) || fs.is_directory(destination)) {
                    return Err(FilesError::DestinationExists(destination.clone()));
                }
                if let Some(parent) = non_empty_parent(destination) {
                    fs.ensure_dir(parent, DIR_MODE)?;
                }
                fs.rename(source, destination)
            }
        }
    }

    /// Undo exactly this operation. A destination that is already gone is
    /// not an error.
    pub fn rollback(&self, fs: &dyn FilesService) -> Result<(), FilesError> {
        let result = match self {
            Self::Copy { destination, .. } => fs.remove_file(destination),
            Self::Move {
                source,
                destination,
            } => fs.rename(destination, source),
        };
        match result {
            Err(e) if e.is_not_found() => {
                debug!(operation = %self, "nothing to roll back");
                Ok(())
            }
            other => other,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.kind(),
            self.source().display(),
            self.destination().display()
        )
    }
}

/// Hidden sibling a replacing copy is written to before it is renamed into place.
fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.partial"))
}

fn replace(fs: &dyn FilesService, source: &Path, destination: &Path) -> Result<(), FilesError> {
    let staging = staging_path(destination);
    debug!(staging = %staging.display(), "staging replacement copy");
    fs.copy(source, &staging)?;
    fs.rename(&staging, destination).inspect_err(|_| {
        let _ = fs.remove_file(&staging);
    })
}
