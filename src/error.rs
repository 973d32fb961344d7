//! Error types of the transfer engine.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::operation::Operation;

/// Failure reported by a [`FilesService`](crate::fsops::FilesService) primitive.
#[derive(Debug, Error)]
pub enum FilesError {
    #[error("source and destination must be provided")]
    EmptyPath,
    #[error("directory path is empty")]
    EmptyDirectory,
    #[error("source {} is not a regular file", .0.display())]
    NotAFile(PathBuf),
    #[error("destination {} already exists", .0.display())]
    DestinationExists(PathBuf),
    #[error("destination {} is planned more than once", .0.display())]
    DuplicateDestination(PathBuf),
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("move {} to {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FilesError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// True when the underlying OS error says the path does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } | Self::Rename { source, .. } => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Transaction lifecycle phase an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Execution,
    Rollback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Execution => write!(f, "execution"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// One undo step that could not be applied.
#[derive(Debug)]
pub struct RollbackFailure {
    pub operation: Operation,
    pub source: FilesError,
}

impl fmt::Display for RollbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to rollback {}: {}", self.operation, self.source)
    }
}

/// Every failed undo step of one rollback pass, in unwinding order.
#[derive(Debug, Default)]
pub struct RollbackErrors(pub Vec<RollbackFailure>);

impl RollbackErrors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RollbackFailure> {
        self.0.iter()
    }
}

impl fmt::Display for RollbackErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RollbackErrors {}

/// Failure of a [`Transaction`](crate::transaction::Transaction).
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Raised by `validate` before anything touched the disk.
    #[error("transaction planning failed during {operation}: {source}")]
    Planning {
        operation: Operation,
        #[source]
        source: FilesError,
    },
    /// An operation failed and every completed operation was undone.
    #[error("transaction execution failed during {operation}: {source}")]
    Execution {
        operation: Operation,
        #[source]
        source: FilesError,
    },
    /// An operation failed and the automatic rollback left residue behind.
    #[error(
        "transaction execution failed during {operation}: execution failed: {source}; rollback also failed: {residue}"
    )]
    ExecutionWithResidue {
        operation: Operation,
        #[source]
        source: FilesError,
        residue: RollbackErrors,
    },
    /// A standalone rollback could not undo every completed operation.
    #[error("transaction rollback failed: rollback errors: {0}")]
    Rollback(#[source] RollbackErrors),
}

impl TransactionError {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Planning { .. } => Phase::Planning,
            Self::Execution { .. } | Self::ExecutionWithResidue { .. } => Phase::Execution,
            Self::Rollback(_) => Phase::Rollback,
        }
    }

    /// The operation that triggered the failure; `None` for rollback errors.
    pub fn operation(&self) -> Option<&Operation> {
        match self {
            Self::Planning { operation, .. }
            | Self::Execution { operation, .. }
            | Self::ExecutionWithResidue { operation, .. } => Some(operation),
            Self::Rollback(_) => None,
        }
    }

    /// Rollback failures attached to this error, if any.
    pub fn residue(&self) -> Option<&RollbackErrors> {
        match self {
            Self::ExecutionWithResidue { residue, .. } | Self::Rollback(residue) => Some(residue),
            _ => None,
        }
    }

    /// False when some completed operation could not be undone.
    pub fn rolled_back_cleanly(&self) -> bool {
        self.residue().is_none()
    }
}
