//! Boundary to the external tagging service that reads embedded media metadata.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Tags extracted from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filepath: PathBuf,
    pub tags: BTreeMap<String, String>,
}

impl FileMetadata {
    pub fn new(filepath: impl Into<PathBuf>) -> Self {
        Self {
            filepath: filepath.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to run {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} exited with {status}: {stderr}", .program.display())]
    Failed {
        program: PathBuf,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("unreadable metadata output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reads embedded tags for a batch of files.
pub trait MetadataReader {
    fn read_tags(&self, paths: &[PathBuf]) -> Result<Vec<FileMetadata>, MetadataError>;
}

/// [`MetadataReader`] that shells out to `exiftool -json`.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new("exiftool")
    }
}

impl MetadataReader for ExifTool {
    fn read_tags(&self, paths: &[PathBuf]) -> Result<Vec<FileMetadata>, MetadataError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        debug!(program = %self.program.display(), files = paths.len(), "reading metadata");
        let output = Command::new(&self.program)
            .arg("-json")
            .args(paths)
            .output()
            .map_err(|source| MetadataError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // exiftool exits non-zero when only some files were readable, but
        // still prints what it found.
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(MetadataError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        parse_exiftool_json(&output.stdout)
    }
}

/// Parse the array printed by `exiftool -json`. Non-string values are kept
/// in their JSON text form.
pub fn parse_exiftool_json(bytes: &[u8]) -> Result<Vec<FileMetadata>, MetadataError> {
    let records: Vec<BTreeMap<String, Value>> = serde_json::from_slice(bytes)?;
    Ok(records
        .into_iter()
        .map(|mut record| {
            let filepath = match record.remove("SourceFile") {
                Some(Value::String(path)) => PathBuf::from(path),
                _ => PathBuf::new(),
            };
            let tags = record
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect();
            FileMetadata { filepath, tags }
        })
        .collect())
}
