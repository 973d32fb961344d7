//! Filesystem primitives the transfer engine is built on.
//!
//! [`FilesService`] is the only way operations touch the disk, so tests can
//! swap in a recording double. [`LocalFiles`] is the real implementation.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use filetime::FileTime;
use tracing::{debug, warn};

use crate::error::FilesError;
use crate::transaction::Transaction;

/// Permissions used for directories created during transfers (rwxr-xr-x).
pub const DIR_MODE: u32 = 0o755;

/// Capability set consumed by operations and transactions.
pub trait FilesService {
    /// Byte-for-byte copy that never clobbers an existing destination.
    ///
    /// Re-validates its arguments, creates the destination's parent and
    /// removes a partially written destination on failure. Returns the number
    /// of bytes copied.
    fn copy(&self, src: &Path, dst: &Path) -> Result<u64, FilesError>;

    /// Recursively create `path`; succeeds if it already exists.
    fn ensure_dir(&self, path: &Path, mode: u32) -> Result<(), FilesError>;

    /// Pre-flight check: both paths given, source a regular file, destination absent.
    fn validate_copy_args(&self, src: &Path, dst: &Path) -> Result<(), FilesError>;

    /// Atomic rename of `from` to `to`.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FilesError>;

    fn remove_file(&self, path: &Path) -> Result<(), FilesError>;

    /// False on any stat failure.
    fn is_file(&self, path: &Path) -> bool;

    /// False on any stat failure.
    fn is_directory(&self, path: &Path) -> bool;

    /// Start a new transaction bound to this service.
    fn new_transaction(&self, overwrite_allowed: bool) -> Transaction<'_>
    where
        Self: Sized,
    {
        Transaction::new(self, overwrite_allowed)
    }
}

/// [`FilesService`] backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFiles;

impl LocalFiles {
    pub fn new() -> Self {
        Self
    }

    /// Copy `src` to `dst`, then run `finalize` on the written file. Any
    /// failure after `dst` was created removes it again.
    fn copy_with<F>(&self, src: &Path, dst: &Path, finalize: F) -> Result<u64, FilesError>
    where
        F: FnOnce(&Path, &fs::Metadata) -> Result<(), FilesError>,
    {
        self.validate_copy_args(src, dst)?;

        let mut input = File::open(src).map_err(|e| FilesError::io("open", src, e))?;
        let metadata = input
            .metadata()
            .map_err(|e| FilesError::io("stat", src, e))?;

        if let Some(parent) = non_empty_parent(dst) {
            self.ensure_dir(parent, DIR_MODE)?;
        }

        let mut output =
            create_exclusive(dst, &metadata).map_err(|e| FilesError::io("create", dst, e))?;
        let written = transfer(&mut input, &mut output)
            .map_err(|e| FilesError::io("copy data to", dst, e));
        drop(output);

        match written.and_then(|bytes| finalize(dst, &metadata).map(|()| bytes)) {
            Ok(bytes) => {
                debug!(src = %src.display(), dst = %dst.display(), bytes, "copied file");
                Ok(bytes)
            }
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(dst) {
                    warn!(dst = %dst.display(), error = %cleanup, "could not remove partial copy");
                }
                Err(err)
            }
        }
    }
}

impl FilesService for LocalFiles {
    fn copy(&self, src: &Path, dst: &Path) -> Result<u64, FilesError> {
        self.copy_with(src, dst, apply_source_attributes)
    }

    fn ensure_dir(&self, path: &Path, mode: u32) -> Result<(), FilesError> {
        if path.as_os_str().is_empty() {
            return Err(FilesError::EmptyDirectory);
        }
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        builder
            .create(path)
            .map_err(|e| FilesError::io("creating directory", path, e))
    }

    fn validate_copy_args(&self, src: &Path, dst: &Path) -> Result<(), FilesError> {
        if src.as_os_str().is_empty() || dst.as_os_str().is_empty() {
            return Err(FilesError::EmptyPath);
        }
        if !self.is_file(src) {
            return Err(FilesError::NotAFile(src.to_path_buf()));
        }
        match fs::symlink_metadata(dst) {
            Ok(_) => Err(FilesError::DestinationExists(dst.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FilesError::io("checking destination", dst, e)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FilesError> {
        fs::rename(from, to).map_err(|source| FilesError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })
    }

    fn remove_file(&self, path: &Path) -> Result<(), FilesError> {
        fs::remove_file(path).map_err(|e| FilesError::io("remove", path, e))
    }

    fn is_file(&self, path: &Path) -> bool {
        fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    fn is_directory(&self, path: &Path) -> bool {
        fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }
}

/// Parent of `path`, unless it is the empty path of a bare file name.
pub(crate) fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

fn create_exclusive(dst: &Path, source_meta: &fs::Metadata) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(source_meta.permissions().mode());
    }
    #[cfg(not(unix))]
    let _ = source_meta;
    options.open(dst)
}

/// Re-apply the source's permission bits (creation mode is subject to the
/// umask) and modification time.
fn apply_source_attributes(dst: &Path, source_meta: &fs::Metadata) -> Result<(), FilesError> {
    fs::set_permissions(dst, source_meta.permissions())
        .map_err(|e| FilesError::io("set permissions on", dst, e))?;
    filetime::set_file_mtime(dst, FileTime::from_last_modification_time(source_meta))
        .map_err(|e| FilesError::io("set modification time on", dst, e))
}

fn transfer(input: &mut File, output: &mut File) -> io::Result<u64> {
    let bytes = io::copy(input, output)?;
    output.sync_all()?;
    Ok(bytes)
}
