use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::fsops::FilesService;
use crate::metadata::FileMetadata;
use crate::reporter::ProgressReporter;

/// Tags consulted for the capture time, most preferred first.
pub const DATE_TAGS: [&str; 3] = ["CreationDate", "DateTimeOriginal", "CreateDate"];

/// Make `path` absolute against the current directory without touching the disk.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize()
        .with_context(|| format!("resolving {}", path.display()))?
        .into_owned())
}

/// Expand a user-supplied source into the absolute paths of the files to transfer.
///
/// A file yields itself; a directory yields its immediate regular files,
/// sorted by name. Subdirectories are not descended into.
pub fn collect_sources(
    fs: &dyn FilesService,
    path: &Path,
    reporter: &mut dyn ProgressReporter,
) -> Result<Vec<PathBuf>> {
    let path = absolute(path)?;

    if fs.is_file(&path) {
        reporter.set_message("Collecting single file");
        reporter.set_total(1);
        reporter.set_current(1);
        reporter.finish();
        return Ok(vec![path]);
    }

    if fs.is_directory(&path) {
        reporter.set_message("Reading directory");
        let entries = read_directory(&path)?;

        reporter.set_message("Collecting files from directory");
        reporter.set_total(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            reporter.set_message(&format!("Collecting {}", entry.display()));
            reporter.set_current(i + 1);
        }
        reporter.finish();
        debug!(dir = %path.display(), files = entries.len(), "collected sources");
        return Ok(entries);
    }

    bail!("unknown source argument: {}", path.display())
}

/// Regular files (or links to them) directly inside `dir`, sorted by name.
pub fn read_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to read directory {}", dir.display()))?;
        if entry.path().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Map a file's capture time to `base/YYYY/MM/DD/HH_MM<.ext>`.
///
/// The wall-clock fields of the recorded time are used as-is; the offset,
/// when present, is not applied. The extension of `md.filepath` is kept.
pub fn destination_from_metadata(md: &FileMetadata, base: &Path) -> Result<PathBuf> {
    let raw = DATE_TAGS
        .iter()
        .find_map(|tag| md.tag(tag).filter(|v| !v.trim().is_empty()))
        .ok_or_else(|| anyhow!("CreationDate is missing for {}", md.filepath.display()))?;
    let taken = parse_capture_time(raw)?;

    let mut name = format!("{:02}_{:02}", taken.hour(), taken.minute());
    if let Some(ext) = md.filepath.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }

    Ok(base
        .join(format!("{:04}", taken.year()))
        .join(format!("{:02}", taken.month()))
        .join(format!("{:02}", taken.day()))
        .join(name))
}

/// Parse exiftool's `YYYY:MM:DD HH:MM:SS[.fff][±HH:MM|Z]` date format.
pub fn parse_capture_time(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S%.f%:z") {
        return Ok(dt.naive_local());
    }
    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    NaiveDateTime::parse_from_str(naive, "%Y:%m:%d %H:%M:%S%.f")
        .with_context(|| format!("failed to parse CreationDate {raw:?}"))
}
