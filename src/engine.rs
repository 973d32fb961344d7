use anyhow::{Context, Result, anyhow, bail};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::bar::BarReporter;
use crate::cli::{ReadArgs, TransferArgs};
use crate::error::FilesError;
use crate::fsops::FilesService;
use crate::metadata::{FileMetadata, MetadataReader};
use crate::operation::{Operation, OperationKind};
use crate::reporter::{NoOpReporter, ProgressReporter};
use crate::resolve;
use crate::transaction::Transaction;

/// External collaborators a command runs against.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub files: &'a dyn FilesService,
    pub metadata: &'a dyn MetadataReader,
}

/// Print the metadata of a single file as JSON.
pub fn read(args: &ReadArgs, services: Services<'_>, out: &mut dyn Write) -> Result<()> {
    if !services.files.is_file(&args.source) {
        bail!("{} is not a file", args.source.display());
    }
    let metadata = services
        .metadata
        .read_tags(std::slice::from_ref(&args.source))
        .context("failed to read metadata")?;
    serde_json::to_writer_pretty(&mut *out, &metadata).context("failed to write metadata")?;
    writeln!(out)?;
    Ok(())
}

pub fn copy(args: &TransferArgs, services: Services<'_>, out: &mut dyn Write) -> Result<()> {
    transfer(OperationKind::Copy, args, services, out)
}

pub fn move_files(args: &TransferArgs, services: Services<'_>, out: &mut dyn Write) -> Result<()> {
    transfer(OperationKind::Move, args, services, out)
}

fn transfer(
    kind: OperationKind,
    args: &TransferArgs,
    services: Services<'_>,
    out: &mut dyn Write,
) -> Result<()> {
    if args.jobs > 1 {
        warn!(jobs = args.jobs, "concurrent transfers are not supported, running sequentially");
    }

    let mut collecting = reporter_for(args.progress);
    let sources = resolve::collect_sources(services.files, &args.source, collecting.as_mut())?;
    let destination_root = resolve::absolute(&args.destination)?;
    let plan = plan(&sources, &destination_root, services.metadata)?;
    info!(%kind, files = plan.len(), atomic = args.atomic, "planned transfer");

    if args.atomic {
        transfer_atomically(kind, plan, args, services.files, out)
    } else {
        transfer_sequentially(kind, plan, args, services.files, out)
    }
}

/// Pair every source with the destination its metadata maps to.
fn plan(
    sources: &[PathBuf],
    destination_root: &Path,
    metadata: &dyn MetadataReader,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut by_path: HashMap<PathBuf, FileMetadata> = metadata
        .read_tags(sources)
        .context("failed to read metadata")?
        .into_iter()
        .map(|md| (md.filepath.clone(), md))
        .collect();

    sources
        .iter()
        .map(|src| {
            let md = by_path
                .remove(src)
                .ok_or_else(|| anyhow!("no metadata for {}", src.display()))?;
            let dst = resolve::destination_from_metadata(&md, destination_root)
                .with_context(|| format!("error creating destination for {}", src.display()))?;
            Ok((src.clone(), dst))
        })
        .collect()
}

fn transfer_atomically(
    kind: OperationKind,
    plan: Vec<(PathBuf, PathBuf)>,
    args: &TransferArgs,
    files: &dyn FilesService,
    out: &mut dyn Write,
) -> Result<()> {
    let mut tx = Transaction::new(files, args.overwrite);
    for (src, dst) in plan {
        match kind {
            OperationKind::Copy => tx.add_copy(src, dst)?,
            OperationKind::Move => tx.add_move(src, dst)?,
        }
    }

    tx.validate()?;

    if args.dry_run {
        for op in tx.operations() {
            writeln!(
                out,
                "Would {} {} → {}",
                op.kind(),
                op.source().display(),
                op.destination().display()
            )?;
        }
        return Ok(());
    }

    let mut reporter = reporter_for(args.progress);
    if let Err(err) = tx.execute_with_progress(reporter.as_mut()) {
        reporter.set_error(Some(&err));
        return Err(err.into());
    }

    writeln!(out, "Atomically {} {} file(s).", past_tense(kind), tx.len())?;
    Ok(())
}

/// Best-effort loop: stops at the first failure and leaves earlier files in place.
fn transfer_sequentially(
    kind: OperationKind,
    plan: Vec<(PathBuf, PathBuf)>,
    args: &TransferArgs,
    files: &dyn FilesService,
    out: &mut dyn Write,
) -> Result<()> {
    let mut reporter = reporter_for(args.progress);
    reporter.set_total(plan.len());
    let count = plan.len();

    for (i, (src, dst)) in plan.into_iter().enumerate() {
        reporter.set_message(&format!("{kind} {}", src.display()));

        if args.dry_run {
            writeln!(out, "Would {kind} {} → {}", src.display(), dst.display())?;
            reporter.increment();
            continue;
        }

        let operation = Operation::new(kind, src, dst);
        if let Err(err) = apply(files, &operation, args.overwrite) {
            reporter.set_error(Some(&err));
            return Err(err).with_context(|| format!("failed to {operation}"));
        }
        reporter.set_current(i + 1);
    }
    reporter.finish();

    let verb = match kind {
        OperationKind::Copy => "Copied",
        OperationKind::Move => "Moved",
    };
    writeln!(out, "{verb} {count} file(s).")?;
    Ok(())
}

fn apply(
    files: &dyn FilesService,
    operation: &Operation,
    overwrite: bool,
) -> Result<(), FilesError> {
    if !overwrite {
        files.validate_copy_args(operation.source(), operation.destination())?;
    }
    operation.execute(files, overwrite)
}

fn past_tense(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Copy => "copied",
        OperationKind::Move => "moved",
    }
}

fn reporter_for(show_progress: bool) -> Box<dyn ProgressReporter> {
    if show_progress {
        Box::new(BarReporter::new())
    } else {
        Box::new(NoOpReporter)
    }
}
