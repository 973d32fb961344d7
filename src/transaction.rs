use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{FilesError, RollbackErrors, RollbackFailure, TransactionError};
use crate::fsops::FilesService;
use crate::operation::Operation;
use crate::reporter::{NoOpReporter, ProgressReporter};

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Planning,
    Validated,
    Executing,
    Committed,
    RolledBack,
}

/// Ordered batch of operations applied all-or-nothing.
///
/// Operations run in insertion order. When one fails, every operation that
/// already completed is undone in reverse order before the error is returned.
/// A rolled back transaction is not meant to be resumed; build a new one.
pub struct Transaction<'a> {
    fs: &'a dyn FilesService,
    operations: Vec<Operation>,
    /// Indices into `operations`, in completion order.
    completed: Vec<usize>,
    overwrite_allowed: bool,
    state: TransactionState,
}

impl<'a> Transaction<'a> {
    pub fn new(fs: &'a dyn FilesService, overwrite_allowed: bool) -> Self {
        Self {
            fs,
            operations: Vec::new(),
            completed: Vec::new(),
            overwrite_allowed,
            state: TransactionState::Planning,
        }
    }

    /// Plan a copy. Nothing is checked until [`validate`](Self::validate).
    pub fn add_copy(
        &mut self,
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
    ) -> Result<(), TransactionError> {
        self.push(Operation::copy(src, dst));
        Ok(())
    }

    /// Plan a move. Nothing is checked until [`validate`](Self::validate).
    pub fn add_move(
        &mut self,
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
    ) -> Result<(), TransactionError> {
        self.push(Operation::move_to(src, dst));
        Ok(())
    }

    fn push(&mut self, operation: Operation) {
        debug!(operation = %operation, "planned");
        self.operations.push(operation);
        self.state = TransactionState::Planning;
    }

    /// Check every planned operation against the filesystem, stopping at the
    /// first one that cannot run. Never writes to disk.
    pub fn validate(&mut self) -> Result<(), TransactionError> {
        let mut claimed: HashSet<&Path> = HashSet::new();
        for operation in &self.operations {
            let checked = self
                .check(operation)
                .and_then(|()| claim(&mut claimed, operation.destination()));
            if let Err(source) = checked {
                debug!(operation = %operation, error = %source, "validation failed");
                return Err(TransactionError::Planning {
                    operation: operation.clone(),
                    source,
                });
            }
        }
        self.state = TransactionState::Validated;
        Ok(())
    }

    fn check(&self, operation: &Operation) -> Result<(), FilesError> {
        let (src, dst) = (operation.source(), operation.destination());
        if !self.overwrite_allowed {
            return self.fs.validate_copy_args(src, dst);
        }
        if src.as_os_str().is_empty() || dst.as_os_str().is_empty() {
            return Err(FilesError::EmptyPath);
        }
        if !self.fs.is_file(src) {
            return Err(FilesError::NotAFile(src.to_path_buf()));
        }
        Ok(())
    }

    /// Run every operation without progress output.
    pub fn execute(&mut self) -> Result<(), TransactionError> {
        self.execute_with_progress(&mut NoOpReporter)
    }

    /// Run every operation in order, reporting one unit per operation.
    ///
    /// On failure the reporter is left as it was after the last successful
    /// operation; signalling the error to it is up to the caller.
    pub fn execute_with_progress(
        &mut self,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<(), TransactionError> {
        self.completed.clear();
        self.state = TransactionState::Executing;

        reporter.set_total(self.operations.len());
        reporter.set_current(0);

        for index in 0..self.operations.len() {
            let operation = &self.operations[index];
            reporter.set_message(&format!(
                "{} {}",
                operation.kind(),
                operation.source().display()
            ));

            debug!(operation = %operation, "executing");
            if let Err(source) = operation.execute(self.fs, self.overwrite_allowed) {
                let operation = operation.clone();
                return Err(self.abort(operation, source));
            }

            self.completed.push(index);
            reporter.set_current(index + 1);
        }

        self.state = TransactionState::Committed;
        info!(operations = self.operations.len(), "transaction committed");
        reporter.finish();
        Ok(())
    }

    fn abort(&mut self, operation: Operation, source: FilesError) -> TransactionError {
        warn!(operation = %operation, error = %source, "operation failed, rolling back");
        match self.unwind() {
            Ok(()) => TransactionError::Execution { operation, source },
            Err(residue) => TransactionError::ExecutionWithResidue {
                operation,
                source,
                residue,
            },
        }
    }

    /// Undo every completed operation, newest first.
    ///
    /// Keeps going after a failed step so every completed operation gets an
    /// undo attempt, and clears the completed list either way.
    pub fn rollback(&mut self) -> Result<(), TransactionError> {
        self.unwind().map_err(TransactionError::Rollback)
    }

    fn unwind(&mut self) -> Result<(), RollbackErrors> {
        let completed = std::mem::take(&mut self.completed);
        let mut failures = Vec::new();

        for &index in completed.iter().rev() {
            let operation = &self.operations[index];
            debug!(operation = %operation, "rolling back");
            if let Err(source) = operation.rollback(self.fs) {
                warn!(operation = %operation, error = %source, "rollback step failed");
                failures.push(RollbackFailure {
                    operation: operation.clone(),
                    source,
                });
            }
        }

        self.state = TransactionState::RolledBack;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RollbackErrors(failures))
        }
    }

    /// Planned operations, in execution order.
    pub fn operations(&self) -> Vec<Operation> {
        self.operations.clone()
    }

    /// Operations that completed in the current run, in completion order.
    pub fn completed(&self) -> Vec<Operation> {
        self.completed
            .iter()
            .map(|&index| self.operations[index].clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn overwrite_allowed(&self) -> bool {
        self.overwrite_allowed
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }
}

fn claim<'p>(claimed: &mut HashSet<&'p Path>, destination: &'p Path) -> Result<(), FilesError> {
    if claimed.insert(destination) {
        Ok(())
    } else {
        Err(FilesError::DuplicateDestination(destination.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Phase;
    use crate::fsops::LocalFiles;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::error::Error;
    use std::fs;
    use std::io;
    use tempfile::tempdir;

    /// In-memory files service that logs every mutating call.
    #[derive(Default)]
    struct RecordingFiles {
        files: RefCell<HashSet<PathBuf>>,
        log: RefCell<Vec<String>>,
        copies: RefCell<usize>,
        fail_on_copy: Option<usize>,
        fail_removal_of: Option<PathBuf>,
    }

    impl RecordingFiles {
        fn with_files(paths: &[&str]) -> Self {
            let files = Self::default();
            for path in paths {
                files.files.borrow_mut().insert(PathBuf::from(path));
            }
            files
        }

        fn log(&self) -> Vec<String> {
            self.log.borrow().clone()
        }

        fn record(&self, entry: String) {
            self.log.borrow_mut().push(entry);
        }
    }

    fn denied(action: &'static str, path: &Path) -> FilesError {
        FilesError::io(action, path, io::Error::from(io::ErrorKind::PermissionDenied))
    }

    impl FilesService for RecordingFiles {
        fn copy(&self, src: &Path, dst: &Path) -> Result<u64, FilesError> {
            *self.copies.borrow_mut() += 1;
            if self.fail_on_copy == Some(*self.copies.borrow()) {
                self.record(format!("copy-failed {}", src.display()));
                return Err(FilesError::io("copy", src, io::Error::other("mock copy error")));
            }
            self.validate_copy_args(src, dst)?;
            self.files.borrow_mut().insert(dst.to_path_buf());
            self.record(format!("copy {} {}", src.display(), dst.display()));
            Ok(0)
        }

        fn ensure_dir(&self, _path: &Path, _mode: u32) -> Result<(), FilesError> {
            Ok(())
        }

        fn validate_copy_args(&self, src: &Path, dst: &Path) -> Result<(), FilesError> {
            if src.as_os_str().is_empty() || dst.as_os_str().is_empty() {
                return Err(FilesError::EmptyPath);
            }
            if !self.is_file(src) {
                return Err(FilesError::NotAFile(src.to_path_buf()));
            }
            if self.is_file(dst) {
                return Err(FilesError::DestinationExists(dst.to_path_buf()));
            }
            Ok(())
        }

        fn rename(&self, from: &Path, to: &Path) -> Result<(), FilesError> {
            let mut files = self.files.borrow_mut();
            if !files.remove(from) {
                return Err(FilesError::Rename {
                    from: from.to_path_buf(),
                    to: to.to_path_buf(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                });
            }
            files.insert(to.to_path_buf());
            drop(files);
            self.record(format!("rename {} {}", from.display(), to.display()));
            Ok(())
        }

        fn remove_file(&self, path: &Path) -> Result<(), FilesError> {
            if self.fail_removal_of.as_deref() == Some(path) {
                self.record(format!("remove-failed {}", path.display()));
                return Err(denied("remove", path));
            }
            if !self.files.borrow_mut().remove(path) {
                return Err(FilesError::io(
                    "remove",
                    path,
                    io::Error::from(io::ErrorKind::NotFound),
                ));
            }
            self.record(format!("remove {}", path.display()));
            Ok(())
        }

        fn is_file(&self, path: &Path) -> bool {
            self.files.borrow().contains(path)
        }

        fn is_directory(&self, _path: &Path) -> bool {
            false
        }
    }

    #[derive(Debug, Default)]
    struct RecordingReporter {
        total: usize,
        current: usize,
        currents: Vec<usize>,
        messages: Vec<String>,
        events: Vec<&'static str>,
    }

    impl ProgressReporter for RecordingReporter {
        fn set_total(&mut self, total: usize) {
            self.total = total;
            self.events.push("total");
        }

        fn set_current(&mut self, current: usize) {
            self.current = current;
            self.currents.push(current);
            self.events.push("current");
        }

        fn increment_by(&mut self, amount: usize) {
            self.current += amount;
        }

        fn set_message(&mut self, message: &str) {
            self.messages.push(message.to_owned());
        }

        fn finish(&mut self) {
            self.events.push("finish");
        }

        fn set_error(&mut self, _err: Option<&dyn Error>) {
            self.events.push("error");
        }

        fn is_complete(&self) -> bool {
            self.total > 0 && self.current >= self.total
        }

        fn current(&self) -> usize {
            self.current
        }

        fn total(&self) -> usize {
            self.total
        }
    }

    #[test]
    fn add_only_plans() {
        let files = RecordingFiles::default();
        let mut tx = Transaction::new(&files, false);
        tx.add_copy("/src/a", "/dst/a").unwrap();
        tx.add_move("/src/b", "/dst/b").unwrap();

        assert_eq!(
            tx.operations(),
            vec![
                Operation::copy("/src/a", "/dst/a"),
                Operation::move_to("/src/b", "/dst/b"),
            ]
        );
        assert_eq!(tx.len(), 2);
        assert!(tx.completed().is_empty());
        assert!(files.log().is_empty());
        assert_eq!(tx.state(), TransactionState::Planning);
    }

    #[test]
    fn returned_sequences_are_copies() {
        let files = RecordingFiles::with_files(&["/src/a"]);
        let mut tx = Transaction::new(&files, false);
        tx.add_copy("/src/a", "/dst/a").unwrap();

        let mut ops = tx.operations();
        ops.clear();
        assert_eq!(tx.operations().len(), 1);

        tx.execute().unwrap();
        let mut done = tx.completed();
        done.push(Operation::copy("/x", "/y"));
        assert_eq!(tx.completed().len(), 1);
    }

    #[test]
    fn validate_stops_at_first_failure() {
        let files = RecordingFiles::with_files(&["/src/a", "/dst/b"]);
        let mut tx = Transaction::new(&files, false);
        tx.add_copy("/src/a", "/dst/a").unwrap();
        tx.add_copy("/src/missing", "/dst/x").unwrap();
        tx.add_copy("/src/a", "/dst/b").unwrap();

        let err = tx.validate().unwrap_err();

        assert_eq!(err.phase(), Phase::Planning);
        assert_eq!(err.operation(), Some(&Operation::copy("/src/missing", "/dst/x")));
        assert!(matches!(
            err,
            TransactionError::Planning {
                source: FilesError::NotAFile(_),
                ..
            }
        ));
    }

    #[test]
    fn validate_is_repeatable_and_read_only() {
        let files = RecordingFiles::with_files(&["/src/a", "/dst/a"]);
        let mut tx = Transaction::new(&files, false);
        tx.add_copy("/src/a", "/dst/a").unwrap();

        let first = tx.validate().unwrap_err().to_string();
        let second = tx.validate().unwrap_err().to_string();

        assert_eq!(first, second);
        assert!(files.log().is_empty());
        assert!(tx.completed().is_empty());
    }

    #[test]
    fn overwrite_relaxes_destination_check_only() {
        let files = RecordingFiles::with_files(&["/src/a", "/dst/a"]);

        let mut strict = Transaction::new(&files, false);
        strict.add_copy("/src/a", "/dst/a").unwrap();
        let err = strict.validate().unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let mut relaxed = Transaction::new(&files, true);
        relaxed.add_copy("/src/a", "/dst/a").unwrap();
        relaxed.validate().unwrap();
        assert_eq!(relaxed.state(), TransactionState::Validated);

        let mut missing = Transaction::new(&files, true);
        missing.add_copy("/src/nope", "/dst/a").unwrap();
        assert!(matches!(
            missing.validate(),
            Err(TransactionError::Planning {
                source: FilesError::NotAFile(_),
                ..
            })
        ));

        let mut empty = Transaction::new(&files, true);
        empty.add_copy("", "/dst/a").unwrap();
        assert!(matches!(
            empty.validate(),
            Err(TransactionError::Planning {
                source: FilesError::EmptyPath,
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_duplicate_destinations() {
        let files = RecordingFiles::with_files(&["/src/a", "/src/b"]);
        for overwrite in [false, true] {
            let mut tx = Transaction::new(&files, overwrite);
            tx.add_copy("/src/a", "/dst/15_30.jpg").unwrap();
            tx.add_copy("/src/b", "/dst/15_30.jpg").unwrap();

            let err = tx.validate().unwrap_err();
            assert_eq!(err.operation().map(Operation::source), Some(Path::new("/src/b")));
            assert!(matches!(
                err,
                TransactionError::Planning {
                    source: FilesError::DuplicateDestination(_),
                    ..
                }
            ));
        }
    }

    #[test]
    fn empty_transaction_succeeds_and_finishes_once() {
        let files = RecordingFiles::default();
        let mut tx = Transaction::new(&files, false);
        let mut reporter = RecordingReporter::default();

        tx.execute_with_progress(&mut reporter).unwrap();

        assert_eq!(reporter.total, 0);
        assert_eq!(reporter.currents, vec![0]);
        assert_eq!(reporter.events, vec!["total", "current", "finish"]);
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[test]
    fn progress_is_monotonic_and_finish_comes_last() {
        let files = RecordingFiles::with_files(&["/src/a", "/src/b", "/src/c"]);
        let mut tx = Transaction::new(&files, false);
        tx.add_copy("/src/a", "/dst/a").unwrap();
        tx.add_move("/src/b", "/dst/b").unwrap();
        tx.add_copy("/src/c", "/dst/c").unwrap();
        let mut reporter = RecordingReporter::default();

        tx.execute_with_progress(&mut reporter).unwrap();

        assert_eq!(reporter.total, 3);
        assert_eq!(reporter.currents, vec![0, 1, 2, 3]);
        assert_eq!(reporter.events.last(), Some(&"finish"));
        assert_eq!(reporter.events.iter().filter(|e| **e == "finish").count(), 1);
        assert_eq!(
            reporter.messages,
            vec!["copy /src/a", "move /src/b", "copy /src/c"]
        );
        assert_eq!(tx.completed(), tx.operations());
    }

    #[test]
    fn rollback_runs_in_reverse_order() {
        let files = RecordingFiles {
            fail_on_copy: Some(2),
            ..RecordingFiles::with_files(&["/src/a", "/src/b", "/src/c"])
        };
        let mut tx = Transaction::new(&files, false);
        tx.add_copy("/src/a", "/dst/a").unwrap();
        tx.add_move("/src/b", "/dst/b").unwrap();
        tx.add_copy("/src/c", "/dst/c").unwrap();

        let err = tx.execute().unwrap_err();

        assert_eq!(
            files.log(),
            vec![
                "copy /src/a /dst/a",
                "rename /src/b /dst/b",
                "copy-failed /src/c",
                "rename /dst/b /src/b",
                "remove /dst/a",
            ]
        );
        assert_eq!(err.phase(), Phase::Execution);
        assert_eq!(err.operation(), Some(&Operation::copy("/src/c", "/dst/c")));
        assert!(err.rolled_back_cleanly());
        assert!(tx.completed().is_empty());
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert!(files.is_file(Path::new("/src/b")));
        assert!(!files.is_file(Path::new("/dst/a")));
    }

    #[test]
    fn failure_leaves_reporter_unfinished() {
        let files = RecordingFiles {
            fail_on_copy: Some(2),
            ..RecordingFiles::with_files(&["/src/a", "/src/b"])
        };
        let mut tx = Transaction::new(&files, false);
        tx.add_copy("/src/a", "/dst/a").unwrap();
        tx.add_copy("/src/b", "/dst/b").unwrap();
        let mut reporter = RecordingReporter::default();

        tx.execute_with_progress(&mut reporter).unwrap_err();

        assert_eq!(reporter.currents, vec![0, 1]);
        assert!(!reporter.events.contains(&"finish"));
        assert!(!reporter.events.contains(&"error"));
    }

    #[test]
    fn residue_is_reported_alongside_execution_failure() {
        let files = RecordingFiles {
            fail_on_copy: Some(3),
            fail_removal_of: Some(PathBuf::from("/dst/b")),
            ..RecordingFiles::with_files(&["/src/a", "/src/b", "/src/c"])
        };
        let mut tx = Transaction::new(&files, false);
        tx.add_copy("/src/a", "/dst/a").unwrap();
        tx.add_copy("/src/b", "/dst/b").unwrap();
        tx.add_copy("/src/c", "/dst/c").unwrap();

        let err = tx.execute().unwrap_err();

        // The failed step did not stop the remaining undo.
        assert_eq!(
            files.log(),
            vec![
                "copy /src/a /dst/a",
                "copy /src/b /dst/b",
                "copy-failed /src/c",
                "remove-failed /dst/b",
                "remove /dst/a",
            ]
        );
        assert_eq!(err.phase(), Phase::Execution);
        assert!(!err.rolled_back_cleanly());
        let residue = err.residue().unwrap();
        assert_eq!(residue.len(), 1);
        assert_eq!(
            residue.iter().next().map(|f| f.operation.clone()),
            Some(Operation::copy("/src/b", "/dst/b"))
        );
        let message = err.to_string();
        assert!(message.contains("mock copy error"));
        assert!(message.contains("rollback also failed"));
        assert!(tx.completed().is_empty());
    }

    #[test]
    fn manual_rollback_aggregates_failures() {
        let files = RecordingFiles {
            fail_removal_of: Some(PathBuf::from("/dst/a")),
            ..RecordingFiles::with_files(&["/src/a", "/src/b"])
        };
        let mut tx = Transaction::new(&files, false);
        tx.add_copy("/src/a", "/dst/a").unwrap();
        tx.add_copy("/src/b", "/dst/b").unwrap();
        tx.execute().unwrap();

        let err = tx.rollback().unwrap_err();

        assert_eq!(err.phase(), Phase::Rollback);
        assert!(err.operation().is_none());
        assert!(err.to_string().starts_with("transaction rollback failed"));
        assert!(tx.completed().is_empty());
        assert_eq!(files.log()[2..], ["remove /dst/b", "remove-failed /dst/a"]);

        // Nothing left to undo.
        tx.rollback().unwrap();
    }

    #[test]
    fn rollback_tolerates_missing_destinations() {
        let files = RecordingFiles::with_files(&["/src/a"]);
        let mut tx = Transaction::new(&files, false);
        tx.add_copy("/src/a", "/dst/a").unwrap();
        tx.execute().unwrap();
        files.remove_file(Path::new("/dst/a")).unwrap();

        tx.rollback().unwrap();
    }

    #[test]
    fn copy_conflict_rolls_back_earlier_copies_on_disk() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        for name in ["1.jpg", "2.jpg", "3.jpg"] {
            fs::write(src.join(name), name).unwrap();
        }
        fs::write(dst.join("2.jpg"), "existing").unwrap();

        let files = LocalFiles;
        let mut tx = files.new_transaction(false);
        for name in ["1.jpg", "2.jpg", "3.jpg"] {
            tx.add_copy(src.join(name), dst.join(name)).unwrap();
        }

        let err = tx.execute().unwrap_err();

        assert_eq!(err.phase(), Phase::Execution);
        assert_eq!(err.operation().map(Operation::destination), Some(dst.join("2.jpg").as_path()));
        assert!(!dst.join("1.jpg").exists());
        assert!(!dst.join("3.jpg").exists());
        assert_eq!(fs::read_to_string(dst.join("2.jpg")).unwrap(), "existing");
        assert!(tx.completed().is_empty());
    }

    #[test]
    fn moves_succeed_on_disk() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        fs::write(&a, "A").unwrap();
        fs::write(&b, "B").unwrap();
        let out_a = dir.path().join("out/2025/01/01/10_00.jpg");
        let out_b = dir.path().join("out/2025/01/02/11_00.jpg");

        let files = LocalFiles;
        let mut tx = files.new_transaction(false);
        tx.add_move(&a, &out_a).unwrap();
        tx.add_move(&b, &out_b).unwrap();
        tx.validate().unwrap();
        tx.execute().unwrap();

        assert_eq!(fs::read_to_string(&out_a).unwrap(), "A");
        assert_eq!(fs::read_to_string(&out_b).unwrap(), "B");
        assert!(!a.exists());
        assert!(!b.exists());
        assert_eq!(
            tx.completed(),
            vec![Operation::move_to(&a, &out_a), Operation::move_to(&b, &out_b)]
        );
    }

    #[test]
    fn chained_moves_unwind_to_original_location() {
        let dir = tempdir().unwrap();
        let x = dir.path().join("x.jpg");
        let y = dir.path().join("y.jpg");
        let z = dir.path().join("z.jpg");
        fs::write(&x, "photo").unwrap();

        let files = LocalFiles;
        let mut tx = files.new_transaction(false);
        tx.add_move(&x, &y).unwrap();
        tx.add_move(&y, &z).unwrap();
        tx.add_copy(dir.path().join("missing.jpg"), dir.path().join("w.jpg"))
            .unwrap();

        tx.execute().unwrap_err();

        // Undoing y->z before x->y puts the file back where it started.
        assert_eq!(fs::read_to_string(&x).unwrap(), "photo");
        assert!(!y.exists());
        assert!(!z.exists());
    }
}
