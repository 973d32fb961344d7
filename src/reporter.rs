use std::error::Error;
use std::fmt;

/// Sink for work-unit progress, independent of how it is displayed.
///
/// Implementations treat [`finish`](Self::finish) and
/// [`set_error`](Self::set_error) as terminal: whichever arrives first wins
/// and every later mutating call is ignored.
pub trait ProgressReporter {
    fn set_total(&mut self, total: usize);

    fn set_current(&mut self, current: usize);

    fn increment(&mut self) {
        self.increment_by(1);
    }

    fn increment_by(&mut self, amount: usize);

    fn set_message(&mut self, message: &str);

    /// Mark successful completion.
    fn finish(&mut self);

    /// Mark failed completion, optionally with the error that caused it.
    fn set_error(&mut self, err: Option<&dyn Error>);

    /// True once a positive total has been reached.
    fn is_complete(&self) -> bool;

    fn current(&self) -> usize;

    fn total(&self) -> usize;
}

/// Reporter used whenever progress display is not requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpReporter;

impl NoOpReporter {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for NoOpReporter {
    fn set_total(&mut self, _total: usize) {}
    fn set_current(&mut self, _current: usize) {}
    fn increment_by(&mut self, _amount: usize) {}
    fn set_message(&mut self, _message: &str) {}
    fn finish(&mut self) {}
    fn set_error(&mut self, _err: Option<&dyn Error>) {}

    fn is_complete(&self) -> bool {
        false
    }

    fn current(&self) -> usize {
        0
    }

    fn total(&self) -> usize {
        0
    }
}

/// Counters shared by rendering reporters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgressState {
    current: usize,
    total: usize,
    /// Unclamped position, used for the percentage.
    actual_current: usize,
    message: String,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    /// Set the position, clamped to the total once the total is positive.
    pub fn set_current(&mut self, current: usize) {
        self.actual_current = current;
        self.current = if self.total > 0 {
            current.min(self.total)
        } else {
            current
        };
    }

    pub fn increment(&mut self) {
        self.increment_by(1);
    }

    pub fn increment_by(&mut self, amount: usize) {
        self.set_current(self.actual_current.saturating_add(amount));
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }

    /// Completion percentage; 0 while the total is unknown.
    pub fn percentage(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        (self.actual_current as f64 / self.total as f64 * 100.0) as usize
    }
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total == 0 {
            write!(f, "{} items processed", self.current)
        } else {
            write!(f, "{}/{} ({}%)", self.current, self.total, self.percentage())
        }
    }
}
