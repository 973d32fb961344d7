//! Terminal progress bar reporter.

use std::error::Error;
use std::io::{self, Write};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::reporter::{ProgressReporter, ProgressState};

pub const DEFAULT_WIDTH: usize = 40;

const BAR_CHARS: &str = "█░";
const SUCCESS_MARK: &str = "✓";
const ERROR_MARK: &str = "✗";

/// Observable state of a [`BarReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub current: usize,
    pub total: usize,
    pub message: String,
    pub finished: bool,
    pub errored: bool,
}

/// [`ProgressReporter`] that renders `[████░░░░] 2/4 (50%) message`.
///
/// When the live bar cannot be drawn (stderr is not a terminal) the final
/// success or error line is still written to the fallback sink.
pub struct BarReporter {
    bar: ProgressBar,
    width: usize,
    fallback: Option<Box<dyn Write>>,
    state: ProgressState,
    finished: bool,
    errored: bool,
}

impl BarReporter {
    /// Bar drawn to stderr; only the final line is printed when stderr is
    /// not a terminal.
    pub fn new() -> Self {
        let reporter = Self::with_draw_target(ProgressDrawTarget::stderr(), DEFAULT_WIDTH);
        if reporter.bar.is_hidden() {
            reporter.with_fallback(io::stderr())
        } else {
            reporter
        }
    }

    /// Never draws a live bar; writes the final line to `out`.
    pub fn to_writer(out: impl Write + 'static) -> Self {
        Self::hidden().with_fallback(out)
    }

    /// Bar that tracks state without drawing anything.
    pub fn hidden() -> Self {
        Self::with_draw_target(ProgressDrawTarget::hidden(), DEFAULT_WIDTH)
    }

    pub fn with_draw_target(target: ProgressDrawTarget, width: usize) -> Self {
        let width = if width == 0 { DEFAULT_WIDTH } else { width };
        let template = format!("[{{bar:{width}}}] {{pos}}/{{len}} ({{percent}}%) {{msg}}");
        let style = ProgressStyle::with_template(&template)
            .map(|style| style.progress_chars(BAR_CHARS))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let bar = ProgressBar::with_draw_target(Some(0), target);
        bar.set_style(style);
        Self {
            bar,
            width,
            fallback: None,
            state: ProgressState::new(),
            finished: false,
            errored: false,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            current: self.state.current(),
            total: self.state.total(),
            message: self.state.message().to_owned(),
            finished: self.finished,
            errored: self.errored,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    fn is_terminal(&self) -> bool {
        self.finished || self.errored
    }

    fn with_fallback(mut self, out: impl Write + 'static) -> Self {
        self.fallback = Some(Box::new(out));
        self
    }

    /// Write the final line to the fallback sink, if there is one.
    fn print_final(&mut self, filled: usize, counts: &str, message: &str) {
        let Some(out) = self.fallback.as_mut() else {
            return;
        };
        let (full, empty) = bar_chars();
        let line = format!(
            "[{}{}] {counts} {message}",
            full.to_string().repeat(filled),
            empty.to_string().repeat(self.width - filled)
        );
        // Display only; write errors are ignored.
        let _ = writeln!(out, "{line}").and_then(|()| out.flush());
    }

    fn redraw(&self) {
        self.bar.set_length(self.state.total() as u64);
        self.bar.set_position(self.state.current() as u64);
    }
}

impl Default for BarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for BarReporter {
    fn set_total(&mut self, total: usize) {
        if self.is_terminal() {
            return;
        }
        self.state.set_total(total);
        self.redraw();
    }

    fn set_current(&mut self, current: usize) {
        if self.is_terminal() {
            return;
        }
        self.state.set_current(current);
        self.redraw();
    }

    fn increment_by(&mut self, amount: usize) {
        if self.is_terminal() {
            return;
        }
        self.state.increment_by(amount);
        self.redraw();
    }

    fn set_message(&mut self, message: &str) {
        if self.is_terminal() {
            return;
        }
        self.state.set_message(message);
        self.bar.set_message(message.to_owned());
    }

    fn finish(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.finished = true;
        self.bar.set_length(self.state.total() as u64);
        let message = match self.state.message() {
            "" => SUCCESS_MARK.to_owned(),
            msg => format!("{msg} {SUCCESS_MARK}"),
        };
        let total = self.state.total();
        let width = self.width;
        self.print_final(width, &format!("{total}/{total} (100%)"), &message);
        // Saturates the bar.
        self.bar.finish_with_message(message);
    }

    fn set_error(&mut self, err: Option<&dyn Error>) {
        if self.is_terminal() {
            return;
        }
        self.errored = true;
        let mut message = match self.state.message() {
            "" => ERROR_MARK.to_owned(),
            msg => format!("{msg} {ERROR_MARK}"),
        };
        if let Some(err) = err {
            message.push_str(&format!(" - Error: {err}"));
        }
        self.redraw();
        let filled = filled_cells(&self.state, self.width);
        let counts = format!(
            "{}/{} ({}%)",
            self.state.current(),
            self.state.total(),
            self.state.percentage()
        );
        self.print_final(filled, &counts, &message);
        self.bar.abandon_with_message(message);
    }

    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    fn current(&self) -> usize {
        self.state.current()
    }

    fn total(&self) -> usize {
        self.state.total()
    }
}

fn bar_chars() -> (char, char) {
    let mut chars = BAR_CHARS.chars();
    match (chars.next(), chars.next()) {
        (Some(full), Some(empty)) => (full, empty),
        _ => ('#', '-'),
    }
}

fn filled_cells(state: &ProgressState, width: usize) -> usize {
    if state.total() == 0 {
        return 0;
    }
    (state.current() * width / state.total()).min(width)
}
