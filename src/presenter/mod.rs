//! Streams a running process to the console.
//!
//! The presenter keeps the most recent lines that fit the viewport, colours
//! each by keyword, waits for the process, and shows a success or failure
//! banner that the operator acknowledges with one key press.

use std::collections::VecDeque;

use tracing::{info, warn};

use crate::console::{Console, ConsoleError, Screen, Style};
use crate::process::{LaunchError, ProcessHandle};

/// Rows used by the header (title, command, spacer).
const HEADER_ROWS: usize = 3;
/// Rows reserved below the scroll-back (spacer, banner, hint).
const FOOTER_ROWS: usize = 3;

/// Display severity of an output line. Presentation only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// Contains `ERROR` or `Failed`.
    Error,
    /// Contains `WARNING` or `WARN`.
    Warning,
    /// Contains `SUCCESS` or `Completed`.
    Success,
    /// Anything else.
    Info,
}

impl Severity {
    /// Classifies a line by keyword, most severe first.
    #[must_use]
    pub fn classify(line: &str) -> Self {
        if line.contains("ERROR") || line.contains("Failed") {
            Self::Error
        } else if line.contains("WARN") {
            Self::Warning
        } else if line.contains("SUCCESS") || line.contains("Completed") {
            Self::Success
        } else {
            Self::Info
        }
    }

    const fn style(self) -> Style {
        match self {
            Self::Error => Style::Error,
            Self::Warning => Style::Warning,
            Self::Success => Style::Success,
            Self::Info => Style::Info,
        }
    }
}

/// A classified output line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputLine {
    /// Display severity.
    pub severity: Severity,
    /// Line text.
    pub text: String,
}

/// Most recent lines, up to a fixed capacity.
#[derive(Clone, Debug)]
pub struct Scrollback {
    capacity: usize,
    lines: VecDeque<OutputLine>,
}

impl Scrollback {
    /// Creates an empty scroll-back holding at most `capacity` lines
    /// (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let bounded = capacity.max(1);
        Self {
            capacity: bounded,
            lines: VecDeque::with_capacity(bounded),
        }
    }

    /// Classifies and appends a line, evicting the oldest when full.
    pub fn push(&mut self, text: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(OutputLine {
            severity: Severity::classify(&text),
            text,
        });
    }

    /// Retained lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &OutputLine> {
        self.lines.iter()
    }

    /// Number of retained lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` when nothing has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Terminal state of a provisioning run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunStatus {
    /// Exit code zero.
    Succeeded,
    /// Non-zero exit, termination by signal (`code` is `None`), or a failed
    /// wait.
    Failed {
        /// Exit code, when one was reported.
        code: Option<i32>,
    },
    /// The process never started.
    NotStarted,
}

impl RunStatus {
    /// Returns `true` for [`RunStatus::Succeeded`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Presents a launch result: drains a started process, or shows why it
/// could not start.
///
/// # Errors
///
/// Returns [`ConsoleError`] when the terminal fails.
pub fn present<C: Console>(
    console: &mut C,
    title: &str,
    launched: Result<ProcessHandle, LaunchError>,
) -> Result<RunStatus, ConsoleError> {
    match launched {
        Ok(handle) => drain(console, title, handle),
        Err(err) => {
            warn!(title, error = %err, "process could not start");
            let mut screen = Screen::new();
            screen.push(Style::Title, title);
            screen.blank();
            screen.push(Style::Error, format!("Could not start: {err}"));
            screen.blank();
            screen.push(Style::Muted, "Press any key to return");
            console.render(&screen)?;
            console.read_key()?;
            Ok(RunStatus::NotStarted)
        }
    }
}

/// Streams `handle` into a bounded scroll-back, waits for exit, shows the
/// banner, and waits for one acknowledgement key.
///
/// # Errors
///
/// Returns [`ConsoleError`] when the terminal fails.
pub fn drain<C: Console>(
    console: &mut C,
    title: &str,
    mut handle: ProcessHandle,
) -> Result<RunStatus, ConsoleError> {
    let capacity = console
        .viewport_height()
        .saturating_sub(HEADER_ROWS + FOOTER_ROWS);
    let command = handle.display().to_owned();
    let mut scrollback = Scrollback::new(capacity);

    console.render(&frame(title, &command, &scrollback, None))?;
    for line in handle.by_ref() {
        scrollback.push(line);
        console.render(&frame(title, &command, &scrollback, None))?;
    }

    let status = match handle.wait() {
        Ok(outcome) if outcome.is_success() => RunStatus::Succeeded,
        Ok(outcome) => RunStatus::Failed { code: outcome.code },
        Err(err) => {
            warn!(error = %err, "could not collect exit status");
            RunStatus::Failed { code: None }
        }
    };
    info!(title, ?status, "run finished");

    console.render(&frame(title, &command, &scrollback, Some(status)))?;
    console.read_key()?;
    Ok(status)
}

fn frame(title: &str, command: &str, scrollback: &Scrollback, status: Option<RunStatus>) -> Screen {
    let mut screen = Screen::new();
    screen.push(Style::Title, title);
    screen.push(Style::Muted, format!("$ {command}"));
    screen.blank();
    for line in scrollback.lines() {
        screen.push(line.severity.style(), line.text.clone());
    }
    screen.blank();
    match status {
        None => screen.push(Style::Muted, "Running..."),
        Some(finished) => {
            let (style, banner) = banner(finished);
            screen.push(style, banner);
            screen.push(Style::Muted, "Press any key to return");
        }
    }
    screen
}

fn banner(status: RunStatus) -> (Style, String) {
    match status {
        RunStatus::Succeeded => (Style::Success, String::from("Completed successfully.")),
        RunStatus::Failed { code: Some(code) } => {
            (Style::Error, format!("Failed with exit code {code}."))
        }
        RunStatus::Failed { code: None } => (
            Style::Error,
            String::from("Failed: the process was terminated without an exit code."),
        ),
        RunStatus::NotStarted => (Style::Error, String::from("Could not start.")),
    }
}
