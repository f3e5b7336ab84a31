//! Launching provisioning tools and streaming their merged output.
//!
//! A [`CommandRunner`] starts a program and hands back a [`ProcessHandle`].
//! The handle yields output lines as they arrive (stdout and stderr share one
//! pipe, so their relative order is kept) and reports the exit status only
//! after the stream has been drained.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, PipeReader};
use std::process::{Child, Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Replacement text shown in place of a credential.
pub const REDACTED: &str = "******";

/// Errors raised while starting or reaping a process.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LaunchError {
    /// Raised when the working directory does not exist.
    #[error("working directory {path} does not exist")]
    MissingWorkingDirectory {
        /// Requested working directory.
        path: Utf8PathBuf,
    },
    /// Raised when the executable cannot be found.
    #[error("{program} was not found; is it installed and on PATH?")]
    NotFound {
        /// Program that was requested.
        program: String,
    },
    /// Raised when the process cannot be started for another reason.
    #[error("failed to start {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the exit status cannot be collected.
    #[error("failed to wait for {program}: {message}")]
    Wait {
        /// Program being reaped.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// A program, its arguments, and the directory it runs in.
///
/// Values registered with [`Invocation::secret`] are passed to the process
/// unchanged but replaced with [`REDACTED`] in [`Invocation::display`].
#[derive(Clone, Eq, PartialEq)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
    cwd: Utf8PathBuf,
    secrets: Vec<String>,
}

impl Invocation {
    /// Starts an invocation of `program` in `cwd`.
    #[must_use]
    pub fn new(program: impl Into<String>, cwd: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            secrets: Vec::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Marks `value` as a credential to hide from displays. Empty values are
    /// ignored.
    #[must_use]
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        let secret = value.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// Program name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in order, credentials included.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Working directory.
    #[must_use]
    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// Shell-quoted command line with credentials redacted, suitable for
    /// logs and screen headers.
    #[must_use]
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(escape(self.program.as_str().into()).into_owned());
        for arg in &self.args {
            let redacted = self.redact(&arg.to_string_lossy());
            parts.push(escape(redacted.into()).into_owned());
        }
        parts.join(" ")
    }

    fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_owned(), |acc, secret| redact_values(&acc, secret))
    }
}

/// Replaces `secret` only where it forms a whole value: preceded by the
/// start of the text, whitespace, or `=`, and followed by the end of the
/// text or whitespace.
fn redact_values(text: &str, secret: &str) -> String {
    let mut redacted = String::with_capacity(text.len());
    let mut copied = 0;
    for (start, _) in text.match_indices(secret) {
        let end = start + secret.len();
        let opens = text
            .get(..start)
            .and_then(|before| before.chars().next_back())
            .is_none_or(|ch| ch == '=' || ch.is_whitespace());
        let closes = text
            .get(end..)
            .and_then(|after| after.chars().next())
            .is_none_or(char::is_whitespace);
        if opens && closes {
            redacted.push_str(text.get(copied..start).unwrap_or_default());
            redacted.push_str(REDACTED);
            copied = end;
        }
    }
    redacted.push_str(text.get(copied..).unwrap_or_default());
    redacted
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.display())
            .field("cwd", &self.cwd)
            .finish_non_exhaustive()
    }
}

/// How a finished process ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExitOutcome {
    /// Exit code, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Source of lines and exit status behind a [`ProcessHandle`].
pub trait ProcessOutput {
    /// Returns the next line without its terminator, or `None` at end of
    /// stream.
    fn next_line(&mut self) -> Option<String>;

    /// Reaps the process. Called once, after the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Wait`] when the status cannot be collected.
    fn wait(&mut self) -> Result<ExitOutcome, LaunchError>;
}

/// A running process: a finite, non-restartable stream of output lines and
/// a deferred exit status.
pub struct ProcessHandle {
    display: String,
    output: Box<dyn ProcessOutput>,
}

impl ProcessHandle {
    /// Wraps an output source.
    #[must_use]
    pub fn new(display: impl Into<String>, output: Box<dyn ProcessOutput>) -> Self {
        Self {
            display: display.into(),
            output,
        }
    }

    /// Redacted command line this handle was launched from.
    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Drains any unread output, then reaps the process.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Wait`] when the status cannot be collected.
    pub fn wait(mut self) -> Result<ExitOutcome, LaunchError> {
        while self.output.next_line().is_some() {}
        let outcome = self.output.wait()?;
        info!(command = %self.display, code = ?outcome.code, "process finished");
        Ok(outcome)
    }
}

impl Iterator for ProcessHandle {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.output.next_line()
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("display", &self.display)
            .finish_non_exhaustive()
    }
}

/// Abstraction over process launching to support fakes in tests.
pub trait CommandRunner {
    /// Starts `invocation` and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the working directory is missing or the
    /// program cannot be started.
    fn launch(&self, invocation: &Invocation) -> Result<ProcessHandle, LaunchError>;
}

/// Real runner that spawns host processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn launch(&self, invocation: &Invocation) -> Result<ProcessHandle, LaunchError> {
        let cwd = invocation.cwd();
        if !cwd.is_dir() {
            return Err(LaunchError::MissingWorkingDirectory {
                path: cwd.to_path_buf(),
            });
        }

        let program = invocation.program();
        let spawn_error = |err: &io::Error| {
            if err.kind() == io::ErrorKind::NotFound {
                LaunchError::NotFound {
                    program: program.to_owned(),
                }
            } else {
                LaunchError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                }
            }
        };

        let (reader, writer) = io::pipe().map_err(|err| spawn_error(&err))?;
        let stderr_writer = writer.try_clone().map_err(|err| spawn_error(&err))?;
        // The command owns both write ends; it must be dropped after spawning
        // so the reader sees end of stream when the child exits.
        let child = {
            let mut command = Command::new(program);
            command
                .args(invocation.arguments())
                .current_dir(cwd)
                .stdin(Stdio::null())
                .stdout(writer)
                .stderr(stderr_writer);
            command.spawn().map_err(|err| spawn_error(&err))?
        };

        info!(command = %invocation.display(), cwd = %cwd, pid = child.id(), "process started");
        Ok(ProcessHandle::new(
            invocation.display(),
            Box::new(ChildOutput {
                program: program.to_owned(),
                child,
                reader: Some(BufReader::new(reader)),
            }),
        ))
    }
}

struct ChildOutput {
    program: String,
    child: Child,
    reader: Option<BufReader<PipeReader>>,
}

impl ProcessOutput for ChildOutput {
    fn next_line(&mut self) -> Option<String> {
        let reader = self.reader.as_mut()?;
        let mut buffer = Vec::new();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => {
                self.reader = None;
                None
            }
            Ok(_) => Some(decode_line(&buffer)),
            Err(err) => {
                warn!(program = %self.program, error = %err, "output stream failed");
                self.reader = None;
                None
            }
        }
    }

    fn wait(&mut self) -> Result<ExitOutcome, LaunchError> {
        self.reader = None;
        let status = self.child.wait().map_err(|err| LaunchError::Wait {
            program: self.program.clone(),
            message: err.to_string(),
        })?;
        debug!(program = %self.program, %status, "child reaped");
        Ok(ExitOutcome {
            code: status.code(),
        })
    }
}

/// Decodes one raw line as lossy UTF-8 without its `\n` or `\r\n`.
#[must_use]
pub fn decode_line(raw: &[u8]) -> String {
    let without_lf = raw.strip_suffix(b"\n").unwrap_or(raw);
    let without_cr = without_lf.strip_suffix(b"\r").unwrap_or(without_lf);
    String::from_utf8_lossy(without_cr).into_owned()
}
