//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::console::{Console, ConsoleError, Key, Screen};
use crate::process::{
    CommandRunner, ExitOutcome, Invocation, LaunchError, ProcessHandle, ProcessOutput,
};

/// Viewport height reported by [`ScriptedConsole`] unless overridden.
pub const SCRIPTED_HEIGHT: usize = 40;

/// Console that replays queued keys and records every rendered frame.
///
/// Clones share state, so a test can keep one clone for assertions after
/// handing another to the code under test. Once the queue is empty,
/// [`Console::read_key`] returns [`ConsoleError::Closed`].
#[derive(Clone, Debug)]
pub struct ScriptedConsole {
    keys: Rc<RefCell<VecDeque<Key>>>,
    frames: Rc<RefCell<Vec<Screen>>>,
    height: usize,
}

impl Default for ScriptedConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConsole {
    /// Creates a console with no queued keys.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Rc::default(),
            frames: Rc::default(),
            height: SCRIPTED_HEIGHT,
        }
    }

    /// Overrides the reported viewport height.
    #[must_use]
    pub const fn with_height(mut self, height: usize) -> Self {
        self.height = height;
        self
    }

    /// Queues keys in order.
    pub fn push_keys(&self, keys: impl IntoIterator<Item = Key>) {
        self.keys.borrow_mut().extend(keys);
    }

    /// Queues each character of `text` followed by Enter.
    pub fn type_line(&self, text: &str) {
        self.push_keys(text.chars().map(Key::Char));
        self.push_keys([Key::Enter]);
    }

    /// Number of keys not yet read.
    #[must_use]
    pub fn pending_keys(&self) -> usize {
        self.keys.borrow().len()
    }

    /// Every frame rendered so far.
    #[must_use]
    pub fn frames(&self) -> Vec<Screen> {
        self.frames.borrow().clone()
    }

    /// The most recent frame, or an empty one.
    #[must_use]
    pub fn last_frame(&self) -> Screen {
        self.frames.borrow().last().cloned().unwrap_or_default()
    }

    /// Returns `true` when any rendered frame contains `needle`.
    #[must_use]
    pub fn saw(&self, needle: &str) -> bool {
        self.frames.borrow().iter().any(|frame| frame.contains(needle))
    }
}

impl Console for ScriptedConsole {
    fn render(&mut self, screen: &Screen) -> Result<(), ConsoleError> {
        self.frames.borrow_mut().push(screen.clone());
        Ok(())
    }

    fn read_key(&mut self) -> Result<Key, ConsoleError> {
        self.keys.borrow_mut().pop_front().ok_or(ConsoleError::Closed)
    }

    fn viewport_height(&self) -> usize {
        self.height
    }
}

#[derive(Debug)]
enum ScriptedResponse {
    Run { lines: Vec<String>, code: Option<i32> },
    LaunchFailure(LaunchError),
}

/// Scripted command runner that returns pre-seeded runs in FIFO order.
///
/// Used to drive deterministic process outcomes without spawning anything.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<ScriptedResponse>>>,
    invocations: Rc<RefCell<Vec<Invocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Returns each recorded invocation as `program arg arg ...`, without
    /// quoting or redaction.
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(|invocation| {
                let mut parts = vec![invocation.program().to_owned()];
                parts.extend(
                    invocation
                        .arguments()
                        .iter()
                        .map(|arg| arg.to_string_lossy().into_owned()),
                );
                parts.join(" ")
            })
            .collect()
    }

    /// Queues a run that prints nothing and exits zero.
    pub fn push_success(&self) {
        self.push_output(Some(0), Vec::<String>::new());
    }

    /// Queues a run with a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), Vec::<String>::new());
    }

    /// Queues a run that prints `lines` and ends with `code` (`None` for a
    /// signal).
    pub fn push_output<I, S>(&self, code: Option<i32>, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responses.borrow_mut().push_back(ScriptedResponse::Run {
            lines: lines.into_iter().map(Into::into).collect(),
            code,
        });
    }

    /// Queues a launch failure.
    pub fn push_launch_error(&self, err: LaunchError) {
        self.responses
            .borrow_mut()
            .push_back(ScriptedResponse::LaunchFailure(err));
    }
}

impl CommandRunner for ScriptedRunner {
    fn launch(&self, invocation: &Invocation) -> Result<ProcessHandle, LaunchError> {
        self.invocations.borrow_mut().push(invocation.clone());
        let response =
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| LaunchError::Spawn {
                    program: invocation.program().to_owned(),
                    message: String::from("no scripted response available"),
                })?;
        match response {
            ScriptedResponse::Run { lines, code } => Ok(scripted_handle(
                invocation.display(),
                lines,
                code,
            )),
            ScriptedResponse::LaunchFailure(err) => Err(err),
        }
    }
}

/// Builds a handle that yields `lines` and then exits with `code`.
#[must_use]
pub fn scripted_handle(display: String, lines: Vec<String>, code: Option<i32>) -> ProcessHandle {
    ProcessHandle::new(
        display,
        Box::new(ScriptedOutput {
            lines: lines.into(),
            code,
        }),
    )
}

struct ScriptedOutput {
    lines: VecDeque<String>,
    code: Option<i32>,
}

impl ProcessOutput for ScriptedOutput {
    fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    fn wait(&mut self) -> Result<ExitOutcome, LaunchError> {
        Ok(ExitOutcome { code: self.code })
    }
}
