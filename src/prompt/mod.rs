//! Single-value prompts: validated text, multi-select checkboxes, and a
//! yes/no toggle.
//!
//! Every prompt returns [`Answer::Cancelled`] when the operator presses Esc,
//! and callers stop the surrounding multi-field operation when they see it.

use std::fmt;

use thiserror::Error;

use crate::console::{Console, ConsoleError, Key, Screen, Style};

const TEXT_HINT: &str = "Enter to accept, Esc to cancel";
const CHECKBOX_HINT: &str = "Left/Right to move, Space to toggle, Enter to accept, Esc to cancel";
const TOGGLE_HINT: &str = "Left/Right or Y/N to choose, Enter to accept, Esc to cancel";

/// Errors raised by prompts.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PromptError {
    /// Raised when a field's default fails its own validator. This is a
    /// programming error in the caller.
    #[error("default for '{label}' is invalid: {message}")]
    InvalidDefault {
        /// Field label.
        label: String,
        /// Validator message.
        message: String,
    },
    /// Raised when the terminal fails.
    #[error(transparent)]
    Console(#[from] ConsoleError),
}

/// Outcome of a prompt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Answer<T> {
    /// The accepted value.
    Value(T),
    /// The operator pressed Esc.
    Cancelled,
}

impl<T> Answer<T> {
    /// Returns the value, or `None` when cancelled.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    /// Maps the accepted value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Answer<U> {
        match self {
            Self::Value(value) => Answer::Value(f(value)),
            Self::Cancelled => Answer::Cancelled,
        }
    }
}

type Validator<'a> = Box<dyn Fn(&str) -> Result<(), String> + 'a>;

/// A single-line text prompt.
pub struct InputField<'a> {
    title: String,
    label: String,
    default: Option<String>,
    validator: Option<Validator<'a>>,
    masked: bool,
}

impl fmt::Debug for InputField<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputField")
            .field("title", &self.title)
            .field("label", &self.label)
            .field("masked", &self.masked)
            .finish_non_exhaustive()
    }
}

impl<'a> InputField<'a> {
    /// Creates a prompt for `label` under the screen heading `title`.
    #[must_use]
    pub fn new(title: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            label: label.into(),
            default: None,
            validator: None,
            masked: false,
        }
    }

    /// Value returned when the operator accepts an empty buffer. Empty
    /// defaults are ignored.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        let text = value.into();
        self.default = (!text.is_empty()).then_some(text);
        self
    }

    /// Check run against the trimmed input before it is accepted.
    #[must_use]
    pub fn validator<F, E>(mut self, check: F) -> Self
    where
        F: Fn(&str) -> Result<(), E> + 'a,
        E: fmt::Display,
    {
        self.validator = Some(Box::new(move |value: &str| {
            check(value).map_err(|err| err.to_string())
        }));
        self
    }

    /// Echo `*` instead of the typed characters. The literal text is
    /// returned, untrimmed.
    #[must_use]
    pub const fn masked(mut self) -> Self {
        self.masked = true;
        self
    }

    fn check(&self, value: &str) -> Result<(), String> {
        self.validator.as_ref().map_or(Ok(()), |check| check(value))
    }

    /// Runs the prompt until the operator accepts a valid value or cancels.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::InvalidDefault`] when the default fails
    /// validation, and [`PromptError::Console`] when the terminal fails.
    pub fn ask<C: Console>(&self, console: &mut C) -> Result<Answer<String>, PromptError> {
        let mut buffer = String::new();
        let mut error: Option<String> = None;
        loop {
            console.render(&self.screen(&buffer, error.as_deref()))?;
            match console.read_key()? {
                Key::Esc => return Ok(Answer::Cancelled),
                Key::Enter => match self.accept(&buffer)? {
                    Ok(value) => return Ok(Answer::Value(value)),
                    Err(message) => error = Some(message),
                },
                Key::Backspace => {
                    buffer.pop();
                    error = None;
                }
                Key::Char(ch) if !ch.is_control() => {
                    buffer.push(ch);
                    error = None;
                }
                _ => {}
            }
        }
    }

    /// Outer error is fatal; inner error is shown inline.
    fn accept(&self, buffer: &str) -> Result<Result<String, String>, PromptError> {
        if buffer.is_empty() {
            let Some(default) = &self.default else {
                return Ok(Err(String::from("A value is required.")));
            };
            return self
                .check(default)
                .map(|()| Ok(default.clone()))
                .map_err(|message| PromptError::InvalidDefault {
                    label: self.label.clone(),
                    message,
                });
        }

        let candidate = if self.masked { buffer } else { buffer.trim() };
        if let Err(message) = self.check(candidate) {
            return Ok(Err(message));
        }
        if candidate.is_empty() {
            return Ok(Err(String::from("A value is required.")));
        }
        Ok(Ok(candidate.to_owned()))
    }

    fn screen(&self, buffer: &str, error: Option<&str>) -> Screen {
        let mut screen = Screen::new();
        screen.push(Style::Title, self.title.as_str());
        screen.blank();
        let shown = if self.masked {
            "*".repeat(buffer.chars().count())
        } else {
            buffer.to_owned()
        };
        let label = match (&self.default, self.masked) {
            (Some(default), false) => format!("{} [{default}]: ", self.label),
            _ => format!("{}: ", self.label),
        };
        screen.push(Style::Plain, format!("{label}{shown}_"));
        if let Some(message) = error {
            screen.push(Style::Error, message);
        }
        screen.blank();
        screen.push(Style::Muted, TEXT_HINT);
        screen
    }
}

/// Asks a `[y/N]` question. Anything but an explicit yes, including Esc,
/// counts as no.
///
/// # Errors
///
/// Returns [`PromptError::Console`] when the terminal fails.
pub fn confirm<C: Console>(console: &mut C, title: &str, question: &str) -> Result<bool, PromptError> {
    let answer = InputField::new(title, format!("{question} [y/N]"))
        .default_value("n")
        .validator(|value: &str| {
            parse_yes_no(value)
                .map(|_| ())
                .ok_or("Please answer y or n.")
        })
        .ask(console)?;
    Ok(answer
        .value()
        .and_then(|value| parse_yes_no(&value))
        .unwrap_or(false))
}

fn parse_yes_no(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Multi-select over a fixed list of options.
#[derive(Clone, Debug)]
pub struct CheckboxField {
    title: String,
    label: String,
    options: Vec<String>,
    checked: Vec<bool>,
}

impl CheckboxField {
    /// Creates a checkbox group. `checked` is padded or truncated to the
    /// option count.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        label: impl Into<String>,
        options: Vec<String>,
        mut checked: Vec<bool>,
    ) -> Self {
        checked.resize(options.len(), false);
        Self {
            title: title.into(),
            label: label.into(),
            options,
            checked,
        }
    }

    /// Runs the prompt. Enter is refused until at least one option is
    /// checked. Returns the checked option indexes in order.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Console`] when the terminal fails.
    pub fn ask<C: Console>(&self, console: &mut C) -> Result<Answer<Vec<usize>>, PromptError> {
        let mut checked = self.checked.clone();
        let mut cursor = 0_usize;
        let last = self.options.len().saturating_sub(1);
        let mut error: Option<&str> = None;
        loop {
            console.render(&self.screen(&checked, cursor, error))?;
            match console.read_key()? {
                Key::Esc => return Ok(Answer::Cancelled),
                Key::Left | Key::Up => cursor = cursor.saturating_sub(1),
                Key::Right | Key::Down => cursor = (cursor + 1).min(last),
                Key::Char(' ') => {
                    if let Some(slot) = checked.get_mut(cursor) {
                        *slot = !*slot;
                    }
                    error = None;
                }
                Key::Enter => {
                    let selected: Vec<usize> = checked
                        .iter()
                        .enumerate()
                        .filter_map(|(index, on)| on.then_some(index))
                        .collect();
                    if selected.is_empty() {
                        error = Some("Select at least one option.");
                    } else {
                        return Ok(Answer::Value(selected));
                    }
                }
                _ => {}
            }
        }
    }

    fn screen(&self, checked: &[bool], cursor: usize, error: Option<&str>) -> Screen {
        let mut screen = Screen::new();
        screen.push(Style::Title, self.title.as_str());
        screen.blank();
        screen.push(Style::Plain, format!("{}:", self.label));
        for (index, option) in self.options.iter().enumerate() {
            let mark = if checked.get(index).copied().unwrap_or(false) {
                "[x]"
            } else {
                "[ ]"
            };
            let (style, pointer) = if index == cursor {
                (Style::Selected, ">")
            } else {
                (Style::Plain, " ")
            };
            screen.push(style, format!("{pointer} {mark} {option}"));
        }
        if let Some(message) = error {
            screen.push(Style::Error, message);
        }
        screen.blank();
        screen.push(Style::Muted, CHECKBOX_HINT);
        screen
    }
}

/// A yes/no choice.
#[derive(Clone, Debug)]
pub struct ToggleField {
    title: String,
    label: String,
    initial: bool,
}

impl ToggleField {
    /// Creates a toggle starting at `initial`.
    #[must_use]
    pub fn new(title: impl Into<String>, label: impl Into<String>, initial: bool) -> Self {
        Self {
            title: title.into(),
            label: label.into(),
            initial,
        }
    }

    /// Runs the prompt.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Console`] when the terminal fails.
    pub fn ask<C: Console>(&self, console: &mut C) -> Result<Answer<bool>, PromptError> {
        let mut value = self.initial;
        loop {
            console.render(&self.screen(value))?;
            match console.read_key()? {
                Key::Esc => return Ok(Answer::Cancelled),
                Key::Enter => return Ok(Answer::Value(value)),
                Key::Left | Key::Right | Key::Up | Key::Down | Key::Char(' ') => value = !value,
                Key::Char('y' | 'Y') => value = true,
                Key::Char('n' | 'N') => value = false,
                _ => {}
            }
        }
    }

    fn screen(&self, value: bool) -> Screen {
        let mut screen = Screen::new();
        screen.push(Style::Title, self.title.as_str());
        screen.blank();
        let choice = if value { "(Y) / N" } else { "Y / (N)" };
        screen.push(Style::Plain, format!("{}: {choice}", self.label));
        screen.blank();
        screen.push(Style::Muted, TOGGLE_HINT);
        screen
    }
}
