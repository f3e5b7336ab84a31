//! Terminal boundary: render a screen, read one key.
//!
//! Everything above this module works with [`Screen`] values and [`Key`]
//! events, so the menu engine and prompts can be driven by a scripted
//! console in tests. [`CrosstermConsole`] is the real implementation.

use std::io::{self, Stdout, Write};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::terminal::{
    self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode,
    enable_raw_mode,
};
use crossterm::{execute, queue};
use thiserror::Error;

/// Rows assumed when the terminal size cannot be queried.
pub const FALLBACK_HEIGHT: usize = 24;

/// Errors raised by the terminal. These end the session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConsoleError {
    /// Raised when a terminal operation fails.
    #[error("terminal {operation} failed: {message}")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Operating system error string.
        message: String,
    },
    /// Raised when no further input can be read.
    #[error("terminal input closed")]
    Closed,
}

impl ConsoleError {
    fn io(operation: &'static str, err: &io::Error) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }
}

/// A key press, reduced to what the console understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Key {
    /// Cursor up.
    Up,
    /// Cursor down.
    Down,
    /// Cursor left.
    Left,
    /// Cursor right.
    Right,
    /// Accept.
    Enter,
    /// Cancel or back. Ctrl-C maps here too.
    Esc,
    /// Delete the previous character, or back in menus.
    Backspace,
    /// A printable character.
    Char(char),
    /// Anything else, including terminal resizes. Callers re-render.
    Other,
}

/// Visual role of a line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Style {
    /// Normal text.
    #[default]
    Plain,
    /// Screen or section heading.
    Title,
    /// Highlighted menu entry.
    Selected,
    /// Hints and secondary text.
    Muted,
    /// Neutral output.
    Info,
    /// Positive outcome.
    Success,
    /// Non-fatal problem.
    Warning,
    /// Failure.
    Error,
}

/// One line of a [`Screen`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StyledLine {
    /// Visual role.
    pub style: Style,
    /// Text without a line terminator.
    pub text: String,
}

impl StyledLine {
    /// Creates a line.
    #[must_use]
    pub fn new(style: Style, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }
}

/// A full frame, top to bottom.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Screen {
    lines: Vec<StyledLine>,
}

impl Screen {
    /// Creates an empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line.
    pub fn push(&mut self, style: Style, text: impl Into<String>) {
        self.lines.push(StyledLine::new(style, text));
    }

    /// Appends an empty line.
    pub fn blank(&mut self) {
        self.push(Style::Plain, String::new());
    }

    /// Lines in order.
    #[must_use]
    pub fn lines(&self) -> &[StyledLine] {
        &self.lines
    }

    /// Returns `true` when any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.text.contains(needle))
    }

    /// All lines joined with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Renders frames and reads keys.
pub trait Console {
    /// Replaces the visible frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError`] when the terminal cannot be written.
    fn render(&mut self, screen: &Screen) -> Result<(), ConsoleError>;

    /// Blocks until the next key press.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError`] when input cannot be read.
    fn read_key(&mut self) -> Result<Key, ConsoleError>;

    /// Number of visible rows.
    fn viewport_height(&self) -> usize;
}

/// Raw-mode, alternate-screen terminal. Restores the terminal on drop.
#[derive(Debug)]
pub struct CrosstermConsole {
    out: Stdout,
}

impl CrosstermConsole {
    /// Switches the terminal into raw mode on the alternate screen.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::Io`] when the terminal cannot be configured.
    pub fn open() -> Result<Self, ConsoleError> {
        enable_raw_mode().map_err(|err| ConsoleError::io("raw mode", &err))?;
        let mut out = io::stdout();
        if let Err(err) = execute!(out, EnterAlternateScreen, Hide) {
            if let Err(restore) = disable_raw_mode() {
                tracing::warn!(error = %restore, "failed to leave raw mode");
            }
            return Err(ConsoleError::io("alternate screen", &err));
        }
        Ok(Self { out })
    }

    fn width(&self) -> usize {
        terminal::size().map_or(80, |(cols, _)| usize::from(cols))
    }
}

impl Drop for CrosstermConsole {
    fn drop(&mut self) {
        if let Err(err) = execute!(self.out, Show, LeaveAlternateScreen) {
            tracing::warn!(error = %err, "failed to leave alternate screen");
        }
        if let Err(err) = disable_raw_mode() {
            tracing::warn!(error = %err, "failed to leave raw mode");
        }
    }
}

impl Console for CrosstermConsole {
    fn render(&mut self, screen: &Screen) -> Result<(), ConsoleError> {
        let width = self.width();
        let height = self.viewport_height();
        queue!(self.out, Clear(ClearType::All))
            .map_err(|err| ConsoleError::io("render", &err))?;
        for (row, line) in screen.lines().iter().take(height).enumerate() {
            let clipped: String = line.text.chars().take(width).collect();
            let row_index = u16::try_from(row).unwrap_or(u16::MAX);
            queue!(self.out, MoveTo(0, row_index)).map_err(|err| ConsoleError::io("render", &err))?;
            apply_style(&mut self.out, line.style)?;
            queue!(
                self.out,
                Print(clipped),
                SetAttribute(Attribute::Reset),
                ResetColor
            )
            .map_err(|err| ConsoleError::io("render", &err))?;
        }
        self.out
            .flush()
            .map_err(|err| ConsoleError::io("render", &err))
    }

    fn read_key(&mut self) -> Result<Key, ConsoleError> {
        loop {
            match event::read().map_err(|err| ConsoleError::io("read", &err))? {
                Event::Key(key) if key.kind == KeyEventKind::Press => return Ok(map_key(key)),
                Event::Resize(..) => return Ok(Key::Other),
                _ => {}
            }
        }
    }

    fn viewport_height(&self) -> usize {
        terminal::size().map_or(FALLBACK_HEIGHT, |(_, rows)| usize::from(rows))
    }
}

fn apply_style(out: &mut Stdout, style: Style) -> Result<(), ConsoleError> {
    let foreground = match style {
        Style::Plain | Style::Info => None,
        Style::Title => Some(Color::Cyan),
        Style::Selected => Some(Color::Yellow),
        Style::Muted => Some(Color::DarkGrey),
        Style::Success => Some(Color::Green),
        Style::Warning => Some(Color::DarkYellow),
        Style::Error => Some(Color::Red),
    };
    if matches!(style, Style::Title | Style::Selected) {
        queue!(out, SetAttribute(Attribute::Bold)).map_err(|err| ConsoleError::io("render", &err))?;
    }
    if let Some(colour) = foreground {
        queue!(out, SetForegroundColor(colour)).map_err(|err| ConsoleError::io("render", &err))?;
    }
    Ok(())
}

/// Maps a crossterm key event to a [`Key`].
#[must_use]
pub fn map_key(key: KeyEvent) -> Key {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Key::Esc,
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Enter => Key::Enter,
        KeyCode::Esc => Key::Esc,
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Char(ch) => Key::Char(ch),
        _ => Key::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(KeyCode::Up, KeyModifiers::NONE, Key::Up)]
    #[case(KeyCode::Enter, KeyModifiers::NONE, Key::Enter)]
    #[case(KeyCode::Char('c'), KeyModifiers::CONTROL, Key::Esc)]
    #[case(KeyCode::Char('c'), KeyModifiers::NONE, Key::Char('c'))]
    #[case(KeyCode::Char('3'), KeyModifiers::NONE, Key::Char('3'))]
    #[case(KeyCode::Tab, KeyModifiers::NONE, Key::Other)]
    fn keys_map_to_console_keys(
        #[case] code: KeyCode,
        #[case] modifiers: KeyModifiers,
        #[case] expected: Key,
    ) {
        assert_eq!(map_key(KeyEvent::new(code, modifiers)), expected);
    }

    #[test]
    fn screen_collects_lines() {
        let mut screen = Screen::new();
        screen.push(Style::Title, "Kubernetes");
        screen.blank();
        screen.push(Style::Selected, "> 1. Set Nodes");

        assert_eq!(screen.lines().len(), 3);
        assert!(screen.contains("Set Nodes"));
        assert_eq!(screen.text(), "Kubernetes\n\n> 1. Set Nodes");
    }
}
