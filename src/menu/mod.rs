//! Hierarchical menu navigation.
//!
//! A [`Menu`] is a titled list of `{label, action}` entries. The
//! [`MenuEngine`] keeps a stack of open menus, renders the top one, and
//! dispatches key presses: arrows move the selection without wrapping, digits
//! select and activate, Enter activates, and Esc or Backspace go back. The
//! session ends when the stack is empty.

use std::fmt;

use tracing::{info, warn};

use crate::console::{Console, ConsoleError, Key, Screen, StyledLine, Style};

const MENU_HINT: &str = "Up/Down to move, Enter or 1-9 to select, Esc to go back";

/// State the engine needs from whatever owns the handlers.
pub trait MenuHost {
    /// Console type.
    type Console: Console;
    /// Error returned by handlers.
    type Error: fmt::Display;

    /// Console used for menus and notices.
    fn console(&mut self) -> &mut Self::Console;

    /// Returns the terminal failure inside `err`, if it is one. Such errors
    /// end the session; all others are shown and acknowledged.
    fn console_failure(err: &Self::Error) -> Option<ConsoleError>;
}

/// Handler run by a [`MenuAction::Run`] entry.
pub type Handler<H> = Box<dyn Fn(&mut H) -> Result<(), <H as MenuHost>::Error>>;
/// Builder for a submenu, evaluated each time it is entered.
pub type MenuBuilder<H> = Box<dyn Fn(&H) -> Menu<H>>;
/// Renders context lines below the entries.
pub type ContextView<H> = Box<dyn Fn(&H) -> Vec<StyledLine>>;

/// What an entry does when activated.
pub enum MenuAction<H: MenuHost> {
    /// Run a handler, then re-render the same menu.
    Run(Handler<H>),
    /// Open a nested menu.
    Submenu(MenuBuilder<H>),
    /// Close the current menu.
    Back,
}

/// A labelled menu entry.
pub struct MenuEntry<H: MenuHost> {
    label: String,
    action: MenuAction<H>,
}

impl<H: MenuHost> MenuEntry<H> {
    /// Entry that runs `handler`.
    pub fn run(
        label: impl Into<String>,
        handler: impl Fn(&mut H) -> Result<(), H::Error> + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            action: MenuAction::Run(Box::new(handler)),
        }
    }

    /// Entry that opens the menu returned by `build`.
    pub fn submenu(label: impl Into<String>, build: impl Fn(&H) -> Menu<H> + 'static) -> Self {
        Self {
            label: label.into(),
            action: MenuAction::Submenu(Box::new(build)),
        }
    }

    /// Entry that closes the current menu.
    pub fn back(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: MenuAction::Back,
        }
    }

    /// Display label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// A titled list of entries with an optional context view.
pub struct Menu<H: MenuHost> {
    title: String,
    entries: Vec<MenuEntry<H>>,
    context: Option<ContextView<H>>,
}

impl<H: MenuHost> fmt::Debug for Menu<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Menu")
            .field("title", &self.title)
            .field(
                "entries",
                &self.entries.iter().map(MenuEntry::label).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl<H: MenuHost> Menu<H> {
    /// Creates an empty menu.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            entries: Vec::new(),
            context: None,
        }
    }

    /// Appends an entry.
    #[must_use]
    pub fn entry(mut self, entry: MenuEntry<H>) -> Self {
        self.entries.push(entry);
        self
    }

    /// Shows `view` below the entries, for example a node table.
    #[must_use]
    pub fn context(mut self, view: impl Fn(&H) -> Vec<StyledLine> + 'static) -> Self {
        self.context = Some(Box::new(view));
        self
    }

    /// Menu heading.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Entries in order.
    #[must_use]
    pub fn entries(&self) -> &[MenuEntry<H>] {
        &self.entries
    }

    fn screen(&self, host: &H, selected: usize) -> Screen {
        let mut screen = Screen::new();
        screen.push(Style::Title, self.title.as_str());
        screen.blank();
        for (index, entry) in self.entries.iter().enumerate() {
            let ordinal = index + 1;
            if index == selected {
                screen.push(Style::Selected, format!("> {ordinal}. {}", entry.label));
            } else {
                screen.push(Style::Plain, format!("  {ordinal}. {}", entry.label));
            }
        }
        if let Some(view) = &self.context {
            screen.blank();
            for line in view(host) {
                screen.push(line.style, line.text);
            }
        }
        screen.blank();
        screen.push(Style::Muted, MENU_HINT);
        screen
    }
}

struct MenuContext<H: MenuHost> {
    menu: Menu<H>,
    selected: usize,
}

enum Step<H: MenuHost> {
    Stay,
    Push(Menu<H>),
    Pop,
}

/// Stack-based navigation over [`Menu`] values.
pub struct MenuEngine<H: MenuHost> {
    stack: Vec<MenuContext<H>>,
}

impl<H: MenuHost> fmt::Debug for MenuEngine<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuEngine")
            .field(
                "stack",
                &self
                    .stack
                    .iter()
                    .map(|context| context.menu.title())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<H: MenuHost> MenuEngine<H> {
    /// Opens `root` as the only menu.
    #[must_use]
    pub fn new(root: Menu<H>) -> Self {
        Self {
            stack: vec![MenuContext {
                menu: root,
                selected: 0,
            }],
        }
    }

    /// Number of open menus.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Runs until the root menu is closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError`] when the terminal fails, either directly or
    /// inside a handler error.
    pub fn run(&mut self, host: &mut H) -> Result<(), ConsoleError> {
        while let Some(top) = self.stack.last() {
            let screen = top.menu.screen(host, top.selected);
            host.console().render(&screen)?;
            let key = host.console().read_key()?;
            match self.handle_key(host, key)? {
                Step::Stay => {}
                Step::Push(menu) => {
                    info!(menu = menu.title(), "menu opened");
                    self.stack.push(MenuContext { menu, selected: 0 });
                }
                Step::Pop => {
                    self.stack.pop();
                }
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, host: &mut H, key: Key) -> Result<Step<H>, ConsoleError> {
        let Some(top) = self.stack.last_mut() else {
            return Ok(Step::Pop);
        };
        let last = top.menu.entries.len().saturating_sub(1);
        match key {
            Key::Up => {
                top.selected = top.selected.saturating_sub(1);
                Ok(Step::Stay)
            }
            Key::Down => {
                top.selected = (top.selected + 1).min(last);
                Ok(Step::Stay)
            }
            Key::Esc | Key::Backspace => Ok(Step::Pop),
            Key::Enter => Self::activate(top, host),
            Key::Char(ch) => match ch.to_digit(10).and_then(|digit| usize::try_from(digit).ok()) {
                Some(ordinal) if (1..=top.menu.entries.len()).contains(&ordinal) => {
                    top.selected = ordinal - 1;
                    Self::activate(top, host)
                }
                _ => Ok(Step::Stay),
            },
            Key::Left | Key::Right | Key::Other => Ok(Step::Stay),
        }
    }

    fn activate(top: &MenuContext<H>, host: &mut H) -> Result<Step<H>, ConsoleError> {
        let Some(entry) = top.menu.entries.get(top.selected) else {
            return Ok(Step::Stay);
        };
        info!(menu = top.menu.title(), entry = entry.label(), "menu entry selected");
        match &entry.action {
            MenuAction::Back => Ok(Step::Pop),
            MenuAction::Submenu(build) => Ok(Step::Push(build(host))),
            MenuAction::Run(handler) => {
                if let Err(err) = handler(host) {
                    if let Some(fatal) = H::console_failure(&err) {
                        return Err(fatal);
                    }
                    warn!(entry = entry.label(), error = %err, "action failed");
                    show_notice(host.console(), entry.label(), &err.to_string())?;
                }
                Ok(Step::Stay)
            }
        }
    }
}

/// Shows an error notice and waits for one key.
///
/// # Errors
///
/// Returns [`ConsoleError`] when the terminal fails.
pub fn show_notice<C: Console>(console: &mut C, title: &str, message: &str) -> Result<(), ConsoleError> {
    show_message(console, title, Style::Error, message)
}

/// Shows a message in `style` and waits for one key.
///
/// # Errors
///
/// Returns [`ConsoleError`] when the terminal fails.
pub fn show_message<C: Console>(
    console: &mut C,
    title: &str,
    style: Style,
    message: &str,
) -> Result<(), ConsoleError> {
    let mut screen = Screen::new();
    screen.push(Style::Title, title);
    screen.blank();
    for line in message.lines() {
        screen.push(style, line);
    }
    screen.blank();
    screen.push(Style::Muted, "Press any key to continue");
    console.render(&screen)?;
    console.read_key()?;
    Ok(())
}
