//! File logging for the console.
//!
//! The terminal belongs to the menu while a session runs, so events go to a
//! log file instead of stderr. Credentials never reach this layer: commands
//! are logged through their redacted display form.

use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::{Dir, File, OpenOptions};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Errors raised while installing the log subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Raised when the log file cannot be opened for appending.
    #[error("cannot open log file {path}: {message}")]
    Open {
        /// Log file path.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the filter directive does not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Rejected directive.
        filter: String,
        /// Parser message.
        message: String,
    },
}

/// Installs a global subscriber appending to `path`, filtered by
/// `directive`. Returns `false` when a subscriber was already installed.
///
/// # Errors
///
/// Returns [`LoggingError`] when the filter is invalid or the file cannot be
/// opened.
pub fn init(path: &Utf8Path, directive: &str) -> Result<bool, LoggingError> {
    let filter = parse_filter(directive)?;
    let file = open_append(path)?;
    let layer = fmt::Layer::default()
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file.into_std()));
    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok())
}

fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|err| LoggingError::Filter {
        filter: directive.to_owned(),
        message: err.to_string(),
    })
}

/// Opens `path` for appending, creating it and its parent directories.
fn open_append(path: &Utf8Path) -> Result<File, LoggingError> {
    let open_error = |message: String| LoggingError::Open {
        path: path.to_path_buf(),
        message,
    };
    let name = path
        .file_name()
        .ok_or_else(|| open_error(String::from("path has no file name")))?;
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| open_error(err.to_string()))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| open_error(err.to_string()))?;
    dir.open_with(name, OpenOptions::new().create(true).append(true))
        .map_err(|err| open_error(err.to_string()))
}
