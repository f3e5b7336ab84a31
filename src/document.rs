//! YAML document I/O shared by the configuration store and the artefact
//! writer.
//!
//! Every write goes to a hidden sibling file first and is then renamed over
//! the target, so readers never observe a half-written document. Writes can
//! be staged and committed separately when two documents must change
//! together.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised while reading or writing a document.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PersistenceError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a document is not valid YAML of the expected shape.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a document parses but violates a cross-record invariant.
    #[error("invalid document {path}: {message}")]
    InvalidDocument {
        /// Path that had invalid content.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a value cannot be rendered as YAML.
    #[error("failed to render {path}: {message}")]
    Serialize {
        /// Destination path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

impl PersistenceError {
    fn io(path: &Utf8Path, err: &io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// A rendered document written to its temporary sibling but not yet moved
/// into place.
#[derive(Debug)]
#[must_use = "staged writes must be committed or discarded"]
pub(crate) struct StagedWrite {
    dir: Dir,
    dir_path: Utf8PathBuf,
    temp_name: String,
    file_name: String,
}

impl StagedWrite {
    /// Renames the staged file over the target.
    pub(crate) fn commit(self) -> Result<(), PersistenceError> {
        let result = self
            .dir
            .rename(&self.temp_name, &self.dir, &self.file_name)
            .map_err(|err| PersistenceError::io(&self.dir_path.join(&self.file_name), &err));
        if result.is_err() {
            self.discard();
        }
        result
    }

    /// Removes the staged file, leaving the target untouched.
    pub(crate) fn discard(self) {
        if let Err(err) = self.dir.remove_file(&self.temp_name) {
            tracing::debug!(file = %self.temp_name, error = %err, "staged file already gone");
        }
    }
}

fn parent_dir(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}

fn file_name(path: &Utf8Path) -> Result<&str, PersistenceError> {
    path.file_name()
        .ok_or_else(|| PersistenceError::InvalidDocument {
            path: path.to_path_buf(),
            message: String::from("document path is missing a filename"),
        })
}

/// Reads a document, returning `None` when it (or its directory) does not
/// exist.
pub(crate) fn read_optional(path: &Utf8Path) -> Result<Option<String>, PersistenceError> {
    let parent = parent_dir(path);
    let name = file_name(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(PersistenceError::io(parent, &err)),
    };

    match dir.read_to_string(name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(PersistenceError::io(path, &err)),
    }
}

/// Reads a document that must exist.
pub(crate) fn read_required(path: &Utf8Path) -> Result<String, PersistenceError> {
    read_optional(path)?.ok_or_else(|| PersistenceError::Io {
        path: path.to_path_buf(),
        message: String::from("file not found"),
    })
}

/// Parses YAML, treating blank content as the default value.
pub(crate) fn parse_yaml<T>(path: &Utf8Path, contents: &str) -> Result<T, PersistenceError>
where
    T: DeserializeOwned + Default,
{
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(contents).map_err(|err| PersistenceError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Renders a value as YAML.
pub(crate) fn render_yaml<T: Serialize + ?Sized>(
    path: &Utf8Path,
    value: &T,
) -> Result<String, PersistenceError> {
    serde_yaml::to_string(value).map_err(|err| PersistenceError::Serialize {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Writes `contents` to the temporary sibling of `path`, creating parent
/// directories as needed.
pub(crate) fn stage(path: &Utf8Path, contents: &str) -> Result<StagedWrite, PersistenceError> {
    let parent = parent_dir(path);
    let name = file_name(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| PersistenceError::io(parent, &err))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| PersistenceError::io(parent, &err))?;

    let temp_name = format!(".{name}.tmp");
    dir.write(&temp_name, contents)
        .map_err(|err| PersistenceError::io(&parent.join(&temp_name), &err))?;

    Ok(StagedWrite {
        dir,
        dir_path: parent.to_path_buf(),
        temp_name,
        file_name: name.to_owned(),
    })
}

/// Stages and commits a single document.
pub(crate) fn write_atomic(path: &Utf8Path, contents: &str) -> Result<(), PersistenceError> {
    stage(path, contents)?.commit()
}

/// Removes a document if it exists.
pub(crate) fn remove(path: &Utf8Path) -> Result<(), PersistenceError> {
    let parent = parent_dir(path);
    let name = file_name(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(PersistenceError::io(parent, &err)),
    };
    match dir.remove_file(name) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(PersistenceError::io(path, &err)),
        _ => Ok(()),
    }
}
