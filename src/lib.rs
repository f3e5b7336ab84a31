//! Core library for the Astrago installer console.
//!
//! The crate keeps the operator's cluster description (nodes, shared
//! storage, platform settings) in three YAML documents, renders kubespray
//! inventories and platform values from them, and drives `ansible-playbook`,
//! `helmfile`, and `kubectl` from a keyboard-driven terminal menu while
//! streaming their output.

pub mod config;
pub mod config_store;
pub mod console;
pub mod document;
pub mod inventory;
pub mod logging;
pub mod menu;
pub mod model;
pub mod presenter;
pub mod process;
pub mod prompt;
pub mod session;
pub mod test_support;

pub use config::{ConfigError, InstallationMode, SessionConfig, StatePaths};
pub use config_store::{ConfigSnapshot, ConfigStatus, ConfigStore, StoreError};
pub use console::{Console, ConsoleError, CrosstermConsole, Key, Screen, Style, StyledLine};
pub use document::PersistenceError;
pub use inventory::{ArtifactError, ArtifactWriter};
pub use logging::LoggingError;
pub use menu::{Menu, MenuEngine, MenuEntry, MenuHost};
pub use model::{EnvironmentSettings, Node, NodeRole, StorageEndpoint, ValidationError};
pub use presenter::{RunStatus, Severity};
pub use process::{CommandRunner, Invocation, LaunchError, ProcessCommandRunner, ProcessHandle};
pub use prompt::{Answer, CheckboxField, InputField, PromptError, ToggleField};
pub use session::{Session, SessionError, render_artifacts};
