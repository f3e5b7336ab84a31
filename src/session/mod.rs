//! Interactive provisioning session.
//!
//! A [`Session`] owns the configuration store, the artefact writer, a
//! command runner, and the console. It builds the menu tree and implements
//! every handler behind it: node and storage editing, offline mirror
//! settings, and the ansible, helmfile, and kubectl runs. Handlers report
//! problems as [`SessionError`]; the menu engine shows them as notices and
//! returns to the menu, except for terminal failures, which end the session.

mod nodes;
mod provision;
mod settings;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, InstallationMode, SessionConfig};
use crate::config_store::{ConfigStore, StoreError};
use crate::console::{Console, ConsoleError, Style, StyledLine};
use crate::document::PersistenceError;
use crate::inventory::{ArtifactError, ArtifactWriter};
use crate::menu::{Menu, MenuEngine, MenuEntry, MenuHost};
use crate::model::ValidationError;
use crate::process::CommandRunner;
use crate::prompt::PromptError;

/// Errors raised by session handlers and startup.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Raised when the startup configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when a document or artefact cannot be read or written.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// Raised when the store refuses a mutation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Raised when operator input is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Raised when an artefact cannot be rendered.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Raised when a prompt fails.
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// Raised when the terminal fails.
    #[error(transparent)]
    Console(#[from] ConsoleError),
    /// Raised before a launch when the stored configuration is incomplete.
    #[error("{0}")]
    PrerequisiteNotMet(String),
    /// Raised when the produced kubeconfig cannot be copied into place.
    #[error("failed to copy kubeconfig to {path}: {message}")]
    Kubeconfig {
        /// Destination path.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

impl SessionError {
    fn prerequisite(message: impl Into<String>) -> Self {
        Self::PrerequisiteNotMet(message.into())
    }
}

/// Interactive provisioning session over a runner `R` and console `C`.
#[derive(Debug)]
pub struct Session<R, C> {
    config: SessionConfig,
    mode: InstallationMode,
    store: ConfigStore,
    artifacts: ArtifactWriter,
    runner: R,
    console: C,
}

impl<R, C> Session<R, C>
where
    R: CommandRunner + 'static,
    C: Console + 'static,
{
    /// Validates `config`, anchors its work directory, and loads the
    /// operator documents.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] for an unusable configuration and
    /// [`SessionError::Persistence`] when a stored document is unreadable or
    /// malformed.
    pub fn new(config: SessionConfig, runner: R, console: C) -> Result<Self, SessionError> {
        config.validate()?;
        let anchored = config.anchored()?;
        let mode = anchored.mode()?;
        let store = ConfigStore::load(anchored.state_paths())?;
        let artifacts = ArtifactWriter::from_config(&anchored);
        info!(
            mode = %mode,
            work_dir = %anchored.work_dir,
            nodes = store.nodes().len(),
            "session started"
        );
        Ok(Self {
            config: anchored,
            mode,
            store,
            artifacts,
            runner,
            console,
        })
    }

    /// Installation mode chosen at startup.
    #[must_use]
    pub const fn mode(&self) -> InstallationMode {
        self.mode
    }

    /// Stored configuration.
    #[must_use]
    pub const fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Effective configuration, with an absolute work directory.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs the menu until the operator exits.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Console`] when the terminal fails.
    pub fn run(&mut self) -> Result<(), SessionError> {
        let mut engine = MenuEngine::new(self.root_menu());
        engine.run(self)?;
        info!("session ended");
        Ok(())
    }

    /// Top-level menu.
    #[must_use]
    pub fn root_menu(&self) -> Menu<Self> {
        Menu::new(format!("Astrago Installer ({} mode)", self.mode))
            .entry(MenuEntry::submenu(
                "Kubernetes Infrastructure",
                Self::kubernetes_menu,
            ))
            .entry(MenuEntry::submenu("Astrago Platform", Self::astrago_menu))
            .entry(MenuEntry::run("Cluster Status", Self::cluster_status))
            .entry(MenuEntry::back("Exit"))
    }

    fn kubernetes_menu(&self) -> Menu<Self> {
        let mut menu = Menu::new("Kubernetes Infrastructure")
            .entry(MenuEntry::submenu("Set Nodes", Self::nodes_menu));
        if self.mode.is_offline() {
            menu = menu.entry(MenuEntry::run("Offline Settings", Self::offline_settings));
        }
        menu.entry(MenuEntry::run("Install Kubernetes", Self::install_kubernetes))
            .entry(MenuEntry::run("Reset Kubernetes", Self::reset_kubernetes))
            .entry(MenuEntry::run(
                "Install GPU Driver (optional)",
                Self::install_gpu_driver,
            ))
            .entry(MenuEntry::back("Back"))
            .context(Self::cluster_overview)
    }

    fn nodes_menu(&self) -> Menu<Self> {
        Menu::new("Set Nodes")
            .entry(MenuEntry::run("Add Node", Self::add_node))
            .entry(MenuEntry::run("Remove Node", Self::remove_node))
            .entry(MenuEntry::run("Edit Node", Self::edit_node))
            .entry(MenuEntry::back("Back"))
            .context(|session: &Self| nodes::node_table(session.store.nodes(), None))
    }

    fn astrago_menu(&self) -> Menu<Self> {
        Menu::new("Astrago Platform")
            .entry(MenuEntry::submenu("Set NFS Server", Self::storage_menu))
            .entry(MenuEntry::run("Install Astrago", Self::install_astrago))
            .entry(MenuEntry::run("Uninstall Astrago", Self::uninstall_astrago))
            .entry(MenuEntry::back("Back"))
            .context(Self::platform_overview)
    }

    fn storage_menu(&self) -> Menu<Self> {
        Menu::new("Set NFS Server")
            .entry(MenuEntry::run("Setting NFS Server", Self::set_storage))
            .entry(MenuEntry::run("Install NFS Server", Self::install_storage))
            .entry(MenuEntry::back("Back"))
            .context(|session: &Self| settings::storage_table(session.store.storage()))
    }

    fn cluster_overview(&self) -> Vec<StyledLine> {
        let mut lines = nodes::node_table(self.store.nodes(), None);
        if self.mode.is_offline() {
            lines.push(StyledLine::default());
            lines.extend(settings::offline_summary(&self.store.environment().offline));
        }
        lines
    }

    fn platform_overview(&self) -> Vec<StyledLine> {
        let mut lines = settings::storage_table(self.store.storage());
        lines.push(StyledLine::default());
        let address = &self.store.environment().external_address;
        lines.push(if address.is_empty() {
            StyledLine::new(Style::Muted, "External address not set.")
        } else {
            StyledLine::new(Style::Plain, format!("External address: {address}"))
        });
        lines
    }
}

impl<R: CommandRunner, C: Console> MenuHost for Session<R, C> {
    type Console = C;
    type Error = SessionError;

    fn console(&mut self) -> &mut C {
        &mut self.console
    }

    fn console_failure(err: &SessionError) -> Option<ConsoleError> {
        match err {
            SessionError::Console(inner) | SessionError::Prompt(PromptError::Console(inner)) => {
                Some(inner.clone())
            }
            _ => None,
        }
    }
}

/// Writes every artefact the stored configuration allows, without launching
/// anything. The platform values are rendered only once the configuration
/// is complete.
///
/// # Errors
///
/// Returns [`SessionError`] when the configuration is unusable, a document
/// cannot be read, or an artefact cannot be written.
pub fn render_artifacts(config: SessionConfig) -> Result<Vec<Utf8PathBuf>, SessionError> {
    config.validate()?;
    let anchored = config.anchored()?;
    let mode = anchored.mode()?;
    let store = ConfigStore::load(anchored.state_paths())?;
    let artifacts = ArtifactWriter::from_config(&anchored);

    let mut written = vec![
        artifacts.write_cluster_inventory(store.nodes())?,
        artifacts.write_gpu_inventory(store.nodes())?,
    ];
    if let Some(endpoint) = store.storage() {
        written.push(artifacts.write_storage_inventory(endpoint)?);
    }
    if store.status().configured {
        let output = artifacts.write_environment(store.environment(), mode)?;
        written.push(output.values);
        written.extend(output.registry_mirror);
    } else {
        written.extend(artifacts.write_registry_mirror(store.environment(), mode)?);
    }
    info!(count = written.len(), "artefacts rendered");
    Ok(written)
}

#[cfg(test)]
mod tests;
