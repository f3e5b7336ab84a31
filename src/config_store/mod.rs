//! Persistent operator configuration: nodes, the shared-storage endpoint,
//! and environment settings.
//!
//! Each entity lives in its own YAML document. Every mutating call validates
//! first, writes the whole document atomically, and only then updates the
//! in-memory copy, so callers never observe state that is not on disk.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::StatePaths;
use crate::document::{self, PersistenceError};
use crate::model::{
    EnvironmentSettings, Node, OfflineSettings, StorageEndpoint, StorageRecord, StorageSettings,
    ValidationError, validate_external_address, validate_mirror_url, validate_registry_address,
};

/// Errors raised by store mutations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when the requested change is invalid; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Raised when the change could not be persisted; prior files are intact.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Read-only copy of every stored value.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    /// Nodes in operator order.
    pub nodes: Vec<Node>,
    /// Shared-storage endpoint as stored in `nfs-servers.yaml`.
    pub storage: StorageSettings,
    /// Environment settings.
    pub environment: EnvironmentSettings,
}

/// Derived readiness plus a snapshot, for display.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ConfigStatus {
    /// `true` once the external address, storage endpoint, and at least one
    /// node are set.
    pub configured: bool,
    /// Current values.
    pub snapshot: ConfigSnapshot,
}

/// Owns the three operator documents.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    paths: StatePaths,
    nodes: Vec<Node>,
    storage: Option<StorageEndpoint>,
    environment: EnvironmentSettings,
}

impl ConfigStore {
    /// Loads all documents. Missing documents yield defaults. The storage
    /// mirror in the environment settings always follows `nfs-servers.yaml`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when a document cannot be read, is not
    /// valid YAML, or contains invalid or conflicting records. No partial
    /// state is returned.
    pub fn load(paths: StatePaths) -> Result<Self, PersistenceError> {
        let nodes: Vec<Node> = load_document(&paths.nodes)?;
        ensure_unique(&nodes).map_err(|err| PersistenceError::InvalidDocument {
            path: paths.nodes.clone(),
            message: err.to_string(),
        })?;

        let storage_record: StorageRecord = load_document(&paths.storage)?;
        let storage =
            storage_record
                .into_endpoint()
                .map_err(|err| PersistenceError::InvalidDocument {
                    path: paths.storage.clone(),
                    message: err.to_string(),
                })?;

        let loaded: EnvironmentSettings = load_document(&paths.environment)?;
        let environment = reconcile_environment(loaded, storage.as_ref()).map_err(|err| {
            PersistenceError::InvalidDocument {
                path: paths.environment.clone(),
                message: err.to_string(),
            }
        })?;

        info!(
            nodes = nodes.len(),
            storage = storage.is_some(),
            "loaded configuration documents"
        );
        Ok(Self {
            paths,
            nodes,
            storage,
            environment,
        })
    }

    /// Document locations backing this store.
    #[must_use]
    pub const fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Nodes in operator order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Shared-storage endpoint, if set.
    #[must_use]
    pub const fn storage(&self) -> Option<&StorageEndpoint> {
        self.storage.as_ref()
    }

    /// Environment settings.
    #[must_use]
    pub const fn environment(&self) -> &EnvironmentSettings {
        &self.environment
    }

    /// Appends a node and persists the list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for invalid fields or a name or
    /// address already in use, and [`StoreError::Persistence`] when the write
    /// fails. The list is unchanged on error.
    pub fn add_node(&mut self, node: Node) -> Result<(), StoreError> {
        node.validate()?;
        check_conflicts(&self.nodes, &node, None)?;

        let mut updated = self.nodes.clone();
        updated.push(node);
        self.persist_nodes(&updated)?;
        info!(total = updated.len(), "node added");
        self.nodes = updated;
        Ok(())
    }

    /// Removes the node at `index`. Out-of-range indexes are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] when the write fails; the node is
    /// kept in that case.
    pub fn remove_node(&mut self, index: usize) -> Result<Option<Node>, StoreError> {
        if index >= self.nodes.len() {
            return Ok(None);
        }

        let mut updated = self.nodes.clone();
        let removed = updated.remove(index);
        self.persist_nodes(&updated)?;
        info!(node = %removed.name, "node removed");
        self.nodes = updated;
        Ok(Some(removed))
    }

    /// Replaces the node at `index` with a fully validated record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an unknown index, invalid
    /// fields, or a name or address used by another node, and
    /// [`StoreError::Persistence`] when the write fails. The prior record is
    /// untouched on error.
    pub fn edit_node(&mut self, index: usize, node: Node) -> Result<(), StoreError> {
        if index >= self.nodes.len() {
            return Err(ValidationError::UnknownNode { index }.into());
        }
        node.validate()?;
        check_conflicts(&self.nodes, &node, Some(index))?;

        let mut updated = self.nodes.clone();
        if let Some(slot) = updated.get_mut(index) {
            *slot = node;
        }
        self.persist_nodes(&updated)?;
        info!(index, "node edited");
        self.nodes = updated;
        Ok(())
    }

    /// Sets the shared-storage endpoint and mirrors it into the environment
    /// settings. Both documents are staged before either is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a malformed address or path and
    /// [`StoreError::Persistence`] when either write fails, in which case
    /// both persisted documents keep their previous contents.
    pub fn set_storage_endpoint(
        &mut self,
        ip: &str,
        base_path: &str,
    ) -> Result<StorageEndpoint, StoreError> {
        let endpoint = StorageEndpoint::parse(ip, base_path)?;
        let mut environment = self.environment.clone();
        environment.storage = StorageSettings::from(&endpoint);

        let storage_doc =
            document::render_yaml(&self.paths.storage, &StorageRecord::from(Some(&endpoint)))?;
        let environment_doc = document::render_yaml(&self.paths.environment, &environment)?;
        let previous_storage = document::read_optional(&self.paths.storage)?;

        let staged_storage = document::stage(&self.paths.storage, &storage_doc)?;
        let staged_environment = match document::stage(&self.paths.environment, &environment_doc)
        {
            Ok(staged) => staged,
            Err(err) => {
                staged_storage.discard();
                return Err(err.into());
            }
        };

        if let Err(err) = staged_storage.commit() {
            staged_environment.discard();
            return Err(err.into());
        }
        if let Err(err) = staged_environment.commit() {
            self.restore_storage(previous_storage.as_deref());
            return Err(err.into());
        }

        info!(ip = %endpoint.ip, path = %endpoint.base_path, "storage endpoint set");
        self.storage = Some(endpoint.clone());
        self.environment = environment;
        Ok(endpoint)
    }

    /// Sets the externally reachable platform address.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an empty address or one
    /// containing whitespace, and [`StoreError::Persistence`] when the write
    /// fails.
    pub fn set_external_address(&mut self, address: &str) -> Result<(), StoreError> {
        let trimmed = address.trim();
        validate_external_address(trimmed)?;

        let mut environment = self.environment.clone();
        environment.external_address = trimmed.to_owned();
        self.persist_environment(environment)?;
        info!(address = trimmed, "external address set");
        Ok(())
    }

    /// Sets the offline registry and HTTP mirror.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a malformed registry address or
    /// mirror URL, and [`StoreError::Persistence`] when the write fails.
    pub fn set_offline_settings(
        &mut self,
        registry_address: &str,
        http_mirror_url: &str,
    ) -> Result<(), StoreError> {
        let registry = registry_address.trim();
        let mirror = http_mirror_url.trim().trim_end_matches('/');
        validate_registry_address(registry)?;
        validate_mirror_url(mirror)?;

        let mut environment = self.environment.clone();
        environment.offline = OfflineSettings {
            registry_address: registry.to_owned(),
            http_mirror_url: mirror.to_owned(),
        };
        self.persist_environment(environment)?;
        info!(registry, mirror, "offline settings set");
        Ok(())
    }

    /// Returns the derived readiness flag plus a snapshot for display.
    #[must_use]
    pub fn status(&self) -> ConfigStatus {
        let snapshot = self.snapshot();
        let configured = !snapshot.environment.external_address.trim().is_empty()
            && !snapshot.environment.storage.ip.trim().is_empty()
            && !snapshot.environment.storage.base_path.trim().is_empty()
            && !snapshot.nodes.is_empty();
        ConfigStatus {
            configured,
            snapshot,
        }
    }

    /// Copies every stored value.
    #[must_use]
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            nodes: self.nodes.clone(),
            storage: self
                .storage
                .as_ref()
                .map(StorageSettings::from)
                .unwrap_or_default(),
            environment: self.environment.clone(),
        }
    }

    fn persist_nodes(&self, nodes: &[Node]) -> Result<(), PersistenceError> {
        let rendered = document::render_yaml(&self.paths.nodes, nodes)?;
        document::write_atomic(&self.paths.nodes, &rendered)
    }

    fn persist_environment(&mut self, environment: EnvironmentSettings) -> Result<(), StoreError> {
        let rendered = document::render_yaml(&self.paths.environment, &environment)?;
        document::write_atomic(&self.paths.environment, &rendered)?;
        self.environment = environment;
        Ok(())
    }

    fn restore_storage(&self, previous: Option<&str>) {
        let restored = match previous {
            Some(contents) => document::write_atomic(&self.paths.storage, contents),
            None => document::remove(&self.paths.storage),
        };
        if let Err(err) = restored {
            tracing::error!(error = %err, "failed to roll back storage endpoint document");
        }
    }
}

fn load_document<T>(path: &camino::Utf8Path) -> Result<T, PersistenceError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match document::read_optional(path)? {
        Some(contents) => document::parse_yaml(path, &contents),
        None => Ok(T::default()),
    }
}

/// Validates the environment fields that are set and re-derives the storage
/// mirror from the endpoint in `nfs-servers.yaml`, which is authoritative.
fn reconcile_environment(
    mut environment: EnvironmentSettings,
    storage: Option<&StorageEndpoint>,
) -> Result<EnvironmentSettings, ValidationError> {
    if !environment.external_address.is_empty() {
        validate_external_address(&environment.external_address)?;
    }
    let offline = &environment.offline;
    if !offline.registry_address.is_empty() {
        validate_registry_address(&offline.registry_address)?;
    }
    if !offline.http_mirror_url.is_empty() {
        validate_mirror_url(&offline.http_mirror_url)?;
    }

    let mirrored = storage.map(StorageSettings::from).unwrap_or_default();
    if environment.storage != mirrored {
        warn!(
            stored_ip = %environment.storage.ip,
            endpoint_ip = %mirrored.ip,
            "environment storage differs from the storage endpoint; using the endpoint"
        );
        environment.storage = mirrored;
    }
    Ok(environment)
}

fn check_conflicts(
    nodes: &[Node],
    candidate: &Node,
    skip: Option<usize>,
) -> Result<(), ValidationError> {
    let others = nodes
        .iter()
        .enumerate()
        .filter(|(index, _)| Some(*index) != skip)
        .map(|(_, node)| node);
    for other in others {
        if other.name == candidate.name {
            return Err(ValidationError::DuplicateName {
                name: candidate.name.clone(),
            });
        }
        if other.ip == candidate.ip {
            return Err(ValidationError::DuplicateIp { ip: candidate.ip });
        }
    }
    Ok(())
}

fn ensure_unique(nodes: &[Node]) -> Result<(), ValidationError> {
    for (index, node) in nodes.iter().enumerate() {
        let earlier = nodes.get(..index).unwrap_or_default();
        check_conflicts(earlier, node, None)?;
    }
    Ok(())
}
