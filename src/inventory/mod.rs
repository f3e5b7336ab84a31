//! Provisioning artefacts derived from the stored configuration.
//!
//! Builders here are pure: they take a snapshot of nodes or settings and
//! return serialisable values whose YAML form is what `ansible-playbook` and
//! `helmfile` read. [`ArtifactWriter`] places them on disk.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::info;

use crate::config::{InstallationMode, SessionConfig};
use crate::document::{self, PersistenceError};
use crate::model::{EnvironmentSettings, Node, NodeRole, StorageEndpoint};

/// Export options appended to the storage base path.
pub const NFS_EXPORT_OPTIONS: &str = "*(rw,sync,no_subtree_check,no_root_squash)";
/// Host name used for the storage server in its inventory.
pub const NFS_SERVER_HOST: &str = "nfs-server";
/// NVIDIA driver branch installed by the GPU playbook.
pub const NVIDIA_DRIVER_BRANCH: &str = "535";

/// Errors raised while building or writing artefacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Raised when the values template is missing or not a YAML mapping.
    #[error("invalid values template {path}: {message}")]
    Template {
        /// Template path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when an artefact cannot be written.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Connection variables shared by every inventory host.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HostVars {
    /// Address Ansible connects to.
    pub ansible_host: String,
    /// Address the node uses inside the cluster.
    pub ip: String,
    /// Address other nodes use to reach it.
    pub access_ip: String,
    /// Remote user, when fixed by the inventory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_user: Option<String>,
}

impl HostVars {
    fn for_address(address: &str) -> Self {
        Self {
            ansible_host: address.to_owned(),
            ip: address.to_owned(),
            access_ip: address.to_owned(),
            ansible_user: None,
        }
    }
}

/// A group that lists member hosts by name. Members render as `name: null`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct HostGroup {
    /// Member host names.
    pub hosts: BTreeMap<String, ()>,
}

impl HostGroup {
    fn insert(&mut self, name: &str) {
        self.hosts.insert(name.to_owned(), ());
    }

    /// Returns `true` when `name` is a member.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.hosts.contains_key(name)
    }

    /// Member names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }
}

/// The `k8s-cluster` group, which nests both role groups.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ClusterChildren {
    /// Nested role groups.
    pub children: RoleGroups,
}

/// Role groups keyed by their kubespray names.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct RoleGroups {
    /// Control-plane hosts.
    #[serde(rename = "kube-master")]
    pub control_plane: HostGroup,
    /// Worker hosts.
    #[serde(rename = "kube-node")]
    pub workers: HostGroup,
}

/// Top-level group layout of the cluster inventory.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ClusterGroups {
    /// Route reflectors; always empty.
    #[serde(rename = "calico-rr")]
    pub calico_rr: HostGroup,
    /// Consensus store members.
    pub etcd: HostGroup,
    /// Union of the role groups.
    #[serde(rename = "k8s-cluster")]
    pub k8s_cluster: ClusterChildren,
    /// Control-plane hosts.
    #[serde(rename = "kube-master")]
    pub control_plane: HostGroup,
    /// Worker hosts.
    #[serde(rename = "kube-node")]
    pub workers: HostGroup,
}

/// Body of the `all` group.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ClusterAll {
    /// Groups.
    pub children: ClusterGroups,
    /// Every host with its connection variables.
    pub hosts: BTreeMap<String, HostVars>,
}

/// Kubespray host inventory.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ClusterInventory {
    /// The `all` group.
    pub all: ClusterAll,
}

impl ClusterInventory {
    /// Members of a role group.
    #[must_use]
    pub const fn role_group(&self, role: NodeRole) -> &HostGroup {
        match role {
            NodeRole::ControlPlane => &self.all.children.control_plane,
            NodeRole::Worker => &self.all.children.workers,
        }
    }

    /// Union of both role groups, each host once, in sorted order.
    #[must_use]
    pub fn cluster_hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = self
            .all
            .children
            .control_plane
            .names()
            .chain(self.all.children.workers.names())
            .collect();
        hosts.sort_unstable();
        hosts.dedup();
        hosts
    }
}

/// Builds the kubespray inventory for `nodes`.
#[must_use]
pub fn build_cluster_inventory(nodes: &[Node]) -> ClusterInventory {
    let mut inventory = ClusterInventory::default();
    let all = &mut inventory.all;
    for node in nodes {
        let name = node.name.as_str();
        all.hosts
            .insert(name.to_owned(), HostVars::for_address(&node.ip.to_string()));
        if node.has_role(NodeRole::ControlPlane) {
            all.children.control_plane.insert(name);
            all.children.k8s_cluster.children.control_plane.insert(name);
        }
        if node.has_role(NodeRole::Worker) {
            all.children.workers.insert(name);
            all.children.k8s_cluster.children.workers.insert(name);
        }
        if node.consensus {
            all.children.etcd.insert(name);
        }
    }
    inventory
}

/// Variables of the storage-server inventory.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StorageVars {
    /// `/etc/exports` lines.
    pub nfs_exports: Vec<String>,
}

/// Body of the storage inventory's `all` group.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StorageAll {
    /// Group variables.
    pub vars: StorageVars,
    /// The storage server.
    pub hosts: BTreeMap<String, HostVars>,
}

/// Inventory consumed by the NFS server playbook.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StorageInventory {
    /// The `all` group.
    pub all: StorageAll,
}

/// Builds the single-host storage-server inventory.
#[must_use]
pub fn build_storage_inventory(endpoint: &StorageEndpoint) -> StorageInventory {
    let mut host = HostVars::for_address(&endpoint.ip.to_string());
    host.ansible_user = Some(String::from("root"));
    StorageInventory {
        all: StorageAll {
            vars: StorageVars {
                nfs_exports: vec![format!("{} {NFS_EXPORT_OPTIONS}", endpoint.base_path)],
            },
            hosts: BTreeMap::from([(NFS_SERVER_HOST.to_owned(), host)]),
        },
    }
}

/// Variables of the GPU driver inventory.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct GpuVars {
    /// Driver branch.
    pub nvidia_driver_branch: String,
    /// Desired package state.
    pub nvidia_driver_package_state: String,
}

/// Body of the GPU inventory's `all` group.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct GpuAll {
    /// Group variables.
    pub vars: GpuVars,
    /// Every node.
    pub hosts: BTreeMap<String, HostVars>,
}

/// Inventory consumed by the GPU driver playbook.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct GpuInventory {
    /// The `all` group.
    pub all: GpuAll,
}

/// Builds the GPU driver inventory covering every node.
#[must_use]
pub fn build_gpu_inventory(nodes: &[Node]) -> GpuInventory {
    GpuInventory {
        all: GpuAll {
            vars: GpuVars {
                nvidia_driver_branch: NVIDIA_DRIVER_BRANCH.to_owned(),
                nvidia_driver_package_state: String::from("present"),
            },
            hosts: nodes
                .iter()
                .map(|node| {
                    (
                        node.name.clone(),
                        HostVars::for_address(&node.ip.to_string()),
                    )
                })
                .collect(),
        },
    }
}

/// One mirror of a containerd registry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RegistryMirrorHost {
    /// Mirror endpoint.
    pub host: String,
    /// Operations served by the mirror.
    pub capabilities: Vec<String>,
    /// Whether TLS verification is skipped.
    pub skip_verify: bool,
}

/// A containerd registry prefix and its mirrors.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RegistryMirrorEntry {
    /// Registry the mirrors stand in for.
    pub prefix: String,
    /// Mirrors tried in order.
    pub mirrors: Vec<RegistryMirrorHost>,
}

/// Kubespray group variables pointing every download at local mirrors.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RegistryMirror {
    /// HTTP package mirror base URL.
    pub http_server: String,
    /// Container registry as `host[:port]`.
    pub registry_host: String,
    /// Binary downloads.
    pub files_repo: String,
    /// Debian-family package mirror.
    pub ubuntu_repo: String,
    /// RHEL-family package mirror.
    pub yum_repo: String,
    /// Override for `registry.k8s.io`.
    pub kube_image_repo: String,
    /// Override for `gcr.io`.
    pub gcr_image_repo: String,
    /// Override for `ghcr.io`.
    pub github_image_repo: String,
    /// Override for `docker.io`.
    pub docker_image_repo: String,
    /// Override for `quay.io`.
    pub quay_image_repo: String,
    /// containerd mirror configuration.
    pub containerd_registries_mirrors: Vec<RegistryMirrorEntry>,
}

/// Builds the registry-mirror fragment. Returns `None` in online mode or
/// when either offline source is unset.
#[must_use]
pub fn build_registry_mirror(
    settings: &EnvironmentSettings,
    mode: InstallationMode,
) -> Option<RegistryMirror> {
    if !mode.is_offline() || !settings.offline.is_complete() {
        return None;
    }
    let registry = settings.offline.registry_address.trim().to_owned();
    let http = settings
        .offline
        .http_mirror_url
        .trim()
        .trim_end_matches('/')
        .to_owned();
    Some(RegistryMirror {
        files_repo: format!("{http}/files"),
        ubuntu_repo: format!("{http}/ubuntu"),
        yum_repo: format!("{http}/rhel"),
        kube_image_repo: registry.clone(),
        gcr_image_repo: registry.clone(),
        github_image_repo: registry.clone(),
        docker_image_repo: registry.clone(),
        quay_image_repo: registry.clone(),
        containerd_registries_mirrors: vec![RegistryMirrorEntry {
            prefix: registry.clone(),
            mirrors: vec![RegistryMirrorHost {
                host: format!("http://{registry}"),
                capabilities: vec![String::from("pull"), String::from("resolve")],
                skip_verify: true,
            }],
        }],
        http_server: http,
        registry_host: registry,
    })
}

/// Platform values plus the optional registry-mirror fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvironmentArtifact {
    /// Values document for helmfile.
    pub values: Value,
    /// Offline registry mirror, present only in complete offline mode.
    pub registry_mirror: Option<RegistryMirror>,
}

/// Merges the stored settings into the values template.
///
/// Keys not set here are kept as they appear in the template, in order.
///
/// # Errors
///
/// Returns [`ArtifactError::Template`] when the template root or its `nfs`
/// or `offline` entries are not mappings.
pub fn build_environment_artifact(
    template_path: &Utf8Path,
    template: Value,
    settings: &EnvironmentSettings,
    mode: InstallationMode,
) -> Result<EnvironmentArtifact, ArtifactError> {
    let template_error = |message: &str| ArtifactError::Template {
        path: template_path.to_path_buf(),
        message: message.to_owned(),
    };

    let mut root = match template {
        Value::Mapping(mapping) => mapping,
        Value::Null => Mapping::new(),
        _ => return Err(template_error("expected a mapping at the document root")),
    };
    root.insert(
        Value::from("externalIP"),
        Value::from(settings.external_address.clone()),
    );

    let nfs = child_mapping(&mut root, "nfs")
        .ok_or_else(|| template_error("'nfs' is not a mapping"))?;
    nfs.insert(Value::from("server"), Value::from(settings.storage.ip.clone()));
    nfs.insert(
        Value::from("basePath"),
        Value::from(settings.storage.base_path.clone()),
    );

    let registry_mirror = build_registry_mirror(settings, mode);
    if let Some(mirror) = &registry_mirror {
        let offline = child_mapping(&mut root, "offline")
            .ok_or_else(|| template_error("'offline' is not a mapping"))?;
        offline.insert(
            Value::from("registry"),
            Value::from(mirror.registry_host.clone()),
        );
        offline.insert(
            Value::from("httpServer"),
            Value::from(mirror.http_server.clone()),
        );
    }

    Ok(EnvironmentArtifact {
        values: Value::Mapping(root),
        registry_mirror,
    })
}

fn child_mapping<'a>(root: &'a mut Mapping, key: &str) -> Option<&'a mut Mapping> {
    let entry = root
        .entry(Value::from(key))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if entry.is_null() {
        *entry = Value::Mapping(Mapping::new());
    }
    entry.as_mapping_mut()
}

/// Paths written by [`ArtifactWriter::write_environment`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvironmentOutput {
    /// Rendered values document.
    pub values: Utf8PathBuf,
    /// Registry-mirror fragment, when one was emitted.
    pub registry_mirror: Option<Utf8PathBuf>,
}

/// Writes artefacts to the locations named in [`SessionConfig`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactWriter {
    cluster_inventory: Utf8PathBuf,
    storage_inventory: Utf8PathBuf,
    gpu_inventory: Utf8PathBuf,
    environment_template: Utf8PathBuf,
    environment_values: Utf8PathBuf,
    offline_vars: Utf8PathBuf,
}

impl ArtifactWriter {
    /// Resolves every artefact path from `config`.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            cluster_inventory: config.resolve(&config.cluster_inventory),
            storage_inventory: config.resolve(&config.storage_inventory),
            gpu_inventory: config.resolve(&config.gpu_inventory),
            environment_template: config.resolve(&config.environment_template),
            environment_values: config.resolve(&config.environment_values),
            offline_vars: config.resolve(&config.offline_vars),
        }
    }

    /// Writes the kubespray inventory.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Persistence`] when the file cannot be written.
    pub fn write_cluster_inventory(&self, nodes: &[Node]) -> Result<Utf8PathBuf, ArtifactError> {
        write_yaml(&self.cluster_inventory, &build_cluster_inventory(nodes))
    }

    /// Writes the storage-server inventory.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Persistence`] when the file cannot be written.
    pub fn write_storage_inventory(
        &self,
        endpoint: &StorageEndpoint,
    ) -> Result<Utf8PathBuf, ArtifactError> {
        write_yaml(&self.storage_inventory, &build_storage_inventory(endpoint))
    }

    /// Writes the GPU driver inventory.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Persistence`] when the file cannot be written.
    pub fn write_gpu_inventory(&self, nodes: &[Node]) -> Result<Utf8PathBuf, ArtifactError> {
        write_yaml(&self.gpu_inventory, &build_gpu_inventory(nodes))
    }

    /// Writes the registry-mirror fragment when one applies.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Persistence`] when the file cannot be written.
    pub fn write_registry_mirror(
        &self,
        settings: &EnvironmentSettings,
        mode: InstallationMode,
    ) -> Result<Option<Utf8PathBuf>, ArtifactError> {
        build_registry_mirror(settings, mode)
            .map(|mirror| write_yaml(&self.offline_vars, &mirror))
            .transpose()
    }

    /// Renders the platform values from the template, plus the
    /// registry-mirror fragment when one applies.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Template`] when the template is missing or
    /// malformed and [`ArtifactError::Persistence`] when a file cannot be
    /// written.
    pub fn write_environment(
        &self,
        settings: &EnvironmentSettings,
        mode: InstallationMode,
    ) -> Result<EnvironmentOutput, ArtifactError> {
        let template_path = &self.environment_template;
        let contents = document::read_required(template_path).map_err(|err| {
            ArtifactError::Template {
                path: template_path.clone(),
                message: err.to_string(),
            }
        })?;
        let template: Value =
            serde_yaml::from_str(&contents).map_err(|err| ArtifactError::Template {
                path: template_path.clone(),
                message: err.to_string(),
            })?;

        let artifact = build_environment_artifact(template_path, template, settings, mode)?;
        let values = write_yaml(&self.environment_values, &artifact.values)?;
        let registry_mirror = artifact
            .registry_mirror
            .map(|mirror| write_yaml(&self.offline_vars, &mirror))
            .transpose()?;
        Ok(EnvironmentOutput {
            values,
            registry_mirror,
        })
    }
}

fn write_yaml<T: Serialize>(path: &Utf8Path, value: &T) -> Result<Utf8PathBuf, ArtifactError> {
    let rendered = document::render_yaml(path, value)?;
    document::write_atomic(path, &rendered)?;
    info!(path = %path, "artefact written");
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests;
