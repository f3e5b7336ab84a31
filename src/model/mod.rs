//! Domain records edited by the operator and persisted by the store.
//!
//! Nodes and the shared-storage endpoint are held as validated, strongly
//! typed values. Their on-disk shape is defined by private record types so the
//! documents stay compatible with the files the provisioning playbooks and
//! earlier installer releases read (`role: "kube-master,kube-node"`,
//! `etcd: "Y"`).

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a DNS label, and therefore of a node name.
pub const MAX_NODE_NAME_LEN: usize = 63;

static NODE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap_or_else(|err| panic!("node name: {err}"))
});
static BASE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:[a-zA-Z0-9_-]+/?)*$").unwrap_or_else(|err| panic!("base path: {err}"))
});
static REGISTRY_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9.-]*[A-Za-z0-9])?(:[0-9]{1,5})?$")
        .unwrap_or_else(|err| panic!("registry address: {err}"))
});
static MIRROR_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[A-Za-z0-9.-]+(:[0-9]{1,5})?(/[^\s]*)?$")
        .unwrap_or_else(|err| panic!("mirror url: {err}"))
});

/// Field-level validation failures. These are recovered locally, usually by
/// re-prompting the operator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// Raised when a node name is not a DNS label.
    #[error(
        "invalid node name '{name}': use lowercase letters, digits and '-', at most 63 characters"
    )]
    InvalidNodeName {
        /// Rejected name.
        name: String,
    },
    /// Raised when an address is not a dotted-quad IPv4 address.
    #[error("invalid IPv4 address '{value}'")]
    InvalidIp {
        /// Rejected address text.
        value: String,
    },
    /// Raised when a node has no role.
    #[error("a node needs at least one role")]
    EmptyRoles,
    /// Raised when a persisted role name is unknown.
    #[error("unknown node role '{value}'")]
    InvalidRole {
        /// Rejected role text.
        value: String,
    },
    /// Raised when a persisted consensus flag is neither `Y` nor `N`.
    #[error("etcd flag must be Y or N, got '{value}'")]
    InvalidConsensusFlag {
        /// Rejected flag text.
        value: String,
    },
    /// Raised when a storage path is not absolute.
    #[error("invalid base path '{path}': expected an absolute path such as /export/astrago")]
    InvalidBasePath {
        /// Rejected path.
        path: String,
    },
    /// Raised when the external address is empty or contains whitespace.
    #[error("invalid external address '{value}'")]
    InvalidExternalAddress {
        /// Rejected address.
        value: String,
    },
    /// Raised when the offline registry is not `host[:port]`.
    #[error("invalid registry address '{value}': expected host[:port]")]
    InvalidRegistryAddress {
        /// Rejected address.
        value: String,
    },
    /// Raised when the offline HTTP mirror is not an http(s) URL.
    #[error("invalid mirror URL '{value}': expected http://host[:port][/path]")]
    InvalidMirrorUrl {
        /// Rejected URL.
        value: String,
    },
    /// Raised when another node already uses the name.
    #[error("node name '{name}' is already in use")]
    DuplicateName {
        /// Conflicting name.
        name: String,
    },
    /// Raised when another node already uses the address.
    #[error("IP address {ip} is already in use")]
    DuplicateIp {
        /// Conflicting address.
        ip: Ipv4Addr,
    },
    /// Raised when an edit targets a node that does not exist.
    #[error("no node at position {index}")]
    UnknownNode {
        /// Requested zero-based position.
        index: usize,
    },
}

/// Role a node plays in the cluster.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum NodeRole {
    /// Runs the control plane (`kube-master` inventory group).
    ControlPlane,
    /// Runs workloads (`kube-node` inventory group).
    Worker,
}

impl NodeRole {
    /// All roles in display order.
    pub const ALL: [Self; 2] = [Self::ControlPlane, Self::Worker];

    /// Inventory group name understood by the kubespray playbooks.
    #[must_use]
    pub const fn inventory_group(self) -> &'static str {
        match self {
            Self::ControlPlane => "kube-master",
            Self::Worker => "kube-node",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.inventory_group())
    }
}

impl FromStr for NodeRole {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "kube-master" | "control-plane" => Ok(Self::ControlPlane),
            "kube-node" | "worker" => Ok(Self::Worker),
            other => Err(ValidationError::InvalidRole {
                value: other.to_owned(),
            }),
        }
    }
}

/// A cluster host.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NodeRecord", into = "NodeRecord")]
pub struct Node {
    /// Cluster-unique DNS label.
    pub name: String,
    /// Address used both to reach the host and inside the cluster.
    pub ip: Ipv4Addr,
    /// Non-empty set of roles.
    pub roles: BTreeSet<NodeRole>,
    /// Whether the node joins the etcd consensus store.
    pub consensus: bool,
}

impl Node {
    /// Builds a node and validates every field.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the name is not a DNS label or the
    /// role set is empty.
    pub fn new(
        name: impl Into<String>,
        ip: Ipv4Addr,
        roles: impl IntoIterator<Item = NodeRole>,
        consensus: bool,
    ) -> Result<Self, ValidationError> {
        let node = Self {
            name: name.into(),
            ip,
            roles: roles.into_iter().collect(),
            consensus,
        };
        node.validate()?;
        Ok(node)
    }

    /// Checks the field-level invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an invalid name or an empty role set.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_node_name(&self.name)?;
        if self.roles.is_empty() {
            return Err(ValidationError::EmptyRoles);
        }
        Ok(())
    }

    /// Returns `true` when the node carries `role`.
    #[must_use]
    pub fn has_role(&self, role: NodeRole) -> bool {
        self.roles.contains(&role)
    }

    /// Comma-joined role list as persisted and shown in tables.
    #[must_use]
    pub fn role_list(&self) -> String {
        join_roles(&self.roles)
    }

    /// `Y`/`N` consensus flag as persisted and shown in tables.
    #[must_use]
    pub const fn consensus_flag(&self) -> &'static str {
        if self.consensus { "Y" } else { "N" }
    }
}

/// Joins roles with commas in their canonical order.
#[must_use]
pub fn join_roles(roles: &BTreeSet<NodeRole>) -> String {
    roles
        .iter()
        .map(|role| role.inventory_group())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct NodeRecord {
    name: String,
    ip: String,
    role: String,
    etcd: String,
}

impl TryFrom<NodeRecord> for Node {
    type Error = ValidationError;

    fn try_from(record: NodeRecord) -> Result<Self, Self::Error> {
        let ip = parse_ipv4(&record.ip)?;
        let roles = record
            .role
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(NodeRole::from_str)
            .collect::<Result<BTreeSet<_>, _>>()?;
        let consensus = match record.etcd.trim() {
            "Y" | "y" => true,
            "N" | "n" => false,
            other => {
                return Err(ValidationError::InvalidConsensusFlag {
                    value: other.to_owned(),
                });
            }
        };
        Self::new(record.name, ip, roles, consensus)
    }
}

impl From<Node> for NodeRecord {
    fn from(node: Node) -> Self {
        Self {
            role: node.role_list(),
            etcd: node.consensus_flag().to_owned(),
            ip: node.ip.to_string(),
            name: node.name,
        }
    }
}

/// Network file-share host and export root shared by the cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageEndpoint {
    /// File server address.
    pub ip: Ipv4Addr,
    /// Absolute export root.
    pub base_path: Utf8PathBuf,
}

impl StorageEndpoint {
    /// Parses and validates both fields.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for a malformed address or a relative
    /// path.
    pub fn parse(ip: &str, base_path: &str) -> Result<Self, ValidationError> {
        let address = parse_ipv4(ip)?;
        validate_base_path(base_path)?;
        Ok(Self {
            ip: address,
            base_path: Utf8PathBuf::from(base_path.trim()),
        })
    }
}

/// On-disk shape of `nfs-servers.yaml`. Empty strings mean "not set".
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub(crate) struct StorageRecord {
    #[serde(default)]
    pub(crate) ip: String,
    #[serde(default)]
    pub(crate) path: String,
}

impl StorageRecord {
    pub(crate) fn into_endpoint(self) -> Result<Option<StorageEndpoint>, ValidationError> {
        if self.ip.trim().is_empty() && self.path.trim().is_empty() {
            return Ok(None);
        }
        StorageEndpoint::parse(&self.ip, &self.path).map(Some)
    }
}

impl From<Option<&StorageEndpoint>> for StorageRecord {
    fn from(endpoint: Option<&StorageEndpoint>) -> Self {
        endpoint.map_or_else(Self::default, |endpoint| Self {
            ip: endpoint.ip.to_string(),
            path: endpoint.base_path.to_string(),
        })
    }
}

/// Platform-wide settings document.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSettings {
    /// Address operators use to reach the platform.
    #[serde(default)]
    pub external_address: String,
    /// Mirror of the shared-storage endpoint.
    #[serde(default)]
    pub storage: StorageSettings,
    /// Air-gapped package and image sources.
    #[serde(default)]
    pub offline: OfflineSettings,
}

/// Storage fields mirrored into [`EnvironmentSettings`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    /// File server address.
    #[serde(default)]
    pub ip: String,
    /// Export root.
    #[serde(default)]
    pub base_path: String,
}

impl From<&StorageEndpoint> for StorageSettings {
    fn from(endpoint: &StorageEndpoint) -> Self {
        Self {
            ip: endpoint.ip.to_string(),
            base_path: endpoint.base_path.to_string(),
        }
    }
}

/// Local mirror settings used in offline mode.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSettings {
    /// Container registry as `host[:port]`.
    #[serde(default)]
    pub registry_address: String,
    /// HTTP package mirror base URL.
    #[serde(default)]
    pub http_mirror_url: String,
}

impl OfflineSettings {
    /// Returns `true` when both mirror sources are set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.registry_address.trim().is_empty() && !self.http_mirror_url.trim().is_empty()
    }
}

/// Validates a node name as a DNS label.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidNodeName`] on mismatch.
pub fn validate_node_name(name: &str) -> Result<(), ValidationError> {
    if name.len() > MAX_NODE_NAME_LEN || !NODE_NAME.is_match(name) {
        return Err(ValidationError::InvalidNodeName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

/// Parses a dotted-quad IPv4 address.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidIp`] when the text is not four octets
/// in `0..=255`.
pub fn parse_ipv4(value: &str) -> Result<Ipv4Addr, ValidationError> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| ValidationError::InvalidIp {
            value: value.to_owned(),
        })
}

/// Validates an absolute export path.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidBasePath`] on mismatch.
pub fn validate_base_path(path: &str) -> Result<(), ValidationError> {
    if BASE_PATH.is_match(path.trim()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidBasePath {
            path: path.to_owned(),
        })
    }
}

/// Validates the externally reachable platform address.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidExternalAddress`] for empty text or
/// text containing whitespace.
pub fn validate_external_address(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidExternalAddress {
            value: value.to_owned(),
        });
    }
    Ok(())
}

/// Validates an offline registry address.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidRegistryAddress`] on mismatch.
pub fn validate_registry_address(value: &str) -> Result<(), ValidationError> {
    if REGISTRY_ADDRESS.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidRegistryAddress {
            value: value.to_owned(),
        })
    }
}

/// Validates an offline HTTP mirror URL.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidMirrorUrl`] on mismatch.
pub fn validate_mirror_url(value: &str) -> Result<(), ValidationError> {
    if MIRROR_URL.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidMirrorUrl {
            value: value.to_owned(),
        })
    }
}
