//! Session configuration loading via `ortho-config`.
//!
//! Everything the console needs to know before the first key press lives in
//! [`SessionConfig`]: the installation mode, where operator documents are
//! stored, where provisioning artefacts are written, and which tool binaries
//! to launch. The value is loaded once and passed explicitly to the store and
//! the session; nothing reads the environment after startup.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default installation mode.
pub const DEFAULT_INSTALL_MODE: &str = "online";
/// Default directory for operator documents and relative artefact paths.
pub const DEFAULT_WORK_DIR: &str = ".";
/// Default kubespray checkout, relative to the work directory.
pub const DEFAULT_KUBESPRAY_DIR: &str = "kubespray";
/// Default cluster inventory location.
pub const DEFAULT_CLUSTER_INVENTORY: &str = "kubespray/inventory/mycluster/astrago.yaml";
/// Default offline registry-mirror variables file.
pub const DEFAULT_OFFLINE_VARS: &str = "kubespray/inventory/mycluster/group_vars/all/offline.yml";
/// Default kubeconfig produced by a successful cluster install.
pub const DEFAULT_KUBECONFIG_ARTIFACT: &str = "kubespray/inventory/mycluster/artifacts/admin.conf";
/// Default destination of the copied kubeconfig.
pub const DEFAULT_KUBECONFIG_PATH: &str = "~/.kube/config";
/// Default storage-server inventory location.
pub const DEFAULT_STORAGE_INVENTORY: &str = "/tmp/nfs_inventory";
/// Default GPU driver inventory location.
pub const DEFAULT_GPU_INVENTORY: &str = "/tmp/gpu_inventory";
/// Default platform values template.
pub const DEFAULT_ENVIRONMENT_TEMPLATE: &str = "environments/prod/values.yaml";
/// Default rendered platform values.
pub const DEFAULT_ENVIRONMENT_VALUES: &str = "environments/astrago/values.yaml";
/// Default helmfile environment name.
pub const DEFAULT_HELMFILE_ENVIRONMENT: &str = "astrago";
/// Default log file.
pub const DEFAULT_LOG_FILE: &str = "astrago-installer.log";
/// Default tracing filter directive.
pub const DEFAULT_LOG_FILTER: &str = "info";

const NODES_DOCUMENT: &str = "nodes.yaml";
const STORAGE_DOCUMENT: &str = "nfs-servers.yaml";
const ENVIRONMENT_DOCUMENT: &str = "environment.yaml";

/// Whether packages and images come from the internet or a local mirror.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationMode {
    /// Public package repositories and registries.
    #[default]
    Online,
    /// Local registry and HTTP mirror (air-gapped).
    Offline,
}

impl InstallationMode {
    /// Returns `true` for [`InstallationMode::Offline`].
    #[must_use]
    pub const fn is_offline(self) -> bool {
        matches!(self, Self::Offline)
    }
}

impl fmt::Display for InstallationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Offline => "offline",
        })
    }
}

impl FromStr for InstallationMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "offline" | "airgap" | "air-gapped" => Ok(Self::Offline),
            _ => Err(ConfigError::InvalidMode(value.to_owned())),
        }
    }
}

/// Startup configuration derived from defaults, configuration files, and
/// `ASTRAGO_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ASTRAGO",
    discovery(
        app_name = "astrago",
        env_var = "ASTRAGO_CONFIG_PATH",
        config_file_name = "astrago.toml",
        dotfile_name = ".astrago.toml",
        project_file_name = "astrago.toml"
    )
)]
pub struct SessionConfig {
    /// `online` or `offline`.
    #[ortho_config(default = DEFAULT_INSTALL_MODE.to_owned())]
    pub install_mode: String,
    /// Directory holding operator documents; relative artefact paths resolve
    /// against it too.
    #[ortho_config(default = DEFAULT_WORK_DIR.to_owned())]
    pub work_dir: String,
    /// Kubespray checkout used as the working directory for cluster playbooks.
    #[ortho_config(default = DEFAULT_KUBESPRAY_DIR.to_owned())]
    pub kubespray_dir: String,
    /// Cluster inventory written before cluster playbooks run.
    #[ortho_config(default = DEFAULT_CLUSTER_INVENTORY.to_owned())]
    pub cluster_inventory: String,
    /// Registry-mirror variables written in offline mode.
    #[ortho_config(default = DEFAULT_OFFLINE_VARS.to_owned())]
    pub offline_vars: String,
    /// Kubeconfig produced by kubespray after a successful install.
    #[ortho_config(default = DEFAULT_KUBECONFIG_ARTIFACT.to_owned())]
    pub kubeconfig_artifact: String,
    /// Where the produced kubeconfig is copied. Supports `~/`.
    #[ortho_config(default = DEFAULT_KUBECONFIG_PATH.to_owned())]
    pub kubeconfig_path: String,
    /// Storage-server inventory written before the NFS playbook runs.
    #[ortho_config(default = DEFAULT_STORAGE_INVENTORY.to_owned())]
    pub storage_inventory: String,
    /// GPU inventory written before the driver playbook runs.
    #[ortho_config(default = DEFAULT_GPU_INVENTORY.to_owned())]
    pub gpu_inventory: String,
    /// Platform values template.
    #[ortho_config(default = DEFAULT_ENVIRONMENT_TEMPLATE.to_owned())]
    pub environment_template: String,
    /// Rendered platform values consumed by helmfile.
    #[ortho_config(default = DEFAULT_ENVIRONMENT_VALUES.to_owned())]
    pub environment_values: String,
    /// Helmfile environment selected with `-e`.
    #[ortho_config(default = DEFAULT_HELMFILE_ENVIRONMENT.to_owned())]
    pub helmfile_environment: String,
    /// Path to the `ansible-playbook` executable.
    #[ortho_config(default = "ansible-playbook".to_owned())]
    pub ansible_bin: String,
    /// Path to the `helmfile` executable.
    #[ortho_config(default = "helmfile".to_owned())]
    pub helmfile_bin: String,
    /// Path to the `kubectl` executable.
    #[ortho_config(default = "kubectl".to_owned())]
    pub kubectl_bin: String,
    /// Log file written by the console.
    #[ortho_config(default = DEFAULT_LOG_FILE.to_owned())]
    pub log_file: String,
    /// `tracing` filter directive, for example `info` or `astrago_installer=debug`.
    #[ortho_config(default = DEFAULT_LOG_FILTER.to_owned())]
    pub log_filter: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

/// Locations of the three operator documents.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatePaths {
    /// Ordered node list.
    pub nodes: Utf8PathBuf,
    /// Shared-storage endpoint.
    pub storage: Utf8PathBuf,
    /// Environment settings.
    pub environment: Utf8PathBuf,
}

impl StatePaths {
    /// Places the documents under `dir` with their fixed file names.
    #[must_use]
    pub fn in_dir(dir: &Utf8Path) -> Self {
        Self {
            nodes: dir.join(NODES_DOCUMENT),
            storage: dir.join(STORAGE_DOCUMENT),
            environment: dir.join(ENVIRONMENT_DOCUMENT),
        }
    }
}

impl SessionConfig {
    /// Builds a configuration with every default applied and documents kept
    /// in `work_dir`.
    #[must_use]
    pub fn with_work_dir(work_dir: impl Into<String>) -> Self {
        Self {
            install_mode: DEFAULT_INSTALL_MODE.to_owned(),
            work_dir: work_dir.into(),
            kubespray_dir: DEFAULT_KUBESPRAY_DIR.to_owned(),
            cluster_inventory: DEFAULT_CLUSTER_INVENTORY.to_owned(),
            offline_vars: DEFAULT_OFFLINE_VARS.to_owned(),
            kubeconfig_artifact: DEFAULT_KUBECONFIG_ARTIFACT.to_owned(),
            kubeconfig_path: DEFAULT_KUBECONFIG_PATH.to_owned(),
            storage_inventory: DEFAULT_STORAGE_INVENTORY.to_owned(),
            gpu_inventory: DEFAULT_GPU_INVENTORY.to_owned(),
            environment_template: DEFAULT_ENVIRONMENT_TEMPLATE.to_owned(),
            environment_values: DEFAULT_ENVIRONMENT_VALUES.to_owned(),
            helmfile_environment: DEFAULT_HELMFILE_ENVIRONMENT.to_owned(),
            ansible_bin: String::from("ansible-playbook"),
            helmfile_bin: String::from("helmfile"),
            kubectl_bin: String::from("kubectl"),
            log_file: DEFAULT_LOG_FILE.to_owned(),
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
        }
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("astrago-installer")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Parses the installation mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMode`] for anything other than `online`
    /// or `offline`.
    pub fn mode(&self) -> Result<InstallationMode, ConfigError> {
        self.install_mode.parse()
    }

    /// Resolves a configured path: `~/` expands to the home directory,
    /// absolute paths are kept, and relative paths join the work directory.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Utf8PathBuf {
        let expanded = Utf8PathBuf::from(expand_tilde(path));
        if expanded.is_absolute() {
            expanded
        } else {
            Utf8Path::new(&self.work_dir).join(expanded)
        }
    }

    /// Makes a relative work directory absolute against the process working
    /// directory. Tools run in other directories (kubespray runs in its own
    /// checkout) so every resolved path must be absolute.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WorkDir`] when the current directory cannot be
    /// determined or is not valid UTF-8.
    pub fn anchored(mut self) -> Result<Self, ConfigError> {
        let dir = Utf8PathBuf::from(expand_tilde(&self.work_dir));
        if dir.is_absolute() {
            self.work_dir = dir.into_string();
            return Ok(self);
        }
        let current = std::env::current_dir().map_err(|err| ConfigError::WorkDir(err.to_string()))?;
        let base = Utf8PathBuf::from_path_buf(current).map_err(|path| {
            ConfigError::WorkDir(format!("{} is not valid UTF-8", path.display()))
        })?;
        let joined = if dir.as_str() == "." { base } else { base.join(dir) };
        self.work_dir = joined.into_string();
        Ok(self)
    }

    /// Work directory as a path.
    #[must_use]
    pub fn work_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.work_dir)
    }

    /// Document locations inside the work directory.
    #[must_use]
    pub fn state_paths(&self) -> StatePaths {
        StatePaths::in_dir(Utf8Path::new(&self.work_dir))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidMode`] when the mode is unknown.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.work_dir,
                FieldMetadata::new("work directory", "ASTRAGO_WORK_DIR", "work_dir"),
            ),
            (
                &self.kubespray_dir,
                FieldMetadata::new(
                    "kubespray directory",
                    "ASTRAGO_KUBESPRAY_DIR",
                    "kubespray_dir",
                ),
            ),
            (
                &self.ansible_bin,
                FieldMetadata::new("ansible-playbook binary", "ASTRAGO_ANSIBLE_BIN", "ansible_bin"),
            ),
            (
                &self.helmfile_bin,
                FieldMetadata::new("helmfile binary", "ASTRAGO_HELMFILE_BIN", "helmfile_bin"),
            ),
            (
                &self.kubectl_bin,
                FieldMetadata::new("kubectl binary", "ASTRAGO_KUBECTL_BIN", "kubectl_bin"),
            ),
            (
                &self.helmfile_environment,
                FieldMetadata::new(
                    "helmfile environment",
                    "ASTRAGO_HELMFILE_ENVIRONMENT",
                    "helmfile_environment",
                ),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }
        self.mode()?;
        Ok(())
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to astrago.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// When `HOME` is not set the input is returned unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates an unknown installation mode.
    #[error("unknown installation mode '{0}': use online or offline")]
    InvalidMode(String),
    /// Indicates the work directory cannot be made absolute.
    #[error("cannot resolve work directory: {0}")]
    WorkDir(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
