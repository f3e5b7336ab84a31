//! Provisioning runs: ansible playbooks, helmfile, and kubectl.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use super::{Session, SessionError};
use crate::console::Console;
use crate::document;
use crate::model::{NodeRole, validate_external_address};
use crate::presenter::{RunStatus, present};
use crate::process::{CommandRunner, Invocation, REDACTED};
use crate::prompt::{InputField, confirm};

const CLUSTER_PLAYBOOK: &str = "cluster.yml";
const RESET_PLAYBOOK: &str = "reset.yml";
const OFFLINE_REPO_PLAYBOOK: &str = "offline-repo.yml";
const STORAGE_PLAYBOOK: &str = "ansible/install-nfs.yml";
const GPU_PLAYBOOK: &str = "ansible/install-gpu-driver.yml";
const FIXED_EXTRA_VARS: &str = "reset_confirmation=yes ansible_ssh_timeout=30";

/// SSH login used for one playbook run. Never stored.
#[derive(Clone, Eq, PartialEq)]
pub(super) struct SshCredentials {
    username: String,
    password: String,
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

impl SshCredentials {
    fn extra_vars(&self) -> String {
        format!(
            "{FIXED_EXTRA_VARS} ansible_user={} ansible_password={} ansible_become_pass={}",
            self.username, self.password, self.password
        )
    }
}

impl<R, C> Session<R, C>
where
    R: CommandRunner + 'static,
    C: Console + 'static,
{
    /// Installs the cluster with kubespray. In offline mode the local
    /// package repositories are prepared first and the install only runs
    /// when that succeeded. A successful install copies the produced
    /// kubeconfig into place.
    pub(super) fn install_kubernetes(&mut self) -> Result<(), SessionError> {
        const TITLE: &str = "Install Kubernetes";
        self.require_cluster_layout()?;
        self.require_offline_sources()?;
        let Some(credentials) =
            self.confirm_with_credentials(TITLE, "Check the Node Table. Install Kubernetes?")?
        else {
            return Ok(());
        };

        let inventory = self.artifacts.write_cluster_inventory(self.store.nodes())?;
        let kubespray = self.config.resolve(&self.config.kubespray_dir);
        if self.mode.is_offline() {
            self.artifacts
                .write_registry_mirror(self.store.environment(), self.mode)?;
            let prepare =
                self.playbook(&inventory, OFFLINE_REPO_PLAYBOOK, kubespray.clone(), &credentials);
            let status = self.launch(TITLE, &prepare)?;
            if !status.is_success() {
                warn!(?status, "offline repository setup failed, skipping cluster install");
                return Ok(());
            }
        }

        let install = self.playbook(&inventory, CLUSTER_PLAYBOOK, kubespray, &credentials);
        if self.launch(TITLE, &install)?.is_success() {
            self.copy_kubeconfig()?;
        }
        Ok(())
    }

    pub(super) fn reset_kubernetes(&mut self) -> Result<(), SessionError> {
        const TITLE: &str = "Reset Kubernetes";
        self.require_nodes()?;
        let Some(credentials) =
            self.confirm_with_credentials(TITLE, "Check the Node Table. Reset Kubernetes?")?
        else {
            return Ok(());
        };
        let inventory = self.artifacts.write_cluster_inventory(self.store.nodes())?;
        let kubespray = self.config.resolve(&self.config.kubespray_dir);
        let reset = self.playbook(&inventory, RESET_PLAYBOOK, kubespray, &credentials);
        self.launch(TITLE, &reset)?;
        Ok(())
    }

    pub(super) fn install_gpu_driver(&mut self) -> Result<(), SessionError> {
        const TITLE: &str = "Install GPU Driver";
        self.require_nodes()?;
        let Some(credentials) = self.confirm_with_credentials(
            TITLE,
            "Install the GPU driver? The nodes will reboot.",
        )?
        else {
            return Ok(());
        };
        let inventory = self.artifacts.write_gpu_inventory(self.store.nodes())?;
        let run = self.playbook(&inventory, GPU_PLAYBOOK, self.config.work_dir(), &credentials);
        self.launch(TITLE, &run)?;
        Ok(())
    }

    pub(super) fn install_storage(&mut self) -> Result<(), SessionError> {
        const TITLE: &str = "Install NFS Server";
        let endpoint = self.require_storage()?;
        let question = format!("Install the NFS server on {}?", endpoint.ip);
        let Some(credentials) = self.confirm_with_credentials(TITLE, &question)? else {
            return Ok(());
        };
        let inventory = self.artifacts.write_storage_inventory(&endpoint)?;
        let run = self.playbook(&inventory, STORAGE_PLAYBOOK, self.config.work_dir(), &credentials);
        self.launch(TITLE, &run)?;
        Ok(())
    }

    /// Stores the external address, renders the platform values, and syncs
    /// the helmfile environment.
    pub(super) fn install_astrago(&mut self) -> Result<(), SessionError> {
        const TITLE: &str = "Install Astrago";
        self.require_storage()?;
        self.require_offline_sources()?;
        let Some(address) = InputField::new(TITLE, "External IP address")
            .default_value(self.store.environment().external_address.clone())
            .validator(validate_external_address)
            .ask(&mut self.console)?
            .value()
        else {
            return Ok(());
        };
        self.store.set_external_address(&address)?;
        if !self.store.status().configured {
            return Err(SessionError::prerequisite(
                "The configuration is incomplete. Add nodes and set the NFS server first.",
            ));
        }

        let output = self
            .artifacts
            .write_environment(self.store.environment(), self.mode)?;
        info!(values = %output.values, "platform values rendered");
        let sync = self.helmfile("sync");
        self.launch(TITLE, &sync)?;
        Ok(())
    }

    pub(super) fn uninstall_astrago(&mut self) -> Result<(), SessionError> {
        const TITLE: &str = "Uninstall Astrago";
        if !confirm(&mut self.console, TITLE, "Uninstall Astrago from the cluster?")? {
            return Ok(());
        }
        let destroy = self.helmfile("destroy");
        self.launch(TITLE, &destroy)?;
        Ok(())
    }

    pub(super) fn cluster_status(&mut self) -> Result<(), SessionError> {
        let invocation = Invocation::new(self.config.kubectl_bin.clone(), self.config.work_dir())
            .args(["get", "nodes", "-o", "wide"]);
        self.launch("Cluster Status", &invocation)?;
        Ok(())
    }

    fn require_cluster_layout(&self) -> Result<(), SessionError> {
        self.require_nodes()?;
        let nodes = self.store.nodes();
        if !nodes.iter().any(|node| node.has_role(NodeRole::ControlPlane)) {
            return Err(SessionError::prerequisite(
                "At least one node needs the kube-master role.",
            ));
        }
        if !nodes.iter().any(|node| node.consensus) {
            return Err(SessionError::prerequisite(
                "At least one node must be an etcd member.",
            ));
        }
        Ok(())
    }

    /// Asks the `[y/N]` question, then the SSH login. `None` when the
    /// operator declines or cancels.
    fn confirm_with_credentials(
        &mut self,
        title: &str,
        question: &str,
    ) -> Result<Option<SshCredentials>, SessionError> {
        if !confirm(&mut self.console, title, question)? {
            info!(action = title, "declined");
            return Ok(None);
        }
        let Some(username) = InputField::new(title, "SSH username")
            .validator(|value: &str| {
                if value.chars().any(char::is_whitespace) {
                    Err("The username cannot contain spaces.")
                } else {
                    Ok(())
                }
            })
            .ask(&mut self.console)?
            .value()
        else {
            return Ok(None);
        };
        let Some(password) = InputField::new(title, "SSH password")
            .masked()
            .ask(&mut self.console)?
            .value()
        else {
            return Ok(None);
        };
        Ok(Some(SshCredentials { username, password }))
    }

    fn playbook(
        &self,
        inventory: &Utf8Path,
        playbook: &str,
        cwd: Utf8PathBuf,
        credentials: &SshCredentials,
    ) -> Invocation {
        Invocation::new(self.config.ansible_bin.clone(), cwd)
            .arg("-i")
            .arg(inventory.as_str())
            .args(["--become", "--become-user=root", playbook, "--extra-vars"])
            .arg(credentials.extra_vars())
            .secret(credentials.password.clone())
    }

    fn helmfile(&self, command: &str) -> Invocation {
        Invocation::new(self.config.helmfile_bin.clone(), self.config.work_dir()).args([
            "-e",
            self.config.helmfile_environment.as_str(),
            command,
        ])
    }

    fn launch(&mut self, title: &str, invocation: &Invocation) -> Result<RunStatus, SessionError> {
        info!(action = title, command = %invocation.display(), "launching");
        let launched = self.runner.launch(invocation);
        Ok(present(&mut self.console, title, launched)?)
    }

    /// Copies the kubeconfig kubespray leaves behind, when there is one.
    fn copy_kubeconfig(&self) -> Result<Option<Utf8PathBuf>, SessionError> {
        let source = self.config.resolve(&self.config.kubeconfig_artifact);
        let Some(contents) = document::read_optional(&source)? else {
            info!(path = %source, "no kubeconfig produced");
            return Ok(None);
        };
        let target = self.config.resolve(&self.config.kubeconfig_path);
        document::write_atomic(&target, &contents).map_err(|err| SessionError::Kubeconfig {
            path: target.clone(),
            message: err.to_string(),
        })?;
        info!(path = %target, "kubeconfig copied");
        Ok(Some(target))
    }
}
