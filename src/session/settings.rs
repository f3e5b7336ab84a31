//! Shared-storage and offline mirror settings.

use tracing::info;

use super::{Session, SessionError};
use crate::console::{Console, Style, StyledLine};
use crate::model::{
    OfflineSettings, StorageEndpoint, parse_ipv4, validate_base_path, validate_mirror_url,
    validate_registry_address,
};
use crate::process::CommandRunner;
use crate::prompt::InputField;

pub(super) fn storage_table(endpoint: Option<&StorageEndpoint>) -> Vec<StyledLine> {
    let Some(server) = endpoint else {
        return vec![StyledLine::new(Style::Muted, "NFS server not set.")];
    };
    vec![
        StyledLine::new(Style::Info, format!("{:<17}{}", "IP", "Base Path")),
        StyledLine::new(Style::Plain, format!("{:<17}{}", server.ip, server.base_path)),
    ]
}

pub(super) fn offline_summary(offline: &OfflineSettings) -> Vec<StyledLine> {
    if !offline.is_complete() {
        return vec![StyledLine::new(
            Style::Warning,
            "Offline registry and HTTP mirror are not set.",
        )];
    }
    vec![
        StyledLine::new(
            Style::Plain,
            format!("Registry: {}", offline.registry_address),
        ),
        StyledLine::new(
            Style::Plain,
            format!("HTTP mirror: {}", offline.http_mirror_url),
        ),
    ]
}

impl<R, C> Session<R, C>
where
    R: CommandRunner + 'static,
    C: Console + 'static,
{
    /// Prompts the file-server address and export root, defaulting to the
    /// stored endpoint.
    pub(super) fn set_storage(&mut self) -> Result<(), SessionError> {
        const TITLE: &str = "Setting NFS Server";
        let current = self.store.storage().cloned();

        let mut ip_field = InputField::new(TITLE, "NFS server IP")
            .validator(|value: &str| parse_ipv4(value).map(|_| ()));
        let mut path_field = InputField::new(TITLE, "NFS base path").validator(validate_base_path);
        if let Some(endpoint) = &current {
            ip_field = ip_field.default_value(endpoint.ip.to_string());
            path_field = path_field.default_value(endpoint.base_path.as_str());
        }

        let Some(ip) = ip_field.ask(&mut self.console)?.value() else {
            return Ok(());
        };
        let Some(path) = path_field.ask(&mut self.console)?.value() else {
            return Ok(());
        };
        let endpoint = self.store.set_storage_endpoint(&ip, &path)?;
        info!(ip = %endpoint.ip, path = %endpoint.base_path, "storage endpoint updated");
        Ok(())
    }

    /// Prompts the offline registry and HTTP mirror.
    pub(super) fn offline_settings(&mut self) -> Result<(), SessionError> {
        const TITLE: &str = "Offline Settings";
        let current = self.store.environment().offline.clone();

        let Some(registry) = InputField::new(TITLE, "Registry address (host:port)")
            .default_value(current.registry_address)
            .validator(validate_registry_address)
            .ask(&mut self.console)?
            .value()
        else {
            return Ok(());
        };
        let Some(mirror) = InputField::new(TITLE, "HTTP mirror URL")
            .default_value(current.http_mirror_url)
            .validator(validate_mirror_url)
            .ask(&mut self.console)?
            .value()
        else {
            return Ok(());
        };
        self.store.set_offline_settings(&registry, &mirror)?;
        Ok(())
    }

    pub(super) fn require_storage(&self) -> Result<StorageEndpoint, SessionError> {
        self.store.storage().cloned().ok_or_else(|| {
            SessionError::prerequisite("The NFS server is not set. Use Setting NFS Server first.")
        })
    }

    pub(super) fn require_offline_sources(&self) -> Result<(), SessionError> {
        if self.mode.is_offline() && !self.store.environment().offline.is_complete() {
            return Err(SessionError::prerequisite(
                "Offline mode needs the registry address and HTTP mirror. Set them under Offline Settings.",
            ));
        }
        Ok(())
    }
}
