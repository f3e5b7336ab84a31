//! Command-line interface definitions for the `astrago-installer` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `astrago-installer` binary.
#[derive(Debug, Parser)]
#[command(
    name = "astrago-installer",
    version,
    about = "Interactive console for bare-metal Kubernetes and Astrago provisioning"
)]
pub(crate) struct Cli {
    /// Directory holding nodes.yaml, nfs-servers.yaml, and environment.yaml.
    ///
    /// Overrides `ASTRAGO_WORK_DIR` and `work_dir` in astrago.toml.
    #[arg(long, global = true, value_name = "DIR")]
    pub(crate) work_dir: Option<String>,
    /// Installation mode, `online` or `offline`.
    ///
    /// Overrides `ASTRAGO_INSTALL_MODE` and `install_mode` in astrago.toml.
    #[arg(long, global = true, value_name = "MODE")]
    pub(crate) mode: Option<String>,
    /// Action to perform; the interactive console when omitted.
    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

/// Subcommands of `astrago-installer`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Open the interactive console.
    #[command(name = "menu", about = "Open the interactive console")]
    Menu,
    /// Print the stored configuration and whether it is complete.
    #[command(
        name = "status",
        about = "Print the stored configuration and whether it is complete"
    )]
    Status(StatusCommand),
    /// Write inventories and platform values without launching anything.
    #[command(
        name = "render",
        about = "Write inventories and platform values without launching anything"
    )]
    Render,
}

/// Arguments for the `astrago-installer status` subcommand.
#[derive(Debug, Args)]
pub(crate) struct StatusCommand {
    /// Print JSON instead of text.
    #[arg(long)]
    pub(crate) json: bool,
}
