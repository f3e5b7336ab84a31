//! Binary entry point for the Astrago installer console.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;

use astrago_installer::{
    ConfigError, ConfigStatus, ConfigStore, ConsoleError, CrosstermConsole, InstallationMode,
    LoggingError, PersistenceError, ProcessCommandRunner, Session, SessionConfig, SessionError,
    logging, render_artifacts,
};
use cli::{Cli, Command};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Persistence(#[from] PersistenceError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("terminal error: {0}")]
    Console(#[from] ConsoleError),
    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),
    #[error("failed to write output: {0}")]
    Output(String),
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        Self::Output(err.to_string())
    }
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.work_dir, cli.mode)?;
    match cli.command.unwrap_or(Command::Menu) {
        Command::Menu => run_menu(config),
        Command::Status(args) => print_status(config, args.json, io::stdout().lock()),
        Command::Render => render(config, io::stdout().lock()),
    }
}

fn load_config(work_dir: Option<String>, mode: Option<String>) -> Result<SessionConfig, CliError> {
    let mut config = SessionConfig::load_without_cli_args()?;
    if let Some(dir) = work_dir {
        config.work_dir = dir;
    }
    if let Some(install_mode) = mode {
        config.install_mode = install_mode;
    }
    config.validate()?;
    Ok(config)
}

fn run_menu(config: SessionConfig) -> Result<(), CliError> {
    logging::init(&config.resolve(&config.log_file), &config.log_filter)?;
    let console = CrosstermConsole::open()?;
    let mut session = Session::new(config, ProcessCommandRunner, console)?;
    session.run()?;
    Ok(())
}

fn print_status(config: SessionConfig, json: bool, mut out: impl Write) -> Result<(), CliError> {
    let mode = config.mode()?;
    let anchored = config.anchored()?;
    let store = ConfigStore::load(anchored.state_paths())?;
    let status = store.status();
    if json {
        serde_json::to_writer_pretty(&mut out, &status)
            .map_err(|err| CliError::Output(err.to_string()))?;
        writeln!(out)?;
    } else {
        write_status(&mut out, &status, mode)?;
    }
    Ok(())
}

fn write_status(out: &mut impl Write, status: &ConfigStatus, mode: InstallationMode) -> io::Result<()> {
    let snapshot = &status.snapshot;
    let environment = &snapshot.environment;
    writeln!(out, "Mode: {mode}")?;
    writeln!(
        out,
        "Configured: {}",
        if status.configured { "yes" } else { "no" }
    )?;
    if snapshot.nodes.is_empty() {
        writeln!(out, "Nodes: none")?;
    } else {
        writeln!(out, "Nodes:")?;
        for (index, node) in snapshot.nodes.iter().enumerate() {
            writeln!(
                out,
                "  {}. {} {} {} etcd={}",
                index + 1,
                node.name,
                node.ip,
                node.role_list(),
                node.consensus_flag()
            )?;
        }
    }
    if snapshot.storage.ip.is_empty() {
        writeln!(out, "NFS server: not set")?;
    } else {
        writeln!(
            out,
            "NFS server: {}:{}",
            snapshot.storage.ip, snapshot.storage.base_path
        )?;
    }
    if environment.external_address.is_empty() {
        writeln!(out, "External address: not set")?;
    } else {
        writeln!(out, "External address: {}", environment.external_address)?;
    }
    if mode.is_offline() {
        writeln!(out, "Offline registry: {}", environment.offline.registry_address)?;
        writeln!(out, "Offline HTTP mirror: {}", environment.offline.http_mirror_url)?;
    }
    Ok(())
}

fn render(config: SessionConfig, mut out: impl Write) -> Result<(), CliError> {
    for path in render_artifacts(config)? {
        writeln!(out, "wrote {path}")?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
