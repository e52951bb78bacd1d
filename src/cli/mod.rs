use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tokio::sync::watch;
use tracing::info;

use crate::clipboard::x11::X11Display;
use crate::clipboard::ClipboardSelection;
use crate::config::{expand_path, Config};
use crate::daemon;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::transport::{ReconnectionConfig, ReconnectionManager};

#[derive(Parser, Debug)]
#[command(name = "tunclip")]
#[command(about = "Synchronize the X11 clipboard between machines over an SSH-tunnelled socket")]
#[command(version)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("TARGET"),
    ", built ",
    env!("BUILD_DATE"),
    ")"
))]
#[command(group(ArgGroup::new("mode").required(true).args(["server", "client"])))]
pub struct Cli {
    /// Listen on the socket and wait for the client
    #[arg(long)]
    pub server: bool,

    /// Connect to the socket, reconnecting when the link drops
    #[arg(long)]
    pub client: bool,

    /// Unix domain socket path
    #[arg(long, value_name = "PATH")]
    pub socket: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Client,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.server {
            Mode::Server
        } else {
            Mode::Client
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        expand_path(&self.socket)
    }

    /// Default filter directive when `RUST_LOG` is not set.
    pub fn log_filter(&self, config: &Config) -> String {
        let level = if self.verbose {
            "debug"
        } else {
            config.log_level.as_str()
        };
        format!("tunclip={}", level)
    }
}

pub struct CliHandler {
    config: Config,
}

impl CliHandler {
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load(config_path).context("Failed to load configuration")?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the selected mode until the session ends.
    pub async fn run(&self, cli: &Cli) -> Result<SyncOutcome> {
        let selections = ClipboardSelection::tracked(self.config.sync.sync_primary);
        let display = X11Display::open(&selections).context("Failed to open the X display")?;
        let mut engine = SyncEngine::new(display, &self.config.sync);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        daemon::setup_signal_handlers(shutdown_tx)?;

        let socket = cli.socket_path();
        let outcome = match cli.mode() {
            Mode::Server => daemon::run_server(&mut engine, &socket, shutdown_rx).await?,
            Mode::Client => {
                let config = ReconnectionConfig::from(&self.config.reconnect);
                let mut manager = ReconnectionManager::new(socket, config);
                manager.run(&mut engine, shutdown_rx).await?
            }
        };

        info!("Session ended: {:?}", outcome);
        Ok(outcome)
    }
}
