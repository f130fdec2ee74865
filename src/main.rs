use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use scooter_link_lib::commands::{self, SessionPlan};
use scooter_link_lib::config::{AppConfig, CONFIG_FILE_NAME, ConfigSource};
use scooter_link_lib::logging;
use scooter_link_lib::state::AppState;
use scooter_link_lib::utils::default_config_dir;

#[derive(Debug, Parser)]
#[command(name = "scooter-link", version, about = "Scan for, connect to and command a BLE scooter")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List nearby devices
    Scan {
        /// Stop after this many seconds (0 scans until Ctrl+C)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Connect to a device and remember it for `reconnect`
    Connect {
        /// Device address as printed by `scan`
        address: String,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Connect to the last selected device
    Reconnect {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Print the last selected device
    Last,
    /// Write a config file with the default settings
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Command to send once connected (MODE_DRIVE, MODE_SPORT, DIAGNOSTIC); repeatable
    #[arg(long = "send", value_name = "TOKEN")]
    commands: Vec<String>,

    /// Seconds to keep the link open after the last command
    #[arg(long, default_value_t = 1)]
    hold: u64,
}

impl SessionArgs {
    fn plan(self, config: &AppConfig) -> SessionPlan {
        SessionPlan {
            commands: self.commands,
            connect_timeout: Duration::from_secs(
                config.link.connect_timeout_secs + config.link.resolve_timeout_secs,
            ),
            ready_timeout: Duration::from_secs(config.link.resolve_timeout_secs),
            hold: Duration::from_secs(self.hold),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = match &cli.config {
        Some(path) => path.parent().map(PathBuf::from).unwrap_or_default(),
        None => default_config_dir().context("No config directory on this platform")?,
    };
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join(CONFIG_FILE_NAME));
    let (mut config, source) = AppConfig::load_with_source(&config_path).await?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    if let Err(e) = logging::init(logging::parse_level(level)) {
        eprintln!("Failed to initialize logger: {e}");
    }
    info!("Starting scooter-link {}", env!("CARGO_PKG_VERSION"));
    if source == ConfigSource::Defaults {
        warn!(
            "Config file not found at {}, using default.",
            config_path.display()
        );
    }

    if let Command::Init { force } = cli.command {
        return commands::init_config(&config_path, force).await.map(|_| ());
    }

    if let Command::Scan { timeout: Some(secs) } = &cli.command {
        config.scan.timeout_secs = *secs;
    }

    let state = AppState::new(config, &config_dir)
        .await
        .context("Failed to initialize Bluetooth")?;
    let manager = state.manager.clone();

    let outcome = match cli.command {
        Command::Scan { .. } => commands::scan_devices(&manager).await.map(|_| ()),
        Command::Connect { address, session } => {
            let plan = session.plan(&state.config);
            commands::connect_device(&manager, &address, &plan).await.map(|_| ())
        }
        Command::Reconnect { session } => {
            let plan = session.plan(&state.config);
            commands::reconnect(&manager, &plan).await.map(|_| ())
        }
        Command::Last => {
            commands::show_last_device(&manager);
            Ok(())
        }
        Command::Init { .. } => Ok(()),
    };

    manager.shutdown().await;
    outcome
}
