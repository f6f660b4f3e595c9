//! `timesync` command-line entry point.
//!
//! Connects to a device over Modbus TCP and either reports its clock or
//! pushes host time to it.

mod report;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use timesync_common::TimeSyncConfig;
use timesync_core::Device;
use timesync_modbus::{ModbusTcpClient, ModbusTcpConfig};
use tracing::{info, warn};

use crate::report::{format_sync_report, format_time_info, to_json, SyncReport};

/// Default system-wide configuration path.
const SYSTEM_CONFIG_PATH: &str = "/etc/timesync/config.toml";

/// Environment variable naming a configuration file.
const CONFIG_PATH_ENV: &str = "TIMESYNC_CONFIG_PATH";

/// timesync command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "timesync",
    about = "Inspect and synchronize Modbus device clocks",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Device address as HOST:PORT (overrides config file).
    #[arg(long, short = 'a', value_name = "HOST:PORT")]
    address: Option<String>,

    /// Modbus unit ID (overrides config file).
    #[arg(long, short = 'u')]
    unit_id: Option<u8>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Read the device clock and compare it with host time.
    Info {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Push host time to the device.
    Sync {
        /// Sync even if the device has not requested it.
        #[arg(long, short = 'f')]
        force: bool,

        /// Repeat until the offset is below this many seconds.
        #[arg(long, short = 't', value_name = "SECONDS")]
        threshold: Option<f64>,

        /// Maximum sync iterations when a threshold is set.
        #[arg(long, short = 'n')]
        max_attempts: Option<u32>,

        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        address = %config.device.address,
        unit_id = config.device.unit_id,
        layout = %config.sync.layout,
        base_address = config.sync.base_address,
        "Configuration loaded"
    );

    let client_config = ModbusTcpConfig::from_device_config(&config.device)
        .context("Invalid device configuration")?;
    let client = ModbusTcpClient::with_config(client_config);
    let mut device =
        Device::from_config(client, &config.sync).context("Failed to set up time sync")?;

    let json = match args.command {
        Command::Info { json } | Command::Sync { json, .. } => json,
    };

    let output = match args.command {
        Command::Info { .. } => {
            let time = device.time_info().context("Failed to read device time")?;
            if json {
                to_json(&time)?
            } else {
                format_time_info(&time)
            }
        }
        Command::Sync { .. } => {
            let result = device
                .sync_time_detailed(
                    config.sync.force,
                    config.sync.threshold,
                    config.sync.max_attempts,
                )
                .context("Time sync failed")?;
            let time = device
                .time_info()
                .context("Failed to read device time after sync")?;
            let report = SyncReport { result, time };
            if json {
                to_json(&report)?
            } else {
                format_sync_report(&report)
            }
        }
    };

    print!("{output}");
    if json {
        println!();
    }
    Ok(())
}

/// Initialize logging with the specified log level.
///
/// Logs go to stderr so command output on stdout stays parseable.
fn init_logging(level: &str) {
    let filter = format!(
        "timesync={level},timesync_core={level},timesync_modbus={level},timesync_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `TIMESYNC_CONFIG_PATH` environment variable
/// 3. `/etc/timesync/config.toml` (system path)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<TimeSyncConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return TimeSyncConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {CONFIG_PATH_ENV}");
            return TimeSyncConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from {CONFIG_PATH_ENV}={env_path}")
            });
        }
        warn!(
            path = %env_path,
            "{CONFIG_PATH_ENV} set but file does not exist, checking other locations"
        );
    }

    let system_path = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return TimeSyncConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {SYSTEM_CONFIG_PATH}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(TimeSyncConfig::default())
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut TimeSyncConfig, args: &Args) {
    if let Some(address) = &args.address {
        config.device.address.clone_from(address);
    }
    if let Some(unit_id) = args.unit_id {
        config.device.unit_id = unit_id;
    }
    if let Command::Sync {
        force,
        threshold,
        max_attempts,
        ..
    } = &args.command
    {
        config.sync.force |= *force;
        if threshold.is_some() {
            config.sync.threshold = *threshold;
        }
        if let Some(max_attempts) = max_attempts {
            config.sync.max_attempts = *max_attempts;
        }
    }
}
