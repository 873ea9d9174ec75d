use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use hat_battery::battery::{BatteryMonitor, StateStore};
use hat_battery::config::{default_config_path, DaemonConfig};
use hat_battery::daemon::Daemon;
use hat_battery::events::{EventPublisher, JsonLinesEventPublisher, LogEventPublisher};
use hat_battery::logging::{configure_logging, set_debug_flags};
use hat_battery::source::{read_all, SysfsVoltageSource};

#[derive(Parser)]
#[command(name = "hat-battery")]
#[command(about = "Battery monitoring and depletion estimation for the hat", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sampling daemon (default)
    Run,
    /// Take one reading and print the status as JSON without saving state
    ReadOnce,
    /// Print the persisted battery state as JSON
    ShowState,
    /// Delete the persisted battery state
    ResetState,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = DaemonConfig::load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    config.validate().context("Invalid configuration")?;

    configure_logging(
        config.system.log_level,
        config.system.log_file.clone(),
        config.system.console_output,
    )
    .map_err(anyhow::Error::msg)
    .context("Failed to initialize logging")?;
    set_debug_flags(config.system.debug.clone());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, config_path).await,
        Commands::ReadOnce => read_once(config),
        Commands::ShowState => show_state(&config),
        Commands::ResetState => reset_state(&config),
    }
}

async fn run(config: DaemonConfig, config_path: PathBuf) -> Result<()> {
    log::info!("Starting battery monitor (config {})", config_path.display());

    let monitor = BatteryMonitor::new(
        config.battery.clone(),
        &config.paths.state_dir,
        &config.paths.readings_log,
    );
    let source = Arc::new(SysfsVoltageSource::from_paths(&config.paths));
    let publisher: Arc<dyn EventPublisher> = match &config.paths.event_spool {
        Some(path) => Arc::new(JsonLinesEventPublisher::new(path)),
        None => Arc::new(LogEventPublisher),
    };

    let daemon = Arc::new(Daemon::new(config, Some(config_path), monitor, source, publisher));
    daemon.run().await.context("Battery monitor stopped")?;
    Ok(())
}

fn read_once(config: DaemonConfig) -> Result<()> {
    let source = SysfsVoltageSource::from_paths(&config.paths);
    let raw = read_all(&source).context("Failed to read battery voltages")?;

    let mut monitor = BatteryMonitor::read_only(config.battery, &config.paths.state_dir, &config.paths.readings_log);
    let status = monitor.process_reading(raw.hv, raw.lv, raw.rtc);
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn show_state(config: &DaemonConfig) -> Result<()> {
    let store = StateStore::new(&config.paths.state_dir);
    match store.load_state().context("Failed to read battery state")? {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => println!("No battery state at {}", store.path().display()),
    }
    Ok(())
}

fn reset_state(config: &DaemonConfig) -> Result<()> {
    let store = StateStore::new(&config.paths.state_dir);
    if store.delete_state().context("Failed to delete battery state")? {
        println!("Deleted {}", store.path().display());
    } else {
        println!("No battery state at {}", store.path().display());
    }
    Ok(())
}
