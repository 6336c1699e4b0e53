//! fishmanager - Don't Starve Together shard manager
//!
//! With no subcommand opens the dashboard; subcommands talk to the backends
//! directly and exit.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, bail};
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use fishmanager::backend::{Backends, announce_command, sync_shards};
use fishmanager::cli::{Cli, Command, Target};
use fishmanager::config::Config;
use fishmanager::coordinator::Coordinator;
use fishmanager::domain::{UnitAction, WorldStatus};
use fishmanager::events::{EventBus, EventJournal};
use fishmanager::state::StateContainer;
use fishmanager::tui;
use fishmanager::world::{STATUS_COMMAND, parse_world_status};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fishmanager")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("fishmanager.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    let shards = config.shard_names().context("Failed to read shard list")?;
    let backends = config.backends().context("Failed to set up backends")?;
    info!(?shards, "fishmanager loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match &cli.command {
        None => cmd_dashboard(&config, &shards, backends).await,
        Some(Command::List) => cmd_list(&shards, &backends).await,
        Some(Command::Logs { shard, lines, follow }) => {
            check_shard(&shards, shard)?;
            cmd_logs(&backends, shard, *lines, *follow).await
        }
        Some(Command::Cmd { command }) => cmd_console(&config, &backends, &command.join(" ")).await,
        Some(Command::Chat { message }) => {
            cmd_console(&config, &backends, &announce_command(&message.join(" "))).await
        }
        Some(Command::Status) => cmd_status(&config, &backends).await,
        Some(Command::Update) => cmd_update(&config, &backends).await,
        Some(Command::Sync) => cmd_sync(&config, &shards, &backends).await,
        Some(command) => match command.control() {
            Some((action, target)) => cmd_control(&config, &shards, &backends, action, target).await,
            None => bail!("unhandled command {:?}", command),
        },
    }
}

fn check_shard(shards: &[String], shard: &str) -> Result<()> {
    if !shards.iter().any(|s| s == shard) {
        bail!("unknown shard '{}' (configured: {})", shard, shards.join(", "));
    }
    Ok(())
}

async fn cmd_dashboard(config: &Config, shards: &[String], backends: Backends) -> Result<()> {
    debug!("cmd_dashboard: called");
    let container = Arc::new(StateContainer::with_shards(shards));
    let bus = Arc::new(EventBus::new());

    if config.journal {
        let path = EventJournal::default_path()?;
        let journal = EventJournal::open(&path).context("Failed to open event journal")?;
        journal.attach(&bus)?;
        info!(path = %path.display(), "event journal attached");
    }

    let (coordinator, handle) = Coordinator::new(config.coordinator.clone(), container, bus.clone(), backends);
    let coordinator = tokio::spawn(coordinator.run());

    let result = tui::run(handle.clone(), bus).await;

    if let Err(e) = handle.shutdown().await {
        debug!(error = %e, "cmd_dashboard: coordinator already stopped");
    }
    drop(handle);
    if let Err(e) = coordinator.await {
        warn!(error = %e, "coordinator task failed");
    }
    result
}

async fn cmd_list(shards: &[String], backends: &Backends) -> Result<()> {
    debug!("cmd_list: called");
    for shard in shards {
        match backends.process.status(shard).await {
            Ok(status) => {
                let running = if status.running {
                    "running".green()
                } else {
                    "stopped".red()
                };
                let enabled = if status.enabled {
                    "enabled".cyan()
                } else {
                    "disabled".dimmed()
                };
                println!("{:<12} {:<8} {}", shard.bold(), running, enabled);
            }
            Err(e) => println!("{:<12} {}", shard.bold(), format!("error: {}", e).red()),
        }
    }
    Ok(())
}

async fn cmd_control(
    config: &Config,
    shards: &[String],
    backends: &Backends,
    action: UnitAction,
    target: &Target,
) -> Result<()> {
    debug!(?action, ?target, "cmd_control: called");
    let selected: Vec<&String> = match &target.shard {
        Some(shard) => {
            check_shard(shards, shard)?;
            shards.iter().filter(|s| *s == shard).collect()
        }
        None => shards.iter().collect(),
    };

    let mut failed = 0;
    for shard in &selected {
        let result = match timeout(
            config.coordinator.control_timeout(),
            backends.process.control(shard, action),
        )
        .await
        {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", config.coordinator.control_timeout())),
        };
        match result {
            Ok(()) => println!("{} {}", format!("{}:", action.verb()).green(), shard),
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", format!("{} failed:", action.verb()).red(), shard, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} shards failed to {}", failed, selected.len(), action.verb());
    }
    Ok(())
}

async fn cmd_sync(config: &Config, shards: &[String], backends: &Backends) -> Result<()> {
    debug!(?shards, "cmd_sync: called");
    let steps = sync_shards(
        backends.process.as_ref(),
        shards,
        &config.systemd.target,
        config.coordinator.control_timeout(),
    )
    .await;

    let mut failed = 0;
    for step in &steps {
        match &step.result {
            Ok(()) => println!("{} {}", format!("{}:", step.verb()).green(), step.target),
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", format!("{} failed:", step.verb()).red(), step.target, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} sync steps failed", failed, steps.len());
    }
    Ok(())
}

async fn cmd_logs(backends: &Backends, shard: &str, lines: usize, follow: bool) -> Result<()> {
    debug!(%shard, lines, follow, "cmd_logs: called");
    let mut stream = backends
        .logs
        .tail(shard, lines, follow)
        .await
        .with_context(|| format!("Failed to read logs for {}", shard))?;
    while let Some(line) = stream.next().await {
        println!("{}", line?);
    }
    Ok(())
}

async fn cmd_console(config: &Config, backends: &Backends, command: &str) -> Result<()> {
    debug!(%command, "cmd_console: called");
    let shard = &config.coordinator.console_shard;
    let response = backends
        .query
        .query(shard, command, config.coordinator.call_timeout())
        .await
        .with_context(|| format!("Console command failed on {}", shard))?;
    let response = response.trim_end();
    if !response.is_empty() {
        println!("{}", response);
    }
    Ok(())
}

fn print_world(world: &WorldStatus) {
    let mut season = format!("{} day {}", world.season, world.day);
    if let Some(left) = world.days_left {
        season.push_str(&format!(", {} days left", left));
    }
    println!("{} {}", "Season:".bold(), season);
    if let Some(phase) = &world.phase {
        println!("{} {}", "Phase:".bold(), phase);
    }
    println!("{} {}", "Players:".bold(), world.player_count);
    for player in &world.players {
        println!("  {} {}", player.name.green(), format!("({})", player.character).dimmed());
    }
}

async fn cmd_status(config: &Config, backends: &Backends) -> Result<()> {
    debug!("cmd_status: called");
    let shard = &config.coordinator.console_shard;
    let response = backends
        .query
        .query(shard, STATUS_COMMAND, config.coordinator.call_timeout())
        .await
        .with_context(|| format!("Status query failed on {}", shard))?;
    let world = parse_world_status(&response, Utc::now()).context("Could not read world status")?;
    print_world(&world);
    Ok(())
}

async fn cmd_update(config: &Config, backends: &Backends) -> Result<()> {
    debug!("cmd_update: called");
    let mut print = |line: String| println!("{}", line);
    match timeout(config.coordinator.update_timeout(), backends.updater.run(&mut print)).await {
        Ok(result) => result.context("Update failed")?,
        Err(_) => bail!("update timed out after {:?}", config.coordinator.update_timeout()),
    }
    println!("{}", "update finished".green());
    Ok(())
}
