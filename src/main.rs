use apfd::apf::{counter, Counter};
use apfd::config;
use apfd::filter::{
    find_ipv4_link_address, ApfFilter, FileInstaller, InterfaceParams, MonotonicClock,
};
use apfd::telemetry::init_logging;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Interval between diagnostic dumps while running
const DUMP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "apfd")]
#[command(about = "Android Packet Filter program manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the filter daemon (SIGUSR1/SIGUSR2 enter/leave doze mode)
    Run {
        /// Path to apfd.toml
        #[arg(short, long, default_value = "apfd.toml")]
        config: PathBuf,
    },
    /// Print packet counters from a firmware data snapshot
    DecodeCounters {
        /// Raw data region read back from firmware
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Only print this counter (e.g. DROPPED_RA)
        #[arg(long)]
        counter: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate apfd.toml
    Validate {
        /// Path to apfd.toml
        #[arg(short, long, default_value = "apfd.toml")]
        config: PathBuf,
    },
    /// Print the configuration with all defaults filled in
    Show {
        /// Path to apfd.toml
        #[arg(short, long, default_value = "apfd.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config { action } => {
            init_logging(None);
            match action {
                ConfigAction::Validate { config } => cmd_config_validate(&config),
                ConfigAction::Show { config } => cmd_config_show(&config),
            }
        }
        Commands::Run { config } => cmd_run(&config),
        Commands::DecodeCounters { snapshot, counter } => {
            init_logging(None);
            cmd_decode_counters(&snapshot, counter.as_deref())
        }
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(config_path: &PathBuf) -> Result<(), String> {
    use tokio::runtime::Runtime;
    use tokio::signal::unix::{signal, SignalKind};

    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;
    init_logging(cfg.logging.as_ref());

    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Validation failed".to_string());
    }

    let mac = config::resolve_mac(&cfg).map_err(|e| format!("Failed to resolve MAC: {}", e))?;
    let addresses =
        config::link_addresses(&cfg).map_err(|e| format!("Invalid link address: {}", e))?;

    let filter = ApfFilter::new(
        cfg.capabilities,
        &cfg.filter,
        InterfaceParams {
            name: cfg.interface.clone(),
            mac,
        },
        Arc::new(FileInstaller::new(cfg.installer.path.clone())),
        Arc::new(MonotonicClock::new()),
    )
    .map_err(|e| format!("Failed to create filter: {}", e))?;
    let filter = Arc::new(filter);

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        info!(
            "apfd starting on {} ({}), {}",
            cfg.interface,
            mac,
            filter.capabilities()
        );

        filter.set_link_properties(find_ipv4_link_address(&addresses));
        filter.start();

        // SIGUSR1 enters doze mode, SIGUSR2 leaves it
        let mut enter_doze = signal(SignalKind::user_defined1())
            .map_err(|e| format!("Failed to install SIGUSR1 handler: {}", e))?;
        let mut leave_doze = signal(SignalKind::user_defined2())
            .map_err(|e| format!("Failed to install SIGUSR2 handler: {}", e))?;

        let mut dump_timer = tokio::time::interval(DUMP_INTERVAL);
        loop {
            tokio::select! {
                _ = dump_timer.tick() => {
                    debug!("APF ({}) state:\n{}", cfg.interface, filter.dump());
                }
                _ = enter_doze.recv() => {
                    info!("APF ({}): entering doze mode", cfg.interface);
                    tokio::task::block_in_place(|| filter.set_doze_mode(true));
                }
                _ = leave_doze.recv() => {
                    info!("APF ({}): leaving doze mode", cfg.interface);
                    tokio::task::block_in_place(|| filter.set_doze_mode(false));
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down...");
                    break;
                }
            }
        }

        filter.shutdown();
        for (name, value) in filter.metrics().export() {
            info!("{} = {}", name, value);
        }
        Ok(())
    })
}

fn cmd_config_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}

fn cmd_config_show(config_path: &PathBuf) -> Result<(), String> {
    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;
    let resolved = config::resolve(&cfg);
    let output = toml::to_string_pretty(&resolved)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    println!(
        "# Resolved from {} - all defaults filled in\n\n{}",
        config_path.display(),
        output
    );
    Ok(())
}

fn cmd_decode_counters(snapshot_path: &PathBuf, name: Option<&str>) -> Result<(), String> {
    let data = std::fs::read(snapshot_path)
        .map_err(|e| format!("Failed to read snapshot: {}", e))?;

    if let Some(name) = name {
        let counter =
            Counter::from_name(name).ok_or_else(|| format!("Unknown counter: {}", name))?;
        let value = counter::decode_counter(&data, counter)
            .ok_or_else(|| format!("{} is outside the {} byte snapshot", counter, data.len()))?;
        println!("{}: {}", counter, value);
        return Ok(());
    }

    let counters = counter::nonzero_counters(&data);
    if counters.is_empty() {
        println!("[INFO] No non-zero counters");
    }
    for (counter, value) in counters {
        println!("{}: {}", counter, value);
    }
    Ok(())
}
