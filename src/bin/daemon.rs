//! Visage daemon for background clustering.
//!
//! Polls on an interval and runs the clustering pipeline for every user
//! whose clusters have gone stale. Safe to run alongside other tooling
//! touching the same database: the pipeline takes a cross-process lock and
//! a pass that finds it held exits cleanly.
//!
//! ## Usage
//!
//! ```bash
//! visage-daemon              # Run in foreground
//! visage-daemon --once       # Run one pipeline pass and exit
//! ```

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use visage::error::VisageError;
use visage::runner::tasks::{CreateClustersTask, PurgeStalePersonsTask};
use visage::runner::{ProcessLock, RunContext, TaskPipeline};
use visage::{logging, Config, Database};

/// Daemon configuration
struct DaemonConfig {
    /// Poll interval between pipeline passes (seconds)
    poll_interval: u64,
    /// Run once and exit
    once: bool,
    /// Bypass the staleness gate on every pass
    force: bool,
    /// Config path override
    config_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            once: false,
            force: false,
            config_path: None,
        }
    }
}

fn main() -> Result<()> {
    let daemon_config = parse_args();

    logging::init(None)?;
    info!("Visage daemon starting...");

    let config = match &daemon_config.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Config loaded");

    let db = Database::open(&config.db_path)?;
    db.initialize()?;
    info!("Database opened at {:?}", config.db_path);

    if daemon_config.once {
        info!("Running in single-shot mode");
        run_pass(&db, &config, daemon_config.force)?;
    } else {
        info!(
            "Running in daemon mode, polling every {} seconds",
            daemon_config.poll_interval
        );
        run_daemon_loop(&db, &config, &daemon_config)?;
    }

    info!("Visage daemon stopped");
    Ok(())
}

fn run_daemon_loop(db: &Database, config: &Config, daemon_config: &DaemonConfig) -> Result<()> {
    loop {
        if let Err(e) = run_pass(db, config, daemon_config.force) {
            error!("Pipeline pass failed: {e:#}");
        }
        thread::sleep(Duration::from_secs(daemon_config.poll_interval));
    }
}

/// One full pipeline pass under the global lock.
fn run_pass(db: &Database, config: &Config, force: bool) -> Result<()> {
    let lock = match ProcessLock::acquire(&config.runner.lock_path) {
        Ok(lock) => lock,
        Err(e) => {
            // Another instance holding the lock is a clean skip, not an error
            if let Some(visage_err) = e.downcast_ref::<VisageError>() {
                if visage_err.is_lock_busy() {
                    info!("Another pipeline instance is running, skipping this pass");
                    return Ok(());
                }
            }
            return Err(e);
        }
    };

    let mut pipeline = TaskPipeline::new();
    pipeline.push(Box::new(CreateClustersTask { force }));
    pipeline.push(Box::new(PurgeStalePersonsTask));

    let mut ctx = RunContext::from_config(config);
    let summary = pipeline.run(db, config, &mut ctx);
    info!(summary = %serde_json::to_string(&summary)?, "pipeline pass finished");

    drop(lock);
    Ok(())
}

fn parse_args() -> DaemonConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DaemonConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                config.once = true;
            }
            "--force" | "-f" => {
                config.force = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        config.poll_interval = interval;
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

fn print_help() {
    println!(
        r#"visage-daemon - Background face clustering for Visage

USAGE:
    visage-daemon [OPTIONS]

OPTIONS:
    --once, -1          Run one pipeline pass and exit
    --force, -f         Re-cluster every user, ignoring the staleness gate
    --interval, -i N    Poll interval in seconds (default: 60)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    VISAGE_LOG          Log level (trace, debug, info, warn, error)

Each pass re-clusters the face descriptors of every user whose person
clusters have gone stale, then sweeps persons left without faces. At most
one pipeline instance runs system-wide; concurrent passes skip cleanly.
"#
    );
}
