//! failover-migrate - copy Redis cluster data when switching traffic
//!
//! Reads the cluster pairs from `configuration.json` (or the file named by
//! `FAILOVER_MIGRATE_CONFIG`) and migrates every key from the cluster being
//! switched away from into the cluster being switched to.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use colored::Colorize;
use tracing::info;

use failover_migrate::config::{Config, LogFormat, LoggingConfig};
use failover_migrate::migration::{
    CleanupStatus, Direction, Orchestrator, PairOutcome, RedisClusterFactory, RunReport,
};

/// failover-migrate - Redis cluster failover migration tool
#[derive(Parser, Debug)]
#[command(name = "failover-migrate")]
#[command(author, version, about = "Migrate Redis cluster data between active and failover")]
struct Cli {
    /// Cluster traffic is being switched to; it becomes the destination
    #[arg(long, value_enum)]
    switching_to: SwitchingTo,

    /// Flush the destination before migrating (default: false)
    #[arg(long)]
    cleanup: bool,
}

/// CLI-friendly direction enum
#[derive(Clone, Copy, Debug, ValueEnum)]
enum SwitchingTo {
    /// Copy failover -> active
    Active,
    /// Copy active -> failover
    Failover,
}

impl From<SwitchingTo> for Direction {
    fn from(arg: SwitchingTo) -> Self {
        match arg {
            SwitchingTo::Active => Direction::Active,
            SwitchingTo::Failover => Direction::Failover,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (config, path) = Config::load()?;
    init_logging(&config.logging);
    info!(config = %path.display(), entries = config.redis.len(), "configuration loaded");

    let direction = Direction::from(cli.switching_to);
    println!(
        "{} Switching to {} ({} entr{}, cleanup: {})",
        "→".cyan().bold(),
        direction.to_string().yellow(),
        config.redis.len(),
        if config.redis.len() == 1 { "y" } else { "ies" },
        cli.cleanup
    );
    println!();

    let factory = Arc::new(RedisClusterFactory::new(config.connection.clone()));
    let report = Orchestrator::new(factory)
        .run(&config.redis, direction, cli.cleanup)
        .await;

    print_report(&report);
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

// ── Report ───────────────────────────────────────────────────────────

fn print_report(report: &RunReport) {
    println!();
    println!("{}", "Migration Summary".bold().underline());

    for pair in &report.pairs {
        let header = format!("  {}. {}", pair.index, pair.pair);
        match &pair.outcome {
            PairOutcome::Skipped { reason } => {
                println!("{} {}", header, "skipped".yellow());
                println!("     {} {}", "→".dimmed(), reason.dimmed());
            }
            PairOutcome::Failed { error } => {
                println!("{} {}", header, "failed".red().bold());
                println!("     {} {}", "✗".red(), error);
            }
            PairOutcome::Migrated(result) => {
                let status = if result.is_complete() {
                    "ok".green()
                } else {
                    "partial".yellow()
                };
                println!("{} {}", header, status);
                println!(
                    "     Keys migrated: {}  Failed: {}  Duration: {}",
                    result.migrated_count,
                    result.failed_count(),
                    format_duration(result.duration)
                );
                for failure in &result.failures {
                    println!(
                        "     {} {}: {}",
                        "✗".red(),
                        failure.key_lossy().bold(),
                        failure.error
                    );
                }
                if let Some(e) = &result.scan_error {
                    println!("     {} scan aborted: {}", "✗".red().bold(), e);
                }
            }
        }
        match &pair.cleanup {
            CleanupStatus::NotRequested => {}
            CleanupStatus::Completed => {
                println!("     {} destination flushed", "✓".green());
            }
            CleanupStatus::Failed(e) => {
                println!("     {} cleanup failed: {}", "⚠".yellow(), e);
            }
        }
    }

    println!();
    let totals = format!(
        "{} keys migrated, {} failed, {} of {} entries skipped",
        report.migrated_keys(),
        report.failed_keys(),
        report.skipped(),
        report.pairs.len()
    );
    if report.all_succeeded() {
        println!("{} {}", "✓".green().bold(), totals.green());
    } else {
        println!("{} {}", "⚠".yellow().bold(), totals.yellow());
    }
    println!("  Run ID: {}", report.run_id.to_string().dimmed());
    println!();
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}
