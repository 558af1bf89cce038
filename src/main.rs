use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pingwarden::config::{Config, Settings};
use pingwarden::notify::NotificationDispatcher;
use pingwarden::scanner::{resolve_targets, SystemNeighborTable};
use pingwarden::scheduler::{self, ScanScheduler, SchedulerContext};
use pingwarden::store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "pingwarden",
    version,
    about = "LAN presence monitor with transition notifications",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file (environment variables used otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scan and ingestion loops until interrupted
    Serve,

    /// Run a single scan tick and exit
    Scan,

    /// Resolve and print the configured target set
    Targets,

    /// Print presence statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;

    match cli.command {
        Commands::Serve => serve(config).await?,
        Commands::Scan => scan_once(config).await?,
        Commands::Targets => targets(config)?,
        Commands::Stats => stats(config)?,
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("pingwarden=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("pingwarden=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

fn build_context(config: &Config) -> Result<SchedulerContext> {
    let store = Arc::new(SqliteStore::open(&config.database.sqlite_path)?);
    Ok(SchedulerContext {
        store,
        neighbors: Arc::new(SystemNeighborTable::new()),
        dispatcher: Arc::new(NotificationDispatcher::default()),
        targets_spec: config.scan.targets.clone(),
    })
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!(targets = %config.scan.targets, "pingwarden starting");

    let ctx = build_context(&config)?;
    let scheduler = ScanScheduler::new(ctx, config.join_timeout());
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping loops");
    scheduler.stop().await;

    Ok(())
}

async fn scan_once(config: Config) -> Result<()> {
    let ctx = build_context(&config)?;
    let settings = Settings::load(&*ctx.store);
    let mut oui = None;

    match scheduler::run_scan_tick(&ctx, &settings, &mut oui).await? {
        Some(run) => {
            println!(
                "scanned {} targets: {} up, {} down",
                run.targets_count, run.up_count, run.down_count
            );
        }
        None => println!("target specification resolved to no addresses"),
    }

    Ok(())
}

fn targets(config: Config) -> Result<()> {
    let store = SqliteStore::open(&config.database.sqlite_path)?;
    let settings = Settings::load(&store);

    for ip in resolve_targets(&config.scan.targets, settings.target_cap) {
        println!("{ip}");
    }

    Ok(())
}

fn stats(config: Config) -> Result<()> {
    let store = SqliteStore::open(&config.database.sqlite_path)?;
    let settings = Settings::load(&store);
    let stats = scheduler::get_scan_stats(&store, &settings)?;

    println!("hosts:   {}", stats.total_hosts);
    println!("up:      {}", stats.up_count);
    println!("down:    {}", stats.down_count);
    println!("missing: {}", stats.missing_count);
    match stats.last_scan_ts {
        Some(ts) => println!("last scan: {ts}"),
        None => println!("last scan: never"),
    }

    Ok(())
}
