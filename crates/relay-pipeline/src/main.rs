//! Relay pipeline daemon
//!
//! Runs every export and import schedule for the network role named in
//! the environment, or a single pass of one direction with `run-once`.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use relay_common::logging::{init_logging, LogConfig, LogLevel};
use relay_pipeline::config::{NetworkRole, RelayConfig};
use relay_pipeline::consumer::BatchConsumer;
use relay_pipeline::producer::BatchProducer;
use relay_pipeline::scheduler;
use relay_pipeline::store::postgres::{
    RequestExportSource, RequestImportTarget, ResponseExportSource, ResponseImportTarget,
    SettingExportSource, SettingImportTarget, UserExportSource, UserImportTarget,
};
use relay_pipeline::store::{ExportSource, ImportTarget};
use relay_pipeline::types::{BatchType, ExportOutcome};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "relay-pipeline")]
#[command(author, version, about = "Batch file exchange between isolated networks")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every schedule for this network role until terminated
    Run,

    /// Execute one pass of a single direction and exit
    RunOnce {
        /// Whether to export or import
        #[arg(value_enum)]
        direction: Direction,

        /// Which batch type to process
        #[arg(value_parser = parse_batch_type)]
        batch_type: BatchType,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Direction {
    Export,
    Import,
}

fn parse_batch_type(s: &str) -> Result<BatchType, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()?.with_prefix("relay-pipeline");
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    let config = RelayConfig::from_env()?;
    info!(
        network = %config.network,
        data_dir = %config.data_dir.display(),
        max_batch_size = config.max_batch_size,
        "relay pipeline starting"
    );

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;

    match cli.command {
        Command::Run => run_schedules(&config, &pool).await,
        Command::RunOnce {
            direction: Direction::Export,
            batch_type,
        } => run_once_export(&config, &pool, batch_type).await,
        Command::RunOnce {
            direction: Direction::Import,
            batch_type,
        } => run_once_import(&config, &pool, batch_type).await,
    }
}

/// Spawn every schedule for the configured role and wait forever.
async fn run_schedules(config: &RelayConfig, pool: &PgPool) -> Result<()> {
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    for &batch_type in config.network.exports() {
        handles.push(spawn_export(config, pool, batch_type)?);
    }
    for &batch_type in config.network.imports() {
        handles.push(spawn_import(config, pool, batch_type)?);
    }

    info!(schedules = handles.len(), "all schedules running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping schedules");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

fn spawn_export(config: &RelayConfig, pool: &PgPool, batch_type: BatchType) -> Result<JoinHandle<()>> {
    check_direction(config.network, config.network.exports(), batch_type, "export")?;
    let schedule = config.schedule();
    let handle = match batch_type {
        BatchType::Requests => scheduler::spawn_producer(
            producer(config, RequestExportSource::new(pool.clone()), batch_type),
            schedule,
        ),
        BatchType::Responses => scheduler::spawn_producer(
            producer(config, ResponseExportSource::new(pool.clone()), batch_type),
            schedule,
        ),
        BatchType::Users => scheduler::spawn_producer(
            producer(config, UserExportSource::new(pool.clone()), batch_type),
            schedule,
        ),
        BatchType::Settings => scheduler::spawn_producer(
            producer(config, SettingExportSource::new(pool.clone()), batch_type),
            schedule,
        ),
    };
    Ok(handle)
}

fn spawn_import(config: &RelayConfig, pool: &PgPool, batch_type: BatchType) -> Result<JoinHandle<()>> {
    check_direction(config.network, config.network.imports(), batch_type, "import")?;
    let schedule = config.schedule();
    let handle = match batch_type {
        BatchType::Requests => scheduler::spawn_consumer(
            consumer(config, RequestImportTarget::new(pool.clone()), batch_type),
            schedule,
        ),
        BatchType::Responses => scheduler::spawn_consumer(
            consumer(config, ResponseImportTarget::new(pool.clone()), batch_type),
            schedule,
        ),
        BatchType::Users => scheduler::spawn_consumer(
            consumer(config, UserImportTarget::new(pool.clone()), batch_type),
            schedule,
        ),
        BatchType::Settings => scheduler::spawn_consumer(
            consumer(config, SettingImportTarget::new(pool.clone()), batch_type),
            schedule,
        ),
    };
    Ok(handle)
}

async fn run_once_export(config: &RelayConfig, pool: &PgPool, batch_type: BatchType) -> Result<()> {
    check_direction(config.network, config.network.exports(), batch_type, "export")?;
    let outcome = match batch_type {
        BatchType::Requests => {
            producer(config, RequestExportSource::new(pool.clone()), batch_type)
                .run()
                .await?
        }
        BatchType::Responses => {
            producer(config, ResponseExportSource::new(pool.clone()), batch_type)
                .run()
                .await?
        }
        BatchType::Users => {
            producer(config, UserExportSource::new(pool.clone()), batch_type)
                .run()
                .await?
        }
        BatchType::Settings => {
            producer(config, SettingExportSource::new(pool.clone()), batch_type)
                .run()
                .await?
        }
    };

    match outcome {
        ExportOutcome::Noop => info!("nothing to export"),
        ExportOutcome::Exported {
            record_count,
            filename,
            ..
        } => info!(record_count, filename = %filename, "export pass complete"),
    }
    Ok(())
}

async fn run_once_import(config: &RelayConfig, pool: &PgPool, batch_type: BatchType) -> Result<()> {
    check_direction(config.network, config.network.imports(), batch_type, "import")?;
    let summary = match batch_type {
        BatchType::Requests => {
            consumer(config, RequestImportTarget::new(pool.clone()), batch_type)
                .run()
                .await?
        }
        BatchType::Responses => {
            consumer(config, ResponseImportTarget::new(pool.clone()), batch_type)
                .run()
                .await?
        }
        BatchType::Users => {
            consumer(config, UserImportTarget::new(pool.clone()), batch_type)
                .run()
                .await?
        }
        BatchType::Settings => {
            consumer(config, SettingImportTarget::new(pool.clone()), batch_type)
                .run()
                .await?
        }
    };

    info!(
        processed = summary.processed,
        duplicates = summary.duplicates,
        quarantined = summary.quarantined,
        records_applied = summary.records_applied,
        "import pass complete"
    );
    Ok(())
}

fn producer<S: ExportSource>(
    config: &RelayConfig,
    source: S,
    batch_type: BatchType,
) -> BatchProducer<S> {
    BatchProducer::new(source, config.outgoing_dir(batch_type), config.max_batch_size)
        .with_networks(config.network.as_str(), config.network.peer().as_str())
}

fn consumer<T: ImportTarget>(
    config: &RelayConfig,
    target: T,
    batch_type: BatchType,
) -> BatchConsumer<T> {
    BatchConsumer::new(target, config.incoming_dir(batch_type))
}

fn check_direction(
    role: NetworkRole,
    allowed: &[BatchType],
    batch_type: BatchType,
    verb: &str,
) -> Result<()> {
    if !allowed.contains(&batch_type) {
        anyhow::bail!("the {} network does not {} {} batches", role, verb, batch_type);
    }
    Ok(())
}
