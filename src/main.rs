use anyhow::Context;
use api_client::BinanceClient;
use backfill::Backfiller;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use configuration::{load_config, Config};
use core_types::{Instrument, Interval};
use database::{connect, database_url, run_migrations, DbRepository, MemoryRepository};
use database::{OrderStore, PositionStore, TradeStore};
use events::FluxEvent;
use flux::{account_flux, order_flux, position_flux, scheduler, trade_flux};
use flux::{AccountFlux, FluxMetrics, PositionInbox, Remembered};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The main entry point for the FluxSync reconciliation daemon.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets may live in a .env file; it is optional.
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    let _log_guard = configuration::init_tracing(&config.logging)?;

    // Execute the appropriate command
    match cli.command {
        Commands::Run => handle_run(config).await,
        Commands::Backfill(args) => handle_backfill(args, config).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Keeps local trading state reconciled with the exchange.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the account, order, trade and position pipelines until Ctrl-C.
    Run,
    /// Download historical kline data into a TSV file.
    Backfill(BackfillArgs),
}

#[derive(Parser)]
struct BackfillArgs {
    /// The instrument to download data for (e.g., "BTC/USDT").
    #[arg(long)]
    instrument: Instrument,

    /// The interval of the klines (e.g., "1h", "4h", "1d"). Defaults to the configured one.
    #[arg(long)]
    interval: Option<Interval>,

    /// The first day to download (format: YYYY-MM-DD).
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,

    /// The last day to download, inclusive (format: YYYY-MM-DD).
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,

    /// Output directory. Defaults to `backfill.output_dir`.
    #[arg(long)]
    out: Option<PathBuf>,
}

// ==============================================================================
// Run Command Logic
// ==============================================================================

/// What the daemon keeps hold of while the pipelines run.
struct Pipelines {
    handles: Vec<JoinHandle<()>>,
    account: Arc<AccountFlux>,
    metrics: Vec<(&'static str, Arc<FluxMetrics>)>,
    // Held so the position pipeline keeps accepting submissions.
    _inbox: PositionInbox,
}

async fn handle_run(config: Config) -> anyhow::Result<()> {
    let client = Arc::new(BinanceClient::new(&config.exchange)?);
    let (events, _) = broadcast::channel::<FluxEvent>(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipelines = match database_url(&config.database) {
        Some(url) => {
            let pool = connect(&url, &config.database).await?;
            run_migrations(&pool).await?;
            info!("Using the PostgreSQL local store");
            spawn_pipelines(
                Arc::new(DbRepository::new(pool)),
                client,
                &config,
                &events,
                shutdown_rx,
            )
        }
        None => {
            warn!("No database configured, records are kept in memory only");
            spawn_pipelines(
                Arc::new(MemoryRepository::new()),
                client,
                &config,
                &events,
                shutdown_rx,
            )
        }
    };

    let consumer = tokio::spawn(log_events(events.subscribe()));
    info!(pipelines = pipelines.handles.len(), "FluxSync running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for in-flight cycles");
    // Every receiver lives in a scheduler task; a send error means they are all gone already.
    let _ = shutdown_tx.send(true);

    for result in join_all(pipelines.handles).await {
        if let Err(e) = result {
            error!(error = %e, "A scheduler task failed");
        }
    }
    consumer.abort();

    for (name, metrics) in &pipelines.metrics {
        info!(
            flux = name,
            cycles = metrics.cycles(),
            failed = metrics.failed_cycles(),
            published = metrics.published(),
            "Pipeline summary"
        );
    }
    if let Some(snapshot) = pipelines.account.last_known(&config.exchange.account_id) {
        info!(
            account = %snapshot.account_id,
            balances = snapshot.balances.len(),
            positions = snapshot.positions.len(),
            "Last known account snapshot"
        );
    }
    Ok(())
}

fn spawn_pipelines<S>(
    store: Arc<S>,
    client: Arc<BinanceClient>,
    config: &Config,
    events: &broadcast::Sender<FluxEvent>,
    shutdown: watch::Receiver<bool>,
) -> Pipelines
where
    S: OrderStore + TradeStore + PositionStore + 'static,
{
    let intervals = &config.flux;

    let account = Arc::new(
        account_flux(client.clone(), Arc::new(Remembered::new())).with_events(events.clone()),
    );
    let order = Arc::new(
        order_flux(client.clone(), store.clone(), Arc::new(Remembered::new()))
            .with_events(events.clone()),
    );
    let trade = Arc::new(
        trade_flux(client, store.clone(), Arc::new(Remembered::new())).with_events(events.clone()),
    );
    let (inbox, position) = position_flux(store);
    let position = Arc::new(position.with_events(events.clone()));

    let metrics = vec![
        (account.name(), account.metrics()),
        (order.name(), order.metrics()),
        (trade.name(), trade.metrics()),
        (position.name(), position.metrics()),
    ];

    let handles = vec![
        scheduler::spawn(
            account.clone(),
            Duration::from_secs(intervals.account_secs),
            shutdown.clone(),
        ),
        scheduler::spawn(order, Duration::from_secs(intervals.order_secs), shutdown.clone()),
        scheduler::spawn(trade, Duration::from_secs(intervals.trade_secs), shutdown.clone()),
        scheduler::spawn(position, Duration::from_secs(intervals.position_secs), shutdown),
    ];

    Pipelines {
        handles,
        account,
        metrics,
        _inbox: inbox,
    }
}

/// The built-in downstream consumer: logs every change event.
async fn log_events(mut events: broadcast::Receiver<FluxEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match event.to_json() {
                Ok(json) => debug!(entities = event.len(), %json, "Flux event"),
                Err(e) => warn!(error = %e, "Could not encode flux event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event consumer lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ==============================================================================
// Backfill Command Logic
// ==============================================================================

/// Handles the orchestration of the backfill process.
async fn handle_backfill(args: BackfillArgs, config: Config) -> anyhow::Result<()> {
    let client = Arc::new(BinanceClient::new(&config.exchange)?);
    let interval = args.interval.unwrap_or(config.backfill.interval);

    // Set up the progress bar
    let progress_bar = ProgressBar::new(0);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );
    let bar = progress_bar.clone();

    let mut backfiller = Backfiller::new(client, &config.backfill)
        .with_interval(interval)
        .with_progress(move |progress| {
            bar.set_length(progress.total as u64);
            bar.set_position(progress.completed as u64);
            bar.set_message(format!("{} candles in last page", progress.candles));
        });

    if let (Some(from), Some(to)) = (args.from, args.to) {
        let end = to
            .checked_add_days(Days::new(1))
            .context("End date out of range")?;
        backfiller.configure_range(day_start(from), day_start(end))?;
    }

    let out = args.out.unwrap_or_else(|| config.backfill.output_dir.clone());
    info!(
        instrument = %args.instrument,
        interval = %interval,
        out = %out.display(),
        "Starting backfill"
    );

    match backfiller.backfill_to_file(&args.instrument, &out).await? {
        Some(path) => {
            progress_bar.finish_with_message("Backfill complete!");
            info!(path = %path.display(), "History written");
        }
        None => {
            progress_bar.finish_and_clear();
            info!("Nothing written");
        }
    }
    Ok(())
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
