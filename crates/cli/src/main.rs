use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use folio_api::AppState;
use folio_core::*;
use folio_data::{MemoryStore, PgDocumentStore};
use folio_engine::{schedule_snapshots, AssetManager, Scheduler};
use folio_exchanges::{build_client, upbit, ClientConfig, ExchangeSet, SimulatedExchange, UsdtTwdRate};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Crypto portfolio tracker: aggregate exchange balances into daily snapshots")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Settings file (TOML); environment variables override it
    #[arg(short, long, env = "FOLIO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server and the snapshot scheduler
    Server {
        /// Bind address
        #[arg(short, long, default_value = folio_api::DEFAULT_BIND_ADDR)]
        bind: String,

        /// Use an in-memory store and simulated exchanges
        #[arg(long)]
        dry_run: bool,
    },

    /// Collect balances once and write the day's snapshot
    Snapshot {
        /// Hide holdings worth less than this many USDT
        #[arg(long)]
        min_value: Option<Decimal>,

        /// Day to snapshot (YYYY-MM-DD, UTC), priced at that day's close
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Check connectivity of every configured exchange
    Ping,

    /// Symbol mapping file tools
    Mapping {
        #[command(subcommand)]
        command: MappingCommands,
    },
}

#[derive(Subcommand)]
enum MappingCommands {
    /// Build the symbol -> exchange mapping from public market listings
    Build {
        /// Output path (defaults to SYMBOL_MAPPING_PATH)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    // Initialize tracing
    let level = if settings.debug && cli.log_level == "info" {
        "debug"
    } else {
        cli.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match cli.log_format {
        LogFormat::Json => fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).init(),
    }

    match cli.command {
        Commands::Server { bind, dry_run } => run_server(settings, bind, dry_run).await?,
        Commands::Snapshot { min_value, date } => run_snapshot(settings, min_value, date).await?,
        Commands::Ping => run_ping(settings).await?,
        Commands::Mapping { command } => match command {
            MappingCommands::Build { out } => build_mapping(settings, out).await?,
        },
    }

    Ok(())
}

/// Symbol mapper from the configured mapping file; an unreadable file
/// leaves every symbol on its holding exchange.
fn load_mapper(settings: &Settings) -> SymbolMapper {
    let path = &settings.symbol_mapping_path;
    match SymbolMapping::load(path) {
        Ok(mapping) => {
            tracing::info!(path = %path.display(), symbols = mapping.len(), "Loaded symbol mapping");
            SymbolMapper::new(mapping)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Symbol mapping unavailable, using defaults");
            SymbolMapper::default()
        }
    }
}

async fn connect_store(settings: &Settings) -> Result<Arc<dyn SnapshotStore>> {
    let pool = folio_data::connect(
        &settings.database_url,
        settings.database_min_connections,
        settings.database_max_connections,
    )
    .await
    .context("Database connection failed")?;
    let store: Arc<dyn SnapshotStore> = Arc::new(PgDocumentStore::new(pool));
    store.ensure_indexes().await.context("Migration failed")?;
    Ok(store)
}

fn demo_exchanges() -> ExchangeSet {
    ExchangeSet::new()
        .with(Arc::new(SimulatedExchange::demo(ExchangeId::Binance)))
        .with(Arc::new(SimulatedExchange::demo(ExchangeId::Okx)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn run_server(settings: Settings, bind: String, dry_run: bool) -> Result<()> {
    let (store, exchanges): (Arc<dyn SnapshotStore>, ExchangeSet) = if dry_run {
        tracing::info!("Dry run: in-memory store, simulated exchanges");
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
        store.ensure_indexes().await?;
        (store, demo_exchanges())
    } else {
        (connect_store(&settings).await?, ExchangeSet::from_settings(&settings))
    };
    if exchanges.is_empty() {
        tracing::warn!("No exchanges configured; set credentials or POST /update_exchange_settings");
    }

    let manager = Arc::new(AssetManager::new(store, load_mapper(&settings), exchanges));

    let mut scheduler = Scheduler::new();
    schedule_snapshots(
        &mut scheduler,
        manager.clone(),
        settings.snapshot_min_value,
        settings.poll_interval_secs.map(Duration::from_secs),
    );
    let jobs = scheduler.start();

    let fx = UsdtTwdRate::new(&ClientConfig::from_settings(&settings))?;
    let state = Arc::new(AppState::new(manager.clone(), settings, fx));
    let served = folio_api::start_server(state, &bind, shutdown_signal()).await;

    jobs.shutdown().await;
    manager.close().await;
    tracing::info!("Server stopped");
    served
}

/// Epoch ms of the start of `date` in UTC.
fn day_millis(date: NaiveDate) -> i64 {
    date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp_millis()
}

async fn run_snapshot(settings: Settings, min_value: Option<Decimal>, date: Option<NaiveDate>) -> Result<()> {
    let exchanges = ExchangeSet::from_settings(&settings);
    if exchanges.is_empty() {
        anyhow::bail!("No exchanges configured");
    }

    let store = connect_store(&settings).await?;
    let manager = AssetManager::new(store, load_mapper(&settings), exchanges);
    let min_value = min_value.unwrap_or(settings.snapshot_min_value);
    let at = date.map(day_millis);

    tracing::info!(min_value = %min_value, date = ?date, "Running snapshot");
    let snapshot = manager.update_daily_snapshot(None, min_value, at).await;
    manager.close().await;

    let Some(snapshot) = snapshot? else {
        anyhow::bail!("No exchange data collected");
    };
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn run_ping(settings: Settings) -> Result<()> {
    let exchanges = ExchangeSet::from_settings(&settings);
    let Some(results) = exchanges.ping_all().await else {
        println!("No exchanges configured");
        return Ok(());
    };
    exchanges.close_all().await;

    for (name, ok) in &results {
        println!("  {:<10} {}", name, if *ok { "ok" } else { "FAILED" });
    }
    if results.values().any(|ok| !ok) {
        anyhow::bail!("Some exchanges are unreachable");
    }
    Ok(())
}

async fn build_mapping(settings: Settings, out: Option<PathBuf>) -> Result<()> {
    let config = ClientConfig::from_settings(&settings);
    let universe = upbit::fetch_krw_symbols(&config)
        .await
        .context("Failed to fetch Upbit markets")?;
    tracing::info!(symbols = universe.len(), "Fetched Upbit KRW markets");

    // Market listings are public; credentials are used only when present.
    let listings = join_all(ExchangeId::ALL.iter().map(|id| {
        let credentials = settings.exchanges.get(id).cloned().unwrap_or_default();
        let config = &config;
        async move {
            let symbols = match build_client(*id, credentials, config) {
                Ok(client) => client.fetch_quote_symbols().await,
                Err(e) => Err(e),
            };
            (*id, symbols)
        }
    }))
    .await;

    let mut venues = Vec::new();
    for (id, symbols) in listings {
        match symbols {
            Ok(symbols) => {
                tracing::info!(exchange = %id, markets = symbols.len(), "Fetched USDT markets");
                venues.push((id.display_name().to_string(), symbols));
            }
            Err(e) => tracing::warn!(exchange = %id, error = %e, "Failed to fetch markets, skipped"),
        }
    }

    let mapping = SymbolMapping::build(&universe, &venues, upbit::UPBIT);
    let path = out.unwrap_or(settings.symbol_mapping_path);
    mapping
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    for venue in mapping.venues() {
        println!("  {:<10} {}", venue, mapping.symbols_for(venue).len());
    }
    println!("Wrote {} symbols to {}", mapping.len(), path.display());
    Ok(())
}
