use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use pubfinder::config::{AppConfig, DEFAULT_SETTINGS_PATH};
use pubfinder::crawler::ArxivClient;
use pubfinder::ingest::{IngestReport, IngestionPipeline};
use pubfinder::query::{QueryEngine, QueryRequest};
use pubfinder::server::{self, AppState};
use pubfinder::storage::{Column, SqliteStore};
use pubfinder::utils::{logger, scheduler::TaskScheduler, AppResult};

#[derive(Parser)]
#[command(name = "pubfinder")]
#[command(about = "Index arXiv publication metadata and search it", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write default settings and create the database
    Init,
    /// Fetch the feed once and store every entry
    Ingest,
    /// Run ingestion on the configured cron schedule
    Schedule,
    /// Serve the JSON query endpoints
    Serve,
    /// Query the index from the command line
    Search {
        /// Text matched against title, authors and abstract
        #[arg(short, long, default_value = "")]
        search: String,
        /// Comma-separated category filters
        #[arg(short, long, default_value = "")]
        filter: String,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// List category values present in the index
    Categories {
        #[arg(value_enum, default_value_t = Listing::All)]
        listing: Listing,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Listing {
    /// Every tag from the categories column
    All,
    Primary,
    Predicted,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_logger(cli.verbose);

    match cli.command {
        Commands::Init => init_command().await?,
        Commands::Ingest => ingest_command().await?,
        Commands::Schedule => schedule_command().await?,
        Commands::Serve => serve_command().await?,
        Commands::Search {
            search,
            filter,
            page,
            limit,
        } => search_command(search, filter, page, limit).await?,
        Commands::Categories { listing } => categories_command(listing).await?,
    }

    Ok(())
}

async fn open_store(config: &AppConfig) -> AppResult<SqliteStore> {
    let store = SqliteStore::connect(&config.storage).await?;
    store.init_schema().await?;
    Ok(store)
}

async fn init_command() -> Result<()> {
    info!("initializing");

    tokio::fs::create_dir_all("config").await?;
    let config = AppConfig::default();
    config.save(DEFAULT_SETTINGS_PATH)?;
    info!(path = DEFAULT_SETTINGS_PATH, "default settings written");

    let store = open_store(&config).await?;
    store.close().await;

    info!("next: edit {DEFAULT_SETTINGS_PATH}, then run 'pubfinder ingest'");
    Ok(())
}

async fn run_ingestion(config: &AppConfig, store: &SqliteStore) -> AppResult<IngestReport> {
    let client = ArxivClient::new(&config.feed)?;
    let report = IngestionPipeline::new(&client, store)
        .with_config(&config.ingest)
        .sort(config.feed.sort())
        .run()
        .await?;
    Ok(report)
}

async fn ingest_command() -> Result<()> {
    let config = AppConfig::load()?;
    let store = open_store(&config).await?;

    let outcome = run_ingestion(&config, &store).await;
    store.close().await;

    let report = outcome?;
    info!(
        fetched = report.entries_fetched,
        stored = report.records_written,
        total = report.total_stored,
        "ingestion complete"
    );
    Ok(())
}

async fn schedule_command() -> Result<()> {
    let config = Arc::new(AppConfig::load()?);
    let store = Arc::new(open_store(&config).await?);

    let scheduler = TaskScheduler::new().await?;
    {
        let cron = config.scheduler.cron.clone();
        let config = Arc::clone(&config);
        let store = Arc::clone(&store);
        scheduler
            .add_job(&cron, move || {
                let config = Arc::clone(&config);
                let store = Arc::clone(&store);
                async move {
                    if let Err(err) = run_ingestion(&config, &store).await {
                        error!(error = %err, "scheduled ingestion failed");
                    }
                }
            })
            .await?;
    }
    scheduler.start().await?;

    info!(cron = %config.scheduler.cron, "scheduler running, Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("stop signal received");

    scheduler.shutdown().await?;
    store.close().await;
    Ok(())
}

async fn serve_command() -> Result<()> {
    let config = AppConfig::load()?;
    let store = open_store(&config).await?;

    let state = AppState {
        engine: QueryEngine::new(Arc::new(store.clone()))
            .with_max_page_size(config.server.max_page_size),
        default_page_size: config.server.default_page_size,
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    server::serve(listener, state, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for shutdown signal");
        }
    })
    .await?;

    store.close().await;
    Ok(())
}

async fn search_command(search: String, filter: String, page: u32, limit: Option<u32>) -> Result<()> {
    let config = AppConfig::load()?;
    let store = open_store(&config).await?;
    let engine =
        QueryEngine::new(Arc::new(store.clone())).with_max_page_size(config.server.max_page_size);

    let request = QueryRequest::new(search, page, limit.unwrap_or(config.server.default_page_size))
        .with_filter_list(&filter);
    let outcome = engine.search(&request).await;
    store.close().await;

    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}

async fn categories_command(listing: Listing) -> Result<()> {
    let config = AppConfig::load()?;
    let store = open_store(&config).await?;
    let engine = QueryEngine::new(Arc::new(store.clone()));

    let outcome = match listing {
        Listing::All => engine.categories().await,
        Listing::Primary => engine.distinct(Column::PrimaryCategory).await,
        Listing::Predicted => engine.distinct(Column::PredictedCategory).await,
    };
    store.close().await;

    for value in outcome? {
        println!("{value}");
    }
    Ok(())
}
