//! Composition root: wires the store, upstream client, browser harvester,
//! scheduler and HTTP surface together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use pharma_price_ops::acquisition::{
    AcquireOptions, AcquisitionOrchestrator, IngestPipeline, KeywordIngestor,
};
use pharma_price_ops::analytics::AnalyticsService;
use pharma_price_ops::api::{ApiServer, ApiServerConfig, AppState};
use pharma_price_ops::auth::{CredentialBroker, HttpLoginExchange};
use pharma_price_ops::browser::{BrowserHarvester, HarvesterConfig, OfferHarvester};
use pharma_price_ops::config::{exit_codes, Config};
use pharma_price_ops::domain::{CancelToken, PharmaOpsError, Result};
use pharma_price_ops::monitor::MonitorEvaluator;
use pharma_price_ops::observability::init_tracing;
use pharma_price_ops::scheduler::{BatchScheduler, SchedulerConfig};
use pharma_price_ops::storage::{
    Database, DatabaseConfig, OutlierAnnotator, SqliteStore, TaskRepository,
};
use pharma_price_ops::upstream::{TokenBucket, UpstreamClient};

#[derive(Parser)]
#[command(
    name = "pharma-price-ops",
    version,
    about = "Price discovery and analytics engine for pharmaceutical wholesale data"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "pharma-ops.toml", env = "PHARMA_OPS_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the operator HTTP server
    Serve,
    /// Ingest a single keyword and print the report
    Crawl {
        keyword: String,
        /// Force the browser pass
        #[arg(long)]
        browser: bool,
        /// Endpoint-only, never launch a browser
        #[arg(long, conflicts_with = "browser")]
        quick: bool,
    },
    /// Run every enabled watch-list keyword as one task
    Watch,
    /// Apply migrations and verify the schema
    Migrate,
}

struct Runtime {
    state: AppState,
    broker: Arc<CredentialBroker>,
}

async fn build_runtime(config: &Config) -> Result<Runtime> {
    let db_config = DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.pool_size,
        ..Default::default()
    };
    let database = Database::new(&db_config).await?;
    database.check_schema().await?;
    let store = Arc::new(SqliteStore::new(database));

    let base_url = url::Url::parse(&config.upstream.base_url)
        .map_err(|e| PharmaOpsError::config(format!("bad upstream base URL: {e}")))?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream.request_timeout_secs))
        .user_agent(concat!("pharma-price-ops/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let broker = Arc::new(CredentialBroker::new(
        Arc::new(HttpLoginExchange::new(
            http.clone(),
            base_url.clone(),
            config.upstream.username.clone(),
            config.upstream.password.clone(),
        )),
        config.upstream.token_cache_path.clone(),
    ));

    let limiter = Arc::new(TokenBucket::new(config.upstream.rate_limit_rps));
    let upstream = Arc::new(UpstreamClient::new(
        http,
        base_url.clone(),
        broker.clone(),
        limiter,
    ));

    let harvester: Arc<dyn OfferHarvester> = Arc::new(BrowserHarvester::new(
        HarvesterConfig::new(base_url, config.crawl.browser_concurrency),
    ));

    let orchestrator = AcquisitionOrchestrator::new(upstream, harvester);
    let annotator = Arc::new(OutlierAnnotator::new(store.clone()));
    let monitor = MonitorEvaluator::new(store.clone());
    let ingestor: Arc<dyn KeywordIngestor> = Arc::new(IngestPipeline::new(
        orchestrator,
        store.clone(),
        annotator,
        monitor,
    ));

    let scheduler = Arc::new(BatchScheduler::new(
        ingestor.clone(),
        store.clone(),
        store.clone(),
        SchedulerConfig {
            concurrency: config.crawl.scheduler_concurrency,
            ..SchedulerConfig::default()
        },
    ));

    let analytics = Arc::new(AnalyticsService::new(store.clone()));

    Ok(Runtime {
        state: AppState {
            store,
            ingestor,
            scheduler,
            analytics,
            defaults: config.crawl.clone(),
        },
        broker,
    })
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let runtime = build_runtime(&config).await?;

    match cli.command {
        Command::Serve => {
            // Surface bad credentials before accepting traffic.
            runtime.broker.get().await?;

            let scheduler = runtime.state.scheduler.clone();
            let server = ApiServer::new(
                ApiServerConfig {
                    host: config.api.host.clone(),
                    port: config.api.port,
                    ..Default::default()
                },
                runtime.state,
            );
            let result = server.run().await;
            scheduler.shutdown().await;
            result
        }
        Command::Crawl {
            keyword,
            browser,
            quick,
        } => {
            let opts = AcquireOptions {
                force_browser: browser,
                endpoint_only: quick,
                min_providers: config.crawl.min_providers,
                ..AcquireOptions::default()
            };
            let report = runtime
                .state
                .ingestor
                .ingest_keyword(&keyword, &opts, &CancelToken::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Watch => {
            let opts = AcquireOptions {
                min_providers: config.crawl.min_providers,
                ..AcquireOptions::default()
            };
            let Some(task_id) = runtime.state.scheduler.enqueue_watch_list(opts).await? else {
                info!("watch list is empty, nothing to do");
                return Ok(());
            };

            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                let Some(task) = runtime.state.store.get_task(task_id).await? else {
                    break;
                };
                if task.status.is_terminal() {
                    println!("{}", serde_json::to_string_pretty(&task)?);
                    break;
                }
            }
            Ok(())
        }
        Command::Migrate => {
            // Migrations ran inside build_runtime; report the verified state.
            runtime.state.store.database().check_schema().await?;
            info!("schema up to date");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(exit_codes::CONFIG_ERROR);
        }
    };

    init_tracing(&config.logging.level, config.logging.json);

    if let Err(e) = run(cli, config).await {
        let code = match &e {
            PharmaOpsError::Auth(_) => exit_codes::AUTH_ERROR,
            PharmaOpsError::Config(_) => exit_codes::CONFIG_ERROR,
            PharmaOpsError::Persistence(msg) if msg.contains("schema mismatch") => {
                exit_codes::SCHEMA_MISMATCH
            }
            _ => 1,
        };
        error!("fatal: {}", e);
        eprintln!("error: {e}");
        std::process::exit(code);
    }

    std::process::exit(exit_codes::OK);
}
