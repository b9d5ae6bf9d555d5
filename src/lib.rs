//! pharma-price-ops - price discovery and analytics for pharmaceutical
//! wholesale data.
//!
//! The crate ingests supplier offers from an upstream marketplace through a
//! hybrid endpoint/browser acquisition layer, normalizes and classifies the
//! products, stores append-only price history with outlier annotations, and
//! serves comparison and procurement analytics over HTTP.

pub mod acquisition;
pub mod analytics;
pub mod api;
pub mod auth;
pub mod browser;
pub mod config;
pub mod domain;
pub mod engine;
pub mod monitor;
pub mod observability;
pub mod scheduler;
pub mod storage;
pub mod upstream;

// Re-export commonly used types
pub use domain::{
    AcquisitionMethod, AcquisitionResult, Alert, CancelToken, Category, CrawlTask, DetailSignals,
    Drug, DrugAggregate, MonitorKind, MonitorRule, Offer, OfferSource, OutlierFlag,
    PharmaOpsError, PriceRecord, ProgressEvent, ProgressPhase, Result, Supplier, TaskStatus,
    WatchListItem,
};

pub use acquisition::{
    AcquireOptions, AcquisitionOrchestrator, IngestPipeline, KeywordIngestor, KeywordReport,
};
pub use analytics::{AnalyticsService, ComparisonView, RecommendationView};
pub use auth::{CachedToken, CredentialBroker, HttpLoginExchange, LoginExchange};
pub use browser::{BrowserHarvester, HarvesterConfig, OfferHarvester};
pub use config::Config;
pub use engine::{classify, Classification, ClassifierInput, IdentityKey};
pub use scheduler::{BatchScheduler, SchedulerConfig};
pub use storage::{
    Database, DatabaseConfig, DrugRepository, MonitorRepository, OutlierAnnotator,
    PriceRepository, SqliteStore, TaskRepository, WatchListRepository,
};
pub use upstream::{TokenBucket, UpstreamApi, UpstreamClient};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
