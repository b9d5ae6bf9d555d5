//! Persistence: connection pool, row models, repositories and the outlier
//! annotator.

pub mod database;
pub mod models;
pub mod outliers;
pub mod repository;

pub use database::{Database, DatabaseConfig, PoolStats};
pub use outliers::{compute_annotations, OutlierAnnotator};
pub use repository::{
    DrugFields, DrugFilter, DrugRepository, MonitorRepository, NewAlert, OutlierUpdate,
    PersistOutcome, PriceObservation, PriceRepository, SqliteStore, TaskRepository,
    WatchListRepository,
};
