//! Domain types: drugs, price observations, upstream shapes, tasks and errors.

mod drug;
mod error;
mod offer;
mod task;

pub use drug::{
    Alert, Category, CategorySource, Drug, DrugAlias, MonitorKind, MonitorRule, OutlierFlag,
    PriceRecord, WatchListItem,
};
pub use error::{PharmaOpsError, Result};
pub use offer::{
    AcquisitionMethod, AcquisitionResult, DetailSignals, DrugAggregate, Offer, OfferSource,
    Supplier,
};
pub use task::{CancelToken, CrawlTask, ProgressEvent, ProgressPhase, TaskStatus};
