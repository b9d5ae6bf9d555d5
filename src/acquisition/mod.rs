//! Hybrid acquisition: endpoint-first with browser fallback, plus the
//! keyword ingest pipeline built on top of it.

pub mod ingest;
pub mod orchestrator;

pub use ingest::{IngestPipeline, KeywordIngestor, KeywordReport};
pub use orchestrator::{merge_offers, AcquireOptions, AcquisitionOrchestrator};
