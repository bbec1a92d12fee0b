//! partdex - PC part price harvester
//!
//! Renders retailer listing pages through a headless browser, extracts part
//! records, and keeps a local catalog current with price-aware upserts and
//! best-effort enrichment from benchmark and review feeds.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{EnrichmentOrchestrator, HarvestEngine, RunSummary};
pub use domain::model::Category;
pub use infrastructure::{AppConfig, Database, PageFetcher};
