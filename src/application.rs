//! Application layer: the harvest engine, enrichment orchestration and run
//! statistics.

pub mod enrichment;
pub mod pipeline;
pub mod stats;

pub use enrichment::{EnrichmentOrchestrator, EnrichmentReport};
pub use pipeline::HarvestEngine;
pub use stats::{RunStats, RunSummary};
