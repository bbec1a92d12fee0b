//! Enrichment orchestration.
//!
//! Runs after a part is persisted, outside the upsert transaction, and never
//! fails the harvest of the part: every error here is logged and absorbed.
//! Sources are independent of each other; one source failing or having no
//! data must not block another source's attempt for the same part.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::error::LookupError;
use crate::domain::model::{Category, PartId, RawRecord};
use crate::domain::ports::EnrichmentSource;
use crate::infrastructure::retry::RetryPolicy;
use crate::infrastructure::store::PartStore;

/// What happened across all sources for one part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    /// Sources that performed an external lookup.
    pub attempted: u32,
    /// Sources skipped because `(part, source)` rows already existed.
    pub skipped_existing: u32,
    /// Sources that failed after their retry budget (or had no data).
    pub failed: u32,
    /// Rows actually written.
    pub rows_written: u64,
}

impl EnrichmentReport {
    /// Whether any source was even applicable for this part.
    pub fn touched(&self) -> bool {
        self.attempted > 0 || self.skipped_existing > 0
    }
}

pub struct EnrichmentOrchestrator {
    sources: Vec<Arc<dyn EnrichmentSource>>,
    store: PartStore,
    retry: RetryPolicy,
}

impl EnrichmentOrchestrator {
    /// `retry` should carry a smaller attempt budget than the main pipeline;
    /// enrichment is best-effort.
    pub fn new(
        sources: Vec<Arc<dyn EnrichmentSource>>,
        store: PartStore,
        retry: RetryPolicy,
    ) -> Self {
        Self { sources, store, retry }
    }

    pub fn is_enabled(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Enrich one persisted part from every applicable source.
    pub async fn enrich(
        &self,
        part_id: PartId,
        category: Category,
        record: &RawRecord,
    ) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();

        for source in &self.sources {
            if !source.applies_to(category) {
                continue;
            }
            // Existence check before the expensive external lookup: the
            // (part, source) pair is written at most once.
            match self.store.has_enrichment(part_id, source.name()).await {
                Ok(true) => {
                    debug!(part_id, source = source.name(), "enrichment already present");
                    report.skipped_existing += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(part_id, source = source.name(), error = %e,
                        "enrichment existence check failed");
                    report.failed += 1;
                    continue;
                }
            }

            report.attempted += 1;
            let payloads = self
                .retry
                .run(source.name(), LookupError::retry_class, || {
                    source.lookup(record)
                })
                .await;

            match payloads {
                Ok(payloads) => {
                    let mut written = 0u64;
                    for payload in &payloads {
                        match self.store.insert_enrichment(part_id, source.name(), payload).await {
                            Ok(true) => written += 1,
                            Ok(false) => {}
                            Err(e) => {
                                warn!(part_id, source = source.name(), error = %e,
                                    "enrichment row write failed");
                            }
                        }
                    }
                    info!(part_id, source = source.name(), rows = written, "part enriched");
                    report.rows_written += written;
                }
                Err(LookupError::NotFound) => {
                    debug!(part_id, source = source.name(), "no enrichment data");
                }
                Err(e) => {
                    warn!(part_id, source = source.name(), error = %e, "enrichment lookup failed");
                    report.failed += 1;
                }
            }
        }

        report
    }
}
