//! Run counters.
//!
//! Shared between item tasks through atomics; the pipeline itself holds no
//! locks across items.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one harvest run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub pages_fetched: AtomicU64,
    pub items_discovered: AtomicU64,
    pub parts_inserted: AtomicU64,
    pub parts_updated: AtomicU64,
    pub parts_unchanged: AtomicU64,
    pub items_skipped: AtomicU64,
    /// Items whose terminal stage was `Persisted` (enrichment disabled).
    pub items_persisted: AtomicU64,
    /// Items that reached `EnrichmentComplete`.
    pub items_enriched: AtomicU64,
    /// Items that reached `EnrichmentSkipped` (no applicable source).
    pub items_enrichment_skipped: AtomicU64,
    pub enrichment_rows: AtomicU64,
    pub enrichment_failures: AtomicU64,
}

impl RunStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            items_discovered: self.items_discovered.load(Ordering::Relaxed),
            parts_inserted: self.parts_inserted.load(Ordering::Relaxed),
            parts_updated: self.parts_updated.load(Ordering::Relaxed),
            parts_unchanged: self.parts_unchanged.load(Ordering::Relaxed),
            items_skipped: self.items_skipped.load(Ordering::Relaxed),
            items_persisted: self.items_persisted.load(Ordering::Relaxed),
            items_enriched: self.items_enriched.load(Ordering::Relaxed),
            items_enrichment_skipped: self.items_enrichment_skipped.load(Ordering::Relaxed),
            enrichment_rows: self.enrichment_rows.load(Ordering::Relaxed),
            enrichment_failures: self.enrichment_failures.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    pub pages_fetched: u64,
    pub items_discovered: u64,
    pub parts_inserted: u64,
    pub parts_updated: u64,
    pub parts_unchanged: u64,
    pub items_skipped: u64,
    pub items_persisted: u64,
    pub items_enriched: u64,
    pub items_enrichment_skipped: u64,
    pub enrichment_rows: u64,
    pub enrichment_failures: u64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pages={} items={} inserted={} updated={} unchanged={} skipped={} \
             persisted={} enriched={} enrichment_skipped={} \
             enrichment_rows={} enrichment_failures={}",
            self.pages_fetched,
            self.items_discovered,
            self.parts_inserted,
            self.parts_updated,
            self.parts_unchanged,
            self.items_skipped,
            self.items_persisted,
            self.items_enriched,
            self.items_enrichment_skipped,
            self.enrichment_rows,
            self.enrichment_failures,
        )
    }
}
