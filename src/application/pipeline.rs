//! The harvest engine: enumerates targets, bounds item concurrency and runs
//! the per-item pipeline.
//!
//! Pages within one category are intentionally serialized (every listing
//! fetch is a full render over the shared browser session); items within a
//! page are parallelized under a counting semaphore. The engine awaits the
//! full batch of items from one page before fetching the next page of the
//! same category.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::application::enrichment::EnrichmentOrchestrator;
use crate::application::stats::{RunStats, RunSummary};
use crate::domain::error::{FetchError, PersistError};
use crate::domain::model::{ItemStage, RawRecord, Target};
use crate::domain::ports::{PageSource, RecordExtractor};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::retry::RetryPolicy;
use crate::infrastructure::session::BrowserSession;
use crate::infrastructure::store::{PartStore, UpsertOutcome};

/// Terminal result of one item task.
enum ItemResult {
    Completed(ItemStage),
    Skipped,
    /// The browser process died under this task; escalate.
    SessionClosed,
    Cancelled,
}

pub struct HarvestEngine<S: PageSource + 'static> {
    config: AppConfig,
    fetcher: Arc<S>,
    extractor: Arc<dyn RecordExtractor>,
    store: PartStore,
    enrichment: Arc<EnrichmentOrchestrator>,
    retry: RetryPolicy,
    /// Present in production wiring; drives the periodic restart. Absent in
    /// tests that fake the page source.
    session: Option<Arc<BrowserSession>>,
    cancel: CancellationToken,
    stats: RunStats,
}

impl<S: PageSource + 'static> HarvestEngine<S> {
    pub fn new(
        config: AppConfig,
        fetcher: Arc<S>,
        extractor: Arc<dyn RecordExtractor>,
        store: PartStore,
        enrichment: Arc<EnrichmentOrchestrator>,
        session: Option<Arc<BrowserSession>>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            config,
            fetcher,
            extractor,
            store,
            enrichment,
            retry,
            session,
            cancel: CancellationToken::new(),
            stats: RunStats::default(),
        }
    }

    /// Token that stops the run; item tasks in flight finish or unwind on it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the full harvest over every configured target. Aborts only when
    /// the browser session itself dies; item-level failures are contained
    /// and counted.
    pub async fn run(&self) -> Result<RunSummary> {
        let semaphore = Semaphore::new(self.config.harvest.max_concurrent);
        let mut categories_done = 0u32;
        let category_groups = self.config.targets();
        let total_categories = category_groups.len();

        for group in category_groups {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(first) = group.first() else { continue };
            info!(category = %first.category, "harvesting category");

            for target in &group {
                if self.cancel.is_cancelled() {
                    break;
                }
                match self.harvest_page(target, &semaphore).await {
                    Ok(true) => {}
                    // Empty page: past the category's last listing page.
                    Ok(false) => break,
                    Err(e) => {
                        self.cancel.cancel();
                        return Err(e).context("browser session lost, run aborted");
                    }
                }
            }

            categories_done += 1;
            if let Some(session) = &self.session {
                let cadence = self.config.browser.restart_after_categories;
                // Recycle only between category batches: no item task is in
                // flight here.
                if cadence > 0
                    && categories_done % cadence == 0
                    && (categories_done as usize) < total_categories
                {
                    session.restart().await.context("browser restart failed")?;
                }
            }
        }

        let summary = self.stats.summary();
        info!(%summary, "harvest run finished");
        Ok(summary)
    }

    /// Harvest one listing page. `Ok(false)` means the page had no items and
    /// the category is exhausted. `Err` only for a dead browser session.
    async fn harvest_page(
        &self,
        target: &Target,
        semaphore: &Semaphore,
    ) -> Result<bool> {
        let url = self.config.listing_url(target);
        let policy = self.config.listing_wait_policy();

        let html = match self
            .retry
            .run("listing-fetch", FetchError::retry_class, || {
                self.fetcher.fetch(&url, &policy)
            })
            .await
        {
            Ok(html) => html,
            Err(FetchError::SessionClosed) => {
                error!(%url, "session closed while fetching listing");
                self.cancel.cancel();
                return Err(anyhow::anyhow!(FetchError::SessionClosed));
            }
            Err(e) => {
                warn!(%url, error = %e, "listing fetch failed, page skipped");
                return Ok(true);
            }
        };
        RunStats::bump(&self.stats.pages_fetched);

        let records = self.extractor.extract_listing(&html, target.category);
        if records.is_empty() {
            debug!(category = %target.category, page = target.page_number,
                "no items on page, category exhausted");
            return Ok(false);
        }
        RunStats::add(&self.stats.items_discovered, records.len() as u64);

        // The cancellation arm is polled first so a session loss observed by
        // one sibling stops queued items before they acquire a permit or
        // issue any work.
        let item_tasks = records.into_iter().map(|record| async move {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => ItemResult::Cancelled,
                result = async {
                    let _permit =
                        semaphore.acquire().await.expect("semaphore never closed");
                    self.process_item(target, record).await
                } => result,
            }
        });

        // Fan-in: every item of this page finishes before the next page.
        let mut session_closed = false;
        for result in futures::future::join_all(item_tasks).await {
            match result {
                ItemResult::SessionClosed => session_closed = true,
                ItemResult::Skipped => RunStats::bump(&self.stats.items_skipped),
                ItemResult::Completed(ItemStage::Persisted) => {
                    RunStats::bump(&self.stats.items_persisted);
                }
                ItemResult::Completed(ItemStage::EnrichmentComplete) => {
                    RunStats::bump(&self.stats.items_enriched);
                }
                ItemResult::Completed(ItemStage::EnrichmentSkipped) => {
                    RunStats::bump(&self.stats.items_enrichment_skipped);
                }
                ItemResult::Completed(_) | ItemResult::Cancelled => {}
            }
        }

        if session_closed {
            return Err(anyhow::anyhow!(FetchError::SessionClosed));
        }
        Ok(true)
    }

    fn advance(stage: &mut ItemStage, next: ItemStage, link: &str) {
        trace!(link, from = ?stage, to = ?next, "item stage");
        *stage = next;
    }

    /// Per-item pipeline: optional detail fetch, upsert under retry, then
    /// best-effort enrichment. Failures here never touch sibling items; a
    /// dead session cancels the run at the point it is observed.
    async fn process_item(&self, target: &Target, mut record: RawRecord) -> ItemResult {
        let mut stage = ItemStage::Discovered;

        if self.config.harvest.fetch_details {
            let policy = self.config.detail_wait_policy();
            let detail = self
                .retry
                .run("detail-fetch", FetchError::retry_class, || {
                    self.fetcher.fetch(&record.canonical_link, &policy)
                })
                .await;
            match detail {
                Ok(html) => {
                    Self::advance(&mut stage, ItemStage::Fetched, &record.canonical_link);
                    let attributes = self.extractor.extract_detail(&html, target.category);
                    record.attributes.extend(attributes);
                }
                Err(FetchError::SessionClosed) => {
                    self.cancel.cancel();
                    return ItemResult::SessionClosed;
                }
                Err(e) => {
                    // Listing data is still worth persisting.
                    warn!(link = %record.canonical_link, error = %e,
                        "detail fetch failed, persisting listing data only");
                }
            }
        } else {
            // The listing render already supplied this item's markup.
            Self::advance(&mut stage, ItemStage::Fetched, &record.canonical_link);
        }
        Self::advance(&mut stage, ItemStage::Extracted, &record.canonical_link);

        let recycle_store = self.store.clone();
        let recycle = move || {
            let store = recycle_store.clone();
            Box::pin(async move { store.recycle().await })
                as futures::future::BoxFuture<'static, ()>
        };
        let mut upsert_op = || self.store.upsert(&record, target.category);
        let upserts = self
            .retry
            .run_with_recycle(
                "part-upsert",
                PersistError::retry_class,
                Some(&recycle),
                &mut upsert_op,
            )
            .await;

        let upserts = match upserts {
            Ok(upserts) => upserts,
            Err(PersistError::ConstraintViolation(msg)) => {
                warn!(link = %record.canonical_link, %msg, "constraint violation, item skipped");
                return ItemResult::Skipped;
            }
            Err(e) => {
                warn!(link = %record.canonical_link, error = %e, "upsert failed, item skipped");
                return ItemResult::Skipped;
            }
        };

        for upsert in &upserts {
            match upsert.outcome {
                UpsertOutcome::Inserted => RunStats::bump(&self.stats.parts_inserted),
                UpsertOutcome::PriceChanged { .. } => RunStats::bump(&self.stats.parts_updated),
                UpsertOutcome::Unchanged => RunStats::bump(&self.stats.parts_unchanged),
            }
        }
        Self::advance(&mut stage, ItemStage::Persisted, &record.canonical_link);

        if self.enrichment.is_enabled() {
            Self::advance(&mut stage, ItemStage::EnrichmentPending, &record.canonical_link);
            let mut touched = false;
            for upsert in &upserts {
                let report = self
                    .enrichment
                    .enrich(upsert.part_id, target.category, &record)
                    .await;
                touched |= report.touched();
                RunStats::add(&self.stats.enrichment_rows, report.rows_written);
                RunStats::add(&self.stats.enrichment_failures, u64::from(report.failed));
            }
            let terminal = if touched {
                ItemStage::EnrichmentComplete
            } else {
                ItemStage::EnrichmentSkipped
            };
            Self::advance(&mut stage, terminal, &record.canonical_link);
        }

        debug_assert!(stage.is_terminal());
        debug!(link = %record.canonical_link, ?stage, "item finished");
        ItemResult::Completed(stage)
    }
}
