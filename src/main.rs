use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use partdex::application::{EnrichmentOrchestrator, HarvestEngine};
use partdex::domain::ports::EnrichmentSource;
use partdex::infrastructure::config::AppConfig;
use partdex::infrastructure::db::Database;
use partdex::infrastructure::enrichment_http::{BenchmarkApiSource, ReviewApiSource};
use partdex::infrastructure::extractor::ListingExtractor;
use partdex::infrastructure::fetcher::PageFetcher;
use partdex::infrastructure::logging::init_logging;
use partdex::infrastructure::retry::RetryPolicy;
use partdex::infrastructure::session::BrowserSession;
use partdex::infrastructure::store::PartStore;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;
    info!(
        targets = config.harvest.targets.len(),
        pages = config.harvest.pages_per_category,
        concurrency = config.harvest.max_concurrent,
        "starting harvest"
    );

    let database = Database::connect(&config.database)
        .await
        .context("database connection failed")?;
    database.migrate().await?;
    let store = PartStore::new(database.pool().clone());

    let session = Arc::new(
        BrowserSession::launch(config.browser.clone())
            .await
            .context("browser launch failed")?,
    );
    let fetcher = Arc::new(PageFetcher::new(Arc::clone(&session)));

    let enrichment = build_enrichment(&config, store.clone())?;
    let engine = Arc::new(HarvestEngine::new(
        config,
        fetcher,
        Arc::new(ListingExtractor::default()),
        store,
        Arc::new(enrichment),
        Some(Arc::clone(&session)),
    ));

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight items");
            cancel.cancel();
        }
    });

    let outcome = engine.run().await;
    session.shutdown().await;

    let summary = outcome?;
    println!("{summary}");
    Ok(())
}

fn build_enrichment(config: &AppConfig, store: PartStore) -> Result<EnrichmentOrchestrator> {
    let timeout = Duration::from_secs(config.enrichment.request_timeout_secs);
    let mut sources: Vec<Arc<dyn EnrichmentSource>> = Vec::new();
    if config.enrichment.benchmarks.enabled {
        sources.push(Arc::new(BenchmarkApiSource::new(
            "benchmarks",
            config.enrichment.benchmarks.url.clone(),
            timeout,
        )?));
    }
    if config.enrichment.reviews.enabled {
        sources.push(Arc::new(ReviewApiSource::new(
            "reviews",
            config.enrichment.reviews.url.clone(),
            timeout,
        )?));
    }
    let retry = RetryPolicy::from_config(&config.retry)
        .with_max_attempts(config.enrichment.max_attempts);
    Ok(EnrichmentOrchestrator::new(sources, store, retry))
}
