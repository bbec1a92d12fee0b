//! End-to-end harvest cycles over faked page and enrichment sources.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use partdex::application::{EnrichmentOrchestrator, HarvestEngine};
use partdex::domain::error::{FetchError, LookupError};
use partdex::domain::model::{
    Category, EnrichmentPayload, PriceOption, RatingSummary, RawRecord,
};
use partdex::domain::ports::{EnrichmentSource, PageSource, RecordExtractor, WaitPolicy};
use partdex::infrastructure::config::{AppConfig, TargetSpec};
use partdex::infrastructure::db::migrate_pool;
use partdex::infrastructure::retry::RetryPolicy;
use partdex::infrastructure::store::PartStore;

struct StaticPages;

#[async_trait]
impl PageSource for StaticPages {
    async fn fetch(&self, url: &str, _policy: &WaitPolicy) -> Result<String, FetchError> {
        if url.contains("page=1") {
            Ok("gpu-5080|RTX 5080|1590000\ngpu-5070|RTX 5070|849000".to_string())
        } else {
            Ok(String::new())
        }
    }
}

struct LineExtractor;

impl RecordExtractor for LineExtractor {
    fn extract_listing(&self, html: &str, _category: Category) -> Vec<RawRecord> {
        html.lines()
            .filter_map(|line| {
                let mut cols = line.split('|');
                Some(RawRecord {
                    canonical_link: format!("https://prod.example/{}", cols.next()?),
                    display_name: cols.next()?.to_string(),
                    price_options: vec![PriceOption::new(cols.next()?.parse().ok()?)],
                    image_url: None,
                    rating: RatingSummary::default(),
                    attributes: BTreeMap::new(),
                })
            })
            .collect()
    }

    fn extract_detail(&self, _html: &str, _category: Category) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

struct CountingBenchmarks {
    lookups: AtomicU32,
}

#[async_trait]
impl EnrichmentSource for CountingBenchmarks {
    fn name(&self) -> &str {
        "benchmarks"
    }

    fn applies_to(&self, category: Category) -> bool {
        category.is_compute()
    }

    async fn lookup(&self, _record: &RawRecord) -> Result<Vec<EnrichmentPayload>, LookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(vec![EnrichmentPayload {
            dedupe_key: "3dmark:default".into(),
            value: r#"{"value":21000.0,"unit":"pts"}"#.into(),
        }])
    }
}

fn gpu_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.harvest.search_url = "fake://search?query={query}&page={page}".into();
    config.harvest.pages_per_category = 3;
    config.harvest.max_concurrent = 2;
    config.harvest.targets = vec![TargetSpec { category: Category::Gpu, query: "gpu".into() }];
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_secs = 1;
    config
}

async fn fresh_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate_pool(&pool).await.unwrap();
    pool
}

fn engine(
    pool: &SqlitePool,
    benchmarks: Arc<CountingBenchmarks>,
) -> HarvestEngine<StaticPages> {
    let store = PartStore::new(pool.clone());
    let retry = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2));
    let sources: Vec<Arc<dyn EnrichmentSource>> = vec![benchmarks];
    let orchestrator = EnrichmentOrchestrator::new(sources, store.clone(), retry);
    HarvestEngine::new(
        gpu_config(),
        Arc::new(StaticPages),
        Arc::new(LineExtractor),
        store,
        Arc::new(orchestrator),
        None,
    )
}

#[tokio::test]
async fn full_cycle_persists_and_enriches_each_part_once() {
    let pool = fresh_pool().await;
    let benchmarks = Arc::new(CountingBenchmarks { lookups: AtomicU32::new(0) });

    let summary = engine(&pool, Arc::clone(&benchmarks)).run().await.unwrap();
    assert_eq!(summary.parts_inserted, 2);
    assert_eq!(summary.items_enriched, 2);
    assert_eq!(summary.enrichment_rows, 2);
    assert_eq!(benchmarks.lookups.load(Ordering::SeqCst), 2);

    let enrichment_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrichment_results")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(enrichment_rows, 2);
}

#[tokio::test]
async fn second_cycle_writes_nothing_and_skips_lookups() {
    let pool = fresh_pool().await;
    let benchmarks = Arc::new(CountingBenchmarks { lookups: AtomicU32::new(0) });

    engine(&pool, Arc::clone(&benchmarks)).run().await.unwrap();
    let second = engine(&pool, Arc::clone(&benchmarks)).run().await.unwrap();

    assert_eq!(second.parts_inserted, 0);
    assert_eq!(second.parts_unchanged, 2);
    assert_eq!(second.enrichment_rows, 0);
    // existing rows still count as an enrichment-complete terminal stage
    assert_eq!(second.items_enriched, 2);
    // existing (part, source) rows suppress the second round of lookups
    assert_eq!(benchmarks.lookups.load(Ordering::SeqCst), 2);

    let parts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM parts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(parts, 2);
}
