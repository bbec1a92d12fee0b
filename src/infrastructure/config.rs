//! Configuration loading.
//!
//! One `AppConfig` value is built at startup from an optional TOML file plus
//! `PARTDEX_`-prefixed environment overrides, and threaded through every
//! component constructor. No component reads ambient state.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::model::{Category, Target};
use crate::domain::ports::WaitPolicy;

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub browser: BrowserConfig,
    pub harvest: HarvestConfig,
    pub retry: RetryConfig,
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlite URL, e.g. `sqlite:data/partdex.db`.
    pub url: String,
    /// Pool size. Keep above `harvest.max_concurrent` so contention shows up
    /// as lock-wait timeouts instead of pool exhaustion.
    pub max_connections: u32,
    /// sqlite busy timeout before a lock wait fails.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/partdex.db".into(),
            max_connections: 10,
            busy_timeout_ms: 4_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Navigation deadline per page fetch.
    pub nav_timeout_secs: u64,
    /// Deadline for the listing ready-selector to appear.
    pub selector_timeout_secs: u64,
    /// Scroll-to-bottom cycles per listing page (lazy-load trigger).
    pub scroll_rounds: u32,
    pub scroll_pause_ms: u64,
    /// Browser process is recycled after this many category batches.
    pub restart_after_categories: u32,
    /// Navigated once after (re)launch; some sources require a warm session.
    pub warmup_url: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            nav_timeout_secs: 20,
            selector_timeout_secs: 10,
            scroll_rounds: 6,
            scroll_pause_ms: 1_500,
            restart_after_categories: 3,
            warmup_url: None,
        }
    }
}

/// One configured category target: the search query used for its listing
/// pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub category: Category,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Listing search URL; `{query}` and `{page}` are substituted.
    pub search_url: String,
    /// Pages harvested per category.
    pub pages_per_category: u32,
    /// Bound on simultaneously in-flight item pipelines. Keep low (2-3) when
    /// enrichment also hits the database.
    pub max_concurrent: usize,
    /// Fetch each item's detail page for its full attribute table.
    pub fetch_details: bool,
    /// Selector that marks a listing page as rendered.
    pub listing_ready_selector: String,
    pub targets: Vec<TargetSpec>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        let targets = Category::ALL
            .into_iter()
            .map(|category| TargetSpec { category, query: category.as_str().to_string() })
            .collect();
        Self {
            search_url: "https://search.example.com/dsearch.php?query={query}&page={page}".into(),
            pages_per_category: 5,
            max_concurrent: 3,
            fetch_details: false,
            listing_ready_selector: "ul.product_list".into(),
            targets,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Backoff cap; `min(base * 2^attempt, cap)`.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 4, base_delay_ms: 1_000, max_delay_secs: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    /// Lookup endpoint; `{query}` is substituted with the encoded part name.
    pub url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { enabled: false, url: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub benchmarks: SourceConfig,
    pub reviews: SourceConfig,
    /// Enrichment is best-effort; it gets a smaller retry budget.
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            benchmarks: SourceConfig::default(),
            reviews: SourceConfig::default(),
            max_attempts: 2,
            request_timeout_secs: 15,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            browser: BrowserConfig::default(),
            harvest: HarvestConfig::default(),
            retry: RetryConfig::default(),
            enrichment: EnrichmentConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from an optional TOML file with environment overrides
    /// (`PARTDEX_DATABASE__URL=...` style).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("partdex").required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("PARTDEX").separator("__"))
            .build()
            .context("failed to assemble configuration")?;
        let cfg: AppConfig =
            settings.try_deserialize().context("failed to deserialize configuration")?;
        Ok(cfg)
    }

    /// Listing URL for one target.
    pub fn listing_url(&self, target: &Target) -> String {
        self.harvest
            .search_url
            .replace("{query}", &urlencoded(&target.page_query))
            .replace("{page}", &target.page_number.to_string())
    }

    /// Targets enumerated for a full run: every configured category crossed
    /// with its page range.
    pub fn targets(&self) -> Vec<Vec<Target>> {
        self.harvest
            .targets
            .iter()
            .map(|spec| {
                (1..=self.harvest.pages_per_category)
                    .map(|page_number| Target {
                        category: spec.category,
                        page_query: spec.query.clone(),
                        page_number,
                    })
                    .collect()
            })
            .collect()
    }

    /// Wait policy applied to listing-page fetches.
    pub fn listing_wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            nav_timeout: Duration::from_secs(self.browser.nav_timeout_secs),
            ready_selector: Some(self.harvest.listing_ready_selector.clone()),
            selector_timeout: Duration::from_secs(self.browser.selector_timeout_secs),
            scroll_rounds: self.browser.scroll_rounds,
            scroll_pause: Duration::from_millis(self.browser.scroll_pause_ms),
        }
    }

    /// Wait policy applied to item detail fetches: no scroll cycles, shorter
    /// readiness wait.
    pub fn detail_wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            nav_timeout: Duration::from_secs(self.browser.nav_timeout_secs),
            ready_selector: None,
            selector_timeout: Duration::from_secs(self.browser.selector_timeout_secs),
            scroll_rounds: 0,
            scroll_pause: Duration::from_millis(self.browser.scroll_pause_ms),
        }
    }
}

fn urlencoded(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}
