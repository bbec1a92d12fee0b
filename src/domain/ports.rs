//! Collaborator ports.
//!
//! The pipeline only depends on these traits; production wiring lives in the
//! infrastructure layer and tests substitute instrumented fakes.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::error::{FetchError, LookupError};
use crate::domain::model::{Category, EnrichmentPayload, RawRecord};

/// How long a fetch waits for the page to become usable before giving up.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// Deadline for the navigation itself.
    pub nav_timeout: std::time::Duration,
    /// Selector whose appearance marks the page as ready, if any.
    pub ready_selector: Option<String>,
    /// Deadline for the ready selector to appear after navigation.
    pub selector_timeout: std::time::Duration,
    /// Number of scroll-to-bottom cycles used to trigger lazy-loaded content.
    pub scroll_rounds: u32,
    /// Pause between scroll cycles.
    pub scroll_pause: std::time::Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            nav_timeout: std::time::Duration::from_secs(20),
            ready_selector: None,
            selector_timeout: std::time::Duration::from_secs(10),
            scroll_rounds: 0,
            scroll_pause: std::time::Duration::from_millis(1500),
        }
    }
}

/// Source of rendered page markup. Implemented by the browser-backed fetcher;
/// each call consumes one tab for its duration.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str, policy: &WaitPolicy) -> Result<String, FetchError>;
}

/// Pure markup-to-record mapping, injectable per category. The pipeline
/// places no constraint on implementations beyond determinism.
pub trait RecordExtractor: Send + Sync {
    /// Explode one rendered listing page into item records.
    fn extract_listing(&self, html: &str, category: Category) -> Vec<RawRecord>;

    /// Pull category-specific attributes out of a rendered detail page.
    fn extract_detail(&self, html: &str, category: Category) -> BTreeMap<String, String>;
}

/// Secondary data source consulted after a part is persisted. Lookups are
/// best-effort and failure-isolated from the main record write.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// Stable source name, recorded with every result row.
    fn name(&self) -> &str;

    /// Whether this source has data for the given category.
    fn applies_to(&self, category: Category) -> bool;

    /// Look up enrichment data for one harvested record.
    async fn lookup(&self, record: &RawRecord) -> Result<Vec<EnrichmentPayload>, LookupError>;
}
