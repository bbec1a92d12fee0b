//! Core domain types for the harvesting pipeline.
//!
//! Everything here is plain data: the pipeline threads these values between
//! the fetcher, the extractor, the store and the enrichment orchestrator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Durable part identifier, assigned by the store on first insert and
/// immutable afterwards.
pub type PartId = i64;

/// Product category handled by the harvester.
///
/// Extractor and enrichment-source dispatch is keyed by this enum; there is
/// deliberately no string-keyed function table anywhere in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Cpu,
    Cooler,
    Mainboard,
    Memory,
    Gpu,
    Ssd,
    Hdd,
    Psu,
    Case,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Cpu,
        Category::Cooler,
        Category::Mainboard,
        Category::Memory,
        Category::Gpu,
        Category::Ssd,
        Category::Hdd,
        Category::Psu,
        Category::Case,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Cpu => "cpu",
            Category::Cooler => "cooler",
            Category::Mainboard => "mainboard",
            Category::Memory => "memory",
            Category::Gpu => "gpu",
            Category::Ssd => "ssd",
            Category::Hdd => "hdd",
            Category::Psu => "psu",
            Category::Case => "case",
        }
    }

    /// Categories whose parts have meaningful performance benchmarks.
    pub fn is_compute(self) -> bool {
        matches!(self, Category::Cpu | Category::Gpu)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// One (category, page) unit of work, enumerated before a run starts and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub category: Category,
    pub page_query: String,
    pub page_number: u32,
}

/// A purchasable variant of a listing. Listings for memory modules and
/// similar multi-SKU products carry one option per capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceOption {
    pub capacity_label: Option<String>,
    pub price_minor: i64,
}

impl PriceOption {
    pub fn new(price_minor: i64) -> Self {
        Self { capacity_label: None, price_minor }
    }

    pub fn with_capacity(capacity_label: impl Into<String>, price_minor: i64) -> Self {
        Self { capacity_label: Some(capacity_label.into()), price_minor }
    }
}

/// Star rating plus review count as shown on a listing card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub stars: Option<f64>,
    pub review_count: Option<i64>,
}

/// Record extracted from one listing item, consumed exactly once by the
/// upsert engine. The canonical link is the natural identity of the part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub canonical_link: String,
    pub display_name: String,
    pub price_options: Vec<PriceOption>,
    pub image_url: Option<String>,
    pub rating: RatingSummary,
    pub attributes: BTreeMap<String, String>,
}

impl RawRecord {
    /// Stable identity of the part persisted for one price option: the
    /// source link, suffixed with the capacity discriminator when the
    /// listing sells several capacities under one link.
    pub fn canonical_key(&self, option: &PriceOption) -> String {
        match &option.capacity_label {
            Some(capacity) => format!("{}#{}", self.canonical_link, capacity),
            None => self.canonical_link.clone(),
        }
    }
}

/// Single enrichment datum produced by a source lookup. The dedupe key makes
/// the `(part, source, dedupe_key)` row append-at-most-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentPayload {
    pub dedupe_key: String,
    pub value: String,
}

/// Per-item lifecycle within one harvest cycle. `Persisted` is only reached
/// after the upsert transaction commits; there is no partial-persistence
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStage {
    Discovered,
    Fetched,
    Extracted,
    Persisted,
    EnrichmentPending,
    EnrichmentComplete,
    EnrichmentSkipped,
}

impl ItemStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemStage::Persisted | ItemStage::EnrichmentComplete | ItemStage::EnrichmentSkipped
        )
    }
}
