//! HTTP-backed enrichment sources.
//!
//! Both sources resolve a harvested part name against a JSON lookup endpoint.
//! The benchmark source serves compute parts only (CPU/GPU); the community
//! review source covers every category. Review summarization itself happens
//! downstream and is not part of the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::domain::error::LookupError;
use crate::domain::model::{Category, EnrichmentPayload, RawRecord};
use crate::domain::ports::EnrichmentSource;

fn build_client(timeout: Duration) -> Result<Client, LookupError> {
    Client::builder()
        .user_agent(concat!("partdex/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| LookupError::SourceUnavailable(format!("http client: {e}")))
}

fn lookup_url(template: &str, record: &RawRecord) -> String {
    let query: String =
        url::form_urlencoded::byte_serialize(record.display_name.as_bytes()).collect();
    template.replace("{query}", &query)
}

async fn fetch_json<T: for<'de> Deserialize<'de>>(
    client: &Client,
    url: &str,
) -> Result<T, LookupError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| LookupError::SourceUnavailable(e.to_string()))?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(LookupError::NotFound);
    }
    if !response.status().is_success() {
        return Err(LookupError::SourceUnavailable(format!(
            "unexpected status {}",
            response.status()
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| LookupError::SourceUnavailable(format!("malformed payload: {e}")))
}

/// One benchmark row as served by the performance-review API; mirrors the
/// downstream `benchmark_results` consumer.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BenchmarkRow {
    pub test_name: String,
    #[serde(default)]
    pub test_version: Option<String>,
    #[serde(default)]
    pub scenario: Option<String>,
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub review_url: Option<String>,
}

impl BenchmarkRow {
    fn dedupe_key(&self) -> String {
        format!(
            "{}:{}",
            self.test_name,
            self.scenario.as_deref().unwrap_or("default")
        )
    }
}

pub struct BenchmarkApiSource {
    name: String,
    url_template: String,
    client: Client,
}

impl BenchmarkApiSource {
    pub fn new(
        name: impl Into<String>,
        url_template: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LookupError> {
        Ok(Self {
            name: name.into(),
            url_template: url_template.into(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl EnrichmentSource for BenchmarkApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, category: Category) -> bool {
        category.is_compute()
    }

    async fn lookup(&self, record: &RawRecord) -> Result<Vec<EnrichmentPayload>, LookupError> {
        let url = lookup_url(&self.url_template, record);
        let rows: Vec<BenchmarkRow> = fetch_json(&self.client, &url).await?;
        if rows.is_empty() {
            return Err(LookupError::NotFound);
        }
        debug!(source = %self.name, part = %record.display_name, rows = rows.len(),
            "benchmark lookup succeeded");
        rows.into_iter()
            .map(|row| {
                let dedupe_key = row.dedupe_key();
                let value = serde_json::to_string(&row).map_err(|e| {
                    LookupError::SourceUnavailable(format!("unserializable row: {e}"))
                })?;
                Ok(EnrichmentPayload { dedupe_key, value })
            })
            .collect()
    }
}

/// One community review reference.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ReviewRow {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

pub struct ReviewApiSource {
    name: String,
    url_template: String,
    client: Client,
}

impl ReviewApiSource {
    pub fn new(
        name: impl Into<String>,
        url_template: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LookupError> {
        Ok(Self {
            name: name.into(),
            url_template: url_template.into(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl EnrichmentSource for ReviewApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, _category: Category) -> bool {
        true
    }

    async fn lookup(&self, record: &RawRecord) -> Result<Vec<EnrichmentPayload>, LookupError> {
        let url = lookup_url(&self.url_template, record);
        let rows: Vec<ReviewRow> = fetch_json(&self.client, &url).await?;
        if rows.is_empty() {
            return Err(LookupError::NotFound);
        }
        debug!(source = %self.name, part = %record.display_name, rows = rows.len(),
            "review lookup succeeded");
        rows.into_iter()
            .map(|row| {
                let value = serde_json::to_string(&row).map_err(|e| {
                    LookupError::SourceUnavailable(format!("unserializable row: {e}"))
                })?;
                Ok(EnrichmentPayload { dedupe_key: row.url.clone(), value })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::model::{PriceOption, RatingSummary};

    fn record(name: &str) -> RawRecord {
        RawRecord {
            canonical_link: "https://prod.example/item?pcode=1".into(),
            display_name: name.into(),
            price_options: vec![PriceOption::new(1)],
            image_url: None,
            rating: RatingSummary::default(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn lookup_url_encodes_the_part_name() {
        let url = lookup_url(
            "https://bench.example/api?q={query}",
            &record("Ryzen 7 9800X3D"),
        );
        assert_eq!(url, "https://bench.example/api?q=Ryzen+7+9800X3D");
    }

    #[test]
    fn benchmark_dedupe_key_is_test_plus_scenario() {
        let row: BenchmarkRow = serde_json::from_str(
            r#"{"test_name":"Cinebench R23","scenario":"Multi","metric_name":"Score","value":23450.0,"unit":"pts"}"#,
        )
        .unwrap();
        assert_eq!(row.dedupe_key(), "Cinebench R23:Multi");

        let bare: BenchmarkRow = serde_json::from_str(
            r#"{"test_name":"Blender","metric_name":"Samples","value":102.3}"#,
        )
        .unwrap();
        assert_eq!(bare.dedupe_key(), "Blender:default");
    }

    #[test]
    fn benchmark_source_only_applies_to_compute_parts() {
        let source = BenchmarkApiSource::new(
            "quasarzone",
            "https://bench.example/api?q={query}",
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(source.applies_to(Category::Cpu));
        assert!(source.applies_to(Category::Gpu));
        assert!(!source.applies_to(Category::Case));
    }
}
