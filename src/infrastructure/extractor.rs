//! Generic listing-page extractor.
//!
//! The per-category extraction rule sets are external collaborators; this
//! implementation covers the common shape of the catalog's search listings
//! (product card with name link, price block, thumbnail, rating and a short
//! spec line) so the extractor seam stays exercised end to end. Selectors are
//! configurable per deployment.

use std::collections::BTreeMap;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace};

use crate::domain::model::{Category, PriceOption, RatingSummary, RawRecord};
use crate::domain::ports::RecordExtractor;

/// CSS selectors for one catalog's listing markup.
#[derive(Debug, Clone)]
pub struct ListingSelectors {
    pub item: String,
    pub name_link: String,
    pub price: String,
    /// Rows of a multi-SKU price list; each row may carry a capacity label.
    pub price_option_row: String,
    pub price_option_label: String,
    pub price_option_value: String,
    pub image: String,
    pub rating_stars: String,
    pub rating_count: String,
    /// Short `key: value / key: value` spec summary on the card.
    pub spec_line: String,
    /// Detail-page spec table rows.
    pub detail_spec_row: String,
    pub detail_spec_key: String,
    pub detail_spec_value: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            item: "li.prod_item".to_string(),
            name_link: "p.prod_name > a".to_string(),
            price: "p.price_sect > a > strong".to_string(),
            price_option_row: "ul.prod_pricelist > li".to_string(),
            price_option_label: "p.memory_sect".to_string(),
            price_option_value: "p.price_sect > a > strong".to_string(),
            image: "div.thumb_image img".to_string(),
            rating_stars: "div.star-single > span.text__score".to_string(),
            rating_count: "div.star-single > span.text__number".to_string(),
            spec_line: "div.spec_list".to_string(),
            detail_spec_row: "div.prod_spec table tr".to_string(),
            detail_spec_key: "th".to_string(),
            detail_spec_value: "td".to_string(),
        }
    }
}

pub struct ListingExtractor {
    selectors: ListingSelectors,
    digits: Regex,
}

impl ListingExtractor {
    pub fn new(selectors: ListingSelectors) -> Self {
        Self {
            selectors,
            digits: Regex::new(r"[0-9][0-9,]*").expect("static regex"),
        }
    }

    fn sel(&self, css: &str) -> Option<Selector> {
        Selector::parse(css).ok()
    }

    fn text_of(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
        element
            .select(selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// `"1,234,000"` (possibly with surrounding text) to minor units.
    fn parse_price(&self, raw: &str) -> Option<i64> {
        let matched = self.digits.find(raw)?;
        matched.as_str().replace(',', "").parse::<i64>().ok()
    }

    fn price_options(&self, item: ElementRef<'_>) -> Vec<PriceOption> {
        let Some(row_sel) = self.sel(&self.selectors.price_option_row) else {
            return Vec::new();
        };
        let label_sel = self.sel(&self.selectors.price_option_label);
        let value_sel = self.sel(&self.selectors.price_option_value);

        let mut options = Vec::new();
        for row in item.select(&row_sel) {
            let Some(value_sel) = value_sel.as_ref() else { break };
            let Some(price) = Self::text_of(row, value_sel).and_then(|t| self.parse_price(&t))
            else {
                continue;
            };
            let capacity = label_sel
                .as_ref()
                .and_then(|sel| Self::text_of(row, sel));
            options.push(PriceOption { capacity_label: capacity, price_minor: price });
        }

        // Single-price cards have no option rows; fall back to the plain
        // price block.
        if options.is_empty() {
            if let Some(price_sel) = self.sel(&self.selectors.price) {
                if let Some(price) =
                    Self::text_of(item, &price_sel).and_then(|t| self.parse_price(&t))
                {
                    options.push(PriceOption::new(price));
                }
            }
        }
        options
    }

    fn rating(&self, item: ElementRef<'_>) -> RatingSummary {
        let stars = self
            .sel(&self.selectors.rating_stars)
            .and_then(|sel| Self::text_of(item, &sel))
            .and_then(|t| t.trim().parse::<f64>().ok());
        let review_count = self
            .sel(&self.selectors.rating_count)
            .and_then(|sel| Self::text_of(item, &sel))
            .and_then(|t| self.parse_price(&t));
        RatingSummary { stars, review_count }
    }

    /// Card spec summaries look like `Socket: AM5 / Cores: 8 / TDP: 120W`.
    fn spec_line_attributes(&self, item: ElementRef<'_>) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        let Some(sel) = self.sel(&self.selectors.spec_line) else {
            return attributes;
        };
        let Some(line) = Self::text_of(item, &sel) else {
            return attributes;
        };
        for chunk in line.split('/') {
            if let Some((key, value)) = chunk.split_once(':') {
                let key = key.trim();
                let value = value.trim();
                if !key.is_empty() && !value.is_empty() {
                    attributes.insert(key.to_string(), value.to_string());
                }
            }
        }
        attributes
    }
}

impl Default for ListingExtractor {
    fn default() -> Self {
        Self::new(ListingSelectors::default())
    }
}

impl RecordExtractor for ListingExtractor {
    fn extract_listing(&self, html: &str, category: Category) -> Vec<RawRecord> {
        let document = Html::parse_document(html);
        let Some(item_sel) = self.sel(&self.selectors.item) else {
            return Vec::new();
        };
        let name_sel = self.sel(&self.selectors.name_link);
        let image_sel = self.sel(&self.selectors.image);

        let mut records = Vec::new();
        for item in document.select(&item_sel) {
            let Some(name_sel) = name_sel.as_ref() else { break };
            let Some(anchor) = item.select(name_sel).next() else {
                continue;
            };
            let Some(link) = anchor.value().attr("href") else {
                continue;
            };
            let display_name = anchor.text().collect::<String>().trim().to_string();
            if display_name.is_empty() {
                continue;
            }
            let price_options = self.price_options(item);
            if price_options.is_empty() {
                trace!(%display_name, "listing item without a price, skipped");
                continue;
            }
            let image_url = image_sel
                .as_ref()
                .and_then(|sel| item.select(sel).next())
                .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
                .map(|src| {
                    if src.starts_with("//") {
                        format!("https:{src}")
                    } else {
                        src.to_string()
                    }
                });

            records.push(RawRecord {
                canonical_link: link.to_string(),
                display_name,
                price_options,
                image_url,
                rating: self.rating(item),
                attributes: self.spec_line_attributes(item),
            });
        }
        debug!(category = %category, count = records.len(), "listing extracted");
        records
    }

    fn extract_detail(&self, html: &str, _category: Category) -> BTreeMap<String, String> {
        let document = Html::parse_document(html);
        let mut attributes = BTreeMap::new();
        let (Some(row_sel), Some(key_sel), Some(value_sel)) = (
            self.sel(&self.selectors.detail_spec_row),
            self.sel(&self.selectors.detail_spec_key),
            self.sel(&self.selectors.detail_spec_value),
        ) else {
            return attributes;
        };

        for row in document.select(&row_sel) {
            let key = Self::text_of(row, &key_sel);
            let value = Self::text_of(row, &value_sel);
            if let (Some(key), Some(value)) = (key, value) {
                attributes.insert(key, value);
            }
        }
        attributes
    }
}
