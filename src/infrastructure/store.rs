//! Part store: the idempotent upsert engine plus enrichment-row persistence.
//!
//! One price option of one harvested record maps to one durable part row,
//! identified by its canonical key. All decisions about insert vs update vs
//! no-op are made here, inside a single transaction per part, so no partial
//! part/spec state is ever visible to a concurrent reader.

use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::domain::error::PersistError;
use crate::domain::model::{Category, EnrichmentPayload, PartId, RawRecord};

/// What the upsert did for one price option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    PriceChanged { previous: i64 },
    /// Stored price equals the harvested price: no write was issued, for
    /// either the part or its spec.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct PartUpsert {
    pub part_id: PartId,
    pub canonical_key: String,
    pub outcome: UpsertOutcome,
}

#[derive(Clone)]
pub struct PartStore {
    pool: SqlitePool,
}

impl PartStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update every price option of a harvested record.
    ///
    /// Per canonical key, in one transaction: absent rows are inserted with
    /// their spec; present rows with an unchanged price are left untouched
    /// (most re-harvests see no price movement, so this branch deliberately
    /// issues no writes at all); present rows with a differing price get the
    /// new price and a wholesale spec rewrite.
    pub async fn upsert(&self, record: &RawRecord, category: Category)
        -> Result<Vec<PartUpsert>, PersistError>
    {
        let attributes = serde_json::to_string(&record.attributes)
            .map_err(|e| PersistError::ConstraintViolation(format!("unserializable spec: {e}")))?;

        let mut results = Vec::with_capacity(record.price_options.len());
        for option in &record.price_options {
            let canonical_key = record.canonical_key(option);
            let upsert = self
                .upsert_one(record, category, &canonical_key, option.price_minor, &attributes)
                .await?;
            results.push(upsert);
        }
        Ok(results)
    }

    async fn upsert_one(
        &self,
        record: &RawRecord,
        category: Category,
        canonical_key: &str,
        price_minor: i64,
        attributes: &str,
    ) -> Result<PartUpsert, PersistError> {
        let mut tx = self.pool.begin().await.map_err(PersistError::from_sqlx)?;

        let existing = sqlx::query("SELECT id, price FROM parts WHERE canonical_key = ?")
            .bind(canonical_key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(PersistError::from_sqlx)?;

        let upsert = match existing {
            None => {
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO parts
                        (canonical_key, name, category, price, image_url, star_rating, review_count)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(canonical_key)
                .bind(&record.display_name)
                .bind(category.as_str())
                .bind(price_minor)
                .bind(&record.image_url)
                .bind(record.rating.stars)
                .bind(record.rating.review_count)
                .execute(&mut *tx)
                .await
                .map_err(PersistError::from_sqlx)?;

                let part_id = inserted.last_insert_rowid();
                sqlx::query("INSERT INTO part_spec (part_id, attributes) VALUES (?, ?)")
                    .bind(part_id)
                    .bind(attributes)
                    .execute(&mut *tx)
                    .await
                    .map_err(PersistError::from_sqlx)?;

                debug!(canonical_key, part_id, "part inserted");
                PartUpsert {
                    part_id,
                    canonical_key: canonical_key.to_string(),
                    outcome: UpsertOutcome::Inserted,
                }
            }
            Some(row) => {
                let part_id: i64 = row.get("id");
                let stored_price: i64 = row.get("price");
                if stored_price == price_minor {
                    PartUpsert {
                        part_id,
                        canonical_key: canonical_key.to_string(),
                        outcome: UpsertOutcome::Unchanged,
                    }
                } else {
                    sqlx::query(
                        r#"
                        UPDATE parts
                        SET price = ?, image_url = ?, star_rating = ?, review_count = ?,
                            updated_at = CURRENT_TIMESTAMP
                        WHERE id = ?
                        "#,
                    )
                    .bind(price_minor)
                    .bind(&record.image_url)
                    .bind(record.rating.stars)
                    .bind(record.rating.review_count)
                    .bind(part_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(PersistError::from_sqlx)?;

                    // A price change means the listing was re-rendered with
                    // fresh data, so the spec is rewritten in this branch.
                    sqlx::query(
                        r#"
                        INSERT INTO part_spec (part_id, attributes) VALUES (?, ?)
                        ON CONFLICT (part_id) DO UPDATE SET
                            attributes = excluded.attributes,
                            updated_at = CURRENT_TIMESTAMP
                        "#,
                    )
                    .bind(part_id)
                    .bind(attributes)
                    .execute(&mut *tx)
                    .await
                    .map_err(PersistError::from_sqlx)?;

                    debug!(canonical_key, part_id, stored_price, new_price = price_minor,
                        "price changed, part updated");
                    PartUpsert {
                        part_id,
                        canonical_key: canonical_key.to_string(),
                        outcome: UpsertOutcome::PriceChanged { previous: stored_price },
                    }
                }
            }
        };

        tx.commit().await.map_err(PersistError::from_sqlx)?;
        Ok(upsert)
    }

    /// Whether any enrichment row exists for `(part, source)`. Checked
    /// before the expensive external lookup, both as the idempotency
    /// guarantee and as cost control.
    pub async fn has_enrichment(&self, part_id: PartId, source: &str)
        -> Result<bool, PersistError>
    {
        let row = sqlx::query(
            "SELECT 1 FROM enrichment_results WHERE part_id = ? AND source = ? LIMIT 1",
        )
        .bind(part_id)
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(PersistError::from_sqlx)?;
        Ok(row.is_some())
    }

    /// Append one enrichment row. Returns `false` when the
    /// `(part, source, dedupe_key)` row already existed.
    pub async fn insert_enrichment(
        &self,
        part_id: PartId,
        source: &str,
        payload: &EnrichmentPayload,
    ) -> Result<bool, PersistError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO enrichment_results (part_id, source, dedupe_key, value)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(part_id)
        .bind(source)
        .bind(&payload.dedupe_key)
        .bind(&payload.value)
        .execute(&self.pool)
        .await
        .map_err(PersistError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    /// Connection liveness probe, used as the retry controller's recycle
    /// hook after a lost-connection failure: acquiring runs the pool's
    /// health check and discards broken connections.
    pub async fn recycle(&self) {
        match self.pool.acquire().await {
            Ok(_conn) => debug!("connection pool probe ok"),
            Err(e) => warn!(error = %e, "connection pool probe failed"),
        }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;
    use crate::domain::model::{PriceOption, RatingSummary};
    use crate::infrastructure::db::migrate_pool;

    async fn test_store() -> PartStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        PartStore::new(pool)
    }

    fn memory_record() -> RawRecord {
        let mut attributes = BTreeMap::new();
        attributes.insert("clock_speed".to_string(), "6000MHz".to_string());
        attributes.insert("ram_timing".to_string(), "CL30".to_string());
        RawRecord {
            canonical_link: "https://prod.example/item?pcode=9001".into(),
            display_name: "DDR5-6000 CL30".into(),
            price_options: vec![
                PriceOption::with_capacity("16GB", 8_900_000),
                PriceOption::with_capacity("32GB", 16_900_000),
            ],
            image_url: Some("https://img.example/9001.jpg".into()),
            rating: RatingSummary { stars: Some(4.8), review_count: Some(214) },
            attributes,
        }
    }

    fn cpu_record(price: i64) -> RawRecord {
        let mut attributes = BTreeMap::new();
        attributes.insert("socket".to_string(), "AM5".to_string());
        attributes.insert("cores".to_string(), "8".to_string());
        RawRecord {
            canonical_link: "https://prod.example/item?pcode=100".into(),
            display_name: "Ryzen 7 9800X3D".into(),
            price_options: vec![PriceOption::new(price)],
            image_url: None,
            rating: RatingSummary::default(),
            attributes,
        }
    }

    async fn stored_price(store: &PartStore, key: &str) -> i64 {
        sqlx::query("SELECT price FROM parts WHERE canonical_key = ?")
            .bind(key)
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("price")
    }

    async fn stored_spec(store: &PartStore, part_id: PartId) -> String {
        sqlx::query("SELECT attributes FROM part_spec WHERE part_id = ?")
            .bind(part_id)
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("attributes")
    }

    async fn part_count(store: &PartStore) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM parts")
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn multi_sku_record_becomes_one_part_per_capacity() {
        let store = test_store().await;
        let results = store.upsert(&memory_record(), Category::Memory).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.outcome == UpsertOutcome::Inserted));
        assert_ne!(results[0].part_id, results[1].part_id);
        assert_eq!(part_count(&store).await, 2);
        assert_eq!(
            stored_price(&store, "https://prod.example/item?pcode=9001#16GB").await,
            8_900_000
        );
    }

    #[tokio::test]
    async fn unchanged_price_issues_no_write() {
        let store = test_store().await;
        let first = store.upsert(&cpu_record(52_000_000), Category::Cpu).await.unwrap();
        let part_id = first[0].part_id;
        let original_spec = stored_spec(&store, part_id).await;

        // Same price but updated attributes: the skip branch must not touch
        // the spec either.
        let mut again = cpu_record(52_000_000);
        again.attributes.insert("threads".to_string(), "16".to_string());
        let second = store.upsert(&again, Category::Cpu).await.unwrap();

        assert_eq!(second[0].outcome, UpsertOutcome::Unchanged);
        assert_eq!(second[0].part_id, part_id);
        assert_eq!(stored_spec(&store, part_id).await, original_spec);
        assert_eq!(part_count(&store).await, 1);
    }

    #[tokio::test]
    async fn changed_price_updates_part_and_rewrites_spec() {
        let store = test_store().await;
        let first = store.upsert(&cpu_record(52_000_000), Category::Cpu).await.unwrap();
        let part_id = first[0].part_id;

        let mut drifted = cpu_record(48_900_000);
        drifted.attributes.insert("threads".to_string(), "16".to_string());
        let second = store.upsert(&drifted, Category::Cpu).await.unwrap();

        assert_eq!(
            second[0].outcome,
            UpsertOutcome::PriceChanged { previous: 52_000_000 }
        );
        assert_eq!(second[0].part_id, part_id, "id is immutable across updates");
        assert_eq!(
            stored_price(&store, "https://prod.example/item?pcode=100").await,
            48_900_000
        );
        assert!(stored_spec(&store, part_id).await.contains("threads"));
        assert_eq!(part_count(&store).await, 1);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_across_runs() {
        let store = test_store().await;
        for _ in 0..3 {
            store.upsert(&memory_record(), Category::Memory).await.unwrap();
            store.upsert(&cpu_record(52_000_000), Category::Cpu).await.unwrap();
        }
        assert_eq!(part_count(&store).await, 3);
    }

    #[tokio::test]
    async fn enrichment_rows_are_appended_at_most_once() {
        let store = test_store().await;
        let parts = store.upsert(&cpu_record(52_000_000), Category::Cpu).await.unwrap();
        let part_id = parts[0].part_id;

        let payload = EnrichmentPayload {
            dedupe_key: "cinebench-r23:multi".into(),
            value: r#"{"value":23450.0,"unit":"pts"}"#.into(),
        };

        assert!(!store.has_enrichment(part_id, "quasarzone").await.unwrap());
        assert!(store.insert_enrichment(part_id, "quasarzone", &payload).await.unwrap());
        assert!(!store.insert_enrichment(part_id, "quasarzone", &payload).await.unwrap());
        assert!(store.has_enrichment(part_id, "quasarzone").await.unwrap());

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrichment_results")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
