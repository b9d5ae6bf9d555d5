//! Repository traits and their SQLite implementation.
//!
//! All writes to drugs, price rows and tasks happen here. Price history is
//! append-only: nothing in this module ever deletes a price row or changes a
//! stored price.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    Alert, Category, CrawlTask, Drug, DrugAlias, MonitorKind, MonitorRule, OutlierFlag,
    PriceRecord, Result, TaskStatus, WatchListItem,
};
use crate::engine::IdentityKey;

use super::database::Database;
use super::models::{AlertRow, AliasRow, DrugRow, PriceRow, RuleRow, TaskRow, WatchRow};

/// Classification and provenance fields applied on drug upsert.
#[derive(Debug, Clone)]
pub struct DrugFields {
    pub upstream_id: Option<String>,
    pub category: Category,
    pub category_confidence: f64,
    pub category_source: String,
    pub approval_number: Option<String>,
}

/// One price observation to append.
#[derive(Debug, Clone)]
pub struct PriceObservation {
    pub price_cents: i64,
    pub supplier_name: String,
    pub supplier_id: Option<String>,
    pub source_url: Option<String>,
    pub crawled_at: DateTime<Utc>,
}

impl PriceObservation {
    fn supplier_key(&self) -> &str {
        self.supplier_id.as_deref().unwrap_or(&self.supplier_name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DrugFilter {
    pub category: Option<Category>,
    pub limit: Option<i64>,
}

/// Outlier annotation for one price row; written only by the annotator.
#[derive(Debug, Clone)]
pub struct OutlierUpdate {
    pub price_record_id: i64,
    pub flag: OutlierFlag,
    pub reason: Option<String>,
}

/// Result of persisting one identity: the drug row id and the ids of the
/// price rows written by this batch.
#[derive(Debug, Clone, Default)]
pub struct PersistOutcome {
    pub drug_id: i64,
    pub inserted: usize,
    pub inserted_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub rule_id: i64,
    pub drug_id: i64,
    pub kind: MonitorKind,
    pub message: String,
    pub price_record_id: Option<i64>,
}

#[async_trait]
pub trait DrugRepository: Send + Sync {
    /// Atomic read-or-insert on the identity tuple. On re-visit the category
    /// is updated only when the new confidence is at least the stored one,
    /// and the approval number only when currently null.
    async fn upsert_drug(&self, identity: &IdentityKey, fields: &DrugFields) -> Result<i64>;
    async fn get_drug(&self, id: i64) -> Result<Option<Drug>>;
    async fn list_drugs(&self, filter: &DrugFilter) -> Result<Vec<Drug>>;
    /// Substring match across name, specification and aliases, ordered by
    /// most-recent activity.
    async fn search_drugs(&self, query: &str, category: Option<Category>) -> Result<Vec<Drug>>;
    async fn add_alias(&self, drug_id: i64, alias: &str) -> Result<()>;
    async fn list_aliases(&self, drug_id: i64) -> Result<Vec<DrugAlias>>;
}

#[async_trait]
pub trait PriceRepository: Send + Sync {
    /// Append observations as new rows; history is never deduplicated.
    /// Within a single batch, duplicates on (supplier, scaled price) are
    /// collapsed so one crawl cannot write the same card twice.
    async fn append_prices(&self, drug_id: i64, observations: &[PriceObservation])
        -> Result<usize>;

    /// Upsert one drug identity and append its observations in a single
    /// transaction; a failure rolls back that identity only.
    async fn persist_identity(
        &self,
        identity: &IdentityKey,
        fields: &DrugFields,
        observations: &[PriceObservation],
    ) -> Result<PersistOutcome>;

    async fn get_prices(&self, drug_id: i64, include_outliers: bool) -> Result<Vec<PriceRecord>>;

    /// Annotation write path, reserved to the outlier annotator.
    async fn set_outlier_flags(&self, updates: &[OutlierUpdate]) -> Result<()>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create_task(&self, task: &CrawlTask) -> Result<()>;
    async fn get_task(&self, id: Uuid) -> Result<Option<CrawlTask>>;
    async fn list_tasks(&self, limit: i64) -> Result<Vec<CrawlTask>>;
    async fn mark_running(&self, id: Uuid) -> Result<()>;
    async fn record_keyword_success(&self, id: Uuid, items: i64) -> Result<()>;
    async fn record_keyword_failure(&self, id: Uuid, error: &str) -> Result<()>;
    async fn finish_task(&self, id: Uuid, status: TaskStatus) -> Result<()>;
}

#[async_trait]
pub trait WatchListRepository: Send + Sync {
    async fn add_watch_item(
        &self,
        keyword: &str,
        category_hint: Option<&str>,
        priority: i64,
    ) -> Result<i64>;
    async fn list_watch_items(&self, enabled_only: bool) -> Result<Vec<WatchListItem>>;
    async fn set_watch_enabled(&self, id: i64, enabled: bool) -> Result<()>;
    async fn touch_watch_item(&self, keyword: &str, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait MonitorRepository: Send + Sync {
    async fn create_rule(&self, drug_id: i64, kind: MonitorKind, threshold_pct: f64)
        -> Result<i64>;
    async fn list_enabled_rules(&self, drug_id: i64) -> Result<Vec<MonitorRule>>;
    async fn insert_alert(&self, alert: &NewAlert) -> Result<i64>;
    async fn recent_alerts(&self, days: i64) -> Result<Vec<Alert>>;
}

/// The single relational store (C7).
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn upsert_drug_tx(
        tx: &mut Transaction<'_, Sqlite>,
        identity: &IdentityKey,
        fields: &DrugFields,
    ) -> Result<i64> {
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO drugs (
                upstream_id, name, specification, manufacturer,
                category, category_confidence, category_source,
                approval_number, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fields.upstream_id)
        .bind(&identity.name)
        .bind(&identity.specification)
        .bind(&identity.manufacturer)
        .bind(fields.category.as_str())
        .bind(fields.category_confidence)
        .bind(&fields.category_source)
        .bind(&fields.approval_number)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(inserted.last_insert_rowid());
        }

        // The identity already exists: fetch it and apply the conditional
        // updates.
        let row: DrugRow = sqlx::query_as(
            "SELECT * FROM drugs WHERE name = ? AND specification = ? AND manufacturer = ?",
        )
        .bind(&identity.name)
        .bind(&identity.specification)
        .bind(&identity.manufacturer)
        .fetch_one(&mut **tx)
        .await?;

        if fields.category_confidence >= row.category_confidence {
            sqlx::query(
                r#"
                UPDATE drugs
                SET category = ?, category_confidence = ?, category_source = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(fields.category.as_str())
            .bind(fields.category_confidence)
            .bind(&fields.category_source)
            .bind(now)
            .bind(row.id)
            .execute(&mut **tx)
            .await?;
        }

        if row.approval_number.is_none() && fields.approval_number.is_some() {
            sqlx::query("UPDATE drugs SET approval_number = ?, updated_at = ? WHERE id = ?")
                .bind(&fields.approval_number)
                .bind(now)
                .bind(row.id)
                .execute(&mut **tx)
                .await?;
        }

        if row.upstream_id.is_none() && fields.upstream_id.is_some() {
            sqlx::query("UPDATE drugs SET upstream_id = ?, updated_at = ? WHERE id = ?")
                .bind(&fields.upstream_id)
                .bind(now)
                .bind(row.id)
                .execute(&mut **tx)
                .await?;
        }

        Ok(row.id)
    }

    async fn append_prices_tx(
        tx: &mut Transaction<'_, Sqlite>,
        drug_id: i64,
        observations: &[PriceObservation],
    ) -> Result<Vec<i64>> {
        let mut seen: std::collections::HashSet<(String, i64)> = std::collections::HashSet::new();
        let mut inserted = Vec::new();

        for obs in observations {
            if !seen.insert((obs.supplier_key().to_string(), obs.price_cents)) {
                continue;
            }
            let result = sqlx::query(
                r#"
                INSERT INTO price_records (
                    drug_id, price_cents, supplier_name, supplier_id,
                    source_url, crawled_at, is_outlier, outlier_reason
                ) VALUES (?, ?, ?, ?, ?, ?, 0, NULL)
                "#,
            )
            .bind(drug_id)
            .bind(obs.price_cents)
            .bind(&obs.supplier_name)
            .bind(&obs.supplier_id)
            .bind(&obs.source_url)
            .bind(obs.crawled_at)
            .execute(&mut **tx)
            .await?;
            inserted.push(result.last_insert_rowid());
        }

        if !inserted.is_empty() {
            // New observations count as drug activity.
            sqlx::query("UPDATE drugs SET updated_at = ? WHERE id = ?")
                .bind(Utc::now())
                .bind(drug_id)
                .execute(&mut **tx)
                .await?;
        }

        Ok(inserted)
    }
}

#[async_trait]
impl DrugRepository for SqliteStore {
    async fn upsert_drug(&self, identity: &IdentityKey, fields: &DrugFields) -> Result<i64> {
        let mut tx = self.db.pool().begin().await?;
        let id = Self::upsert_drug_tx(&mut tx, identity, fields).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn get_drug(&self, id: i64) -> Result<Option<Drug>> {
        let row: Option<DrugRow> = sqlx::query_as("SELECT * FROM drugs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(Drug::from))
    }

    async fn list_drugs(&self, filter: &DrugFilter) -> Result<Vec<Drug>> {
        let limit = filter.limit.unwrap_or(200);
        let rows: Vec<DrugRow> = match filter.category {
            Some(category) => {
                sqlx::query_as(
                    "SELECT * FROM drugs WHERE category = ? ORDER BY updated_at DESC LIMIT ?",
                )
                .bind(category.as_str())
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM drugs ORDER BY updated_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(self.db.pool())
                    .await?
            }
        };
        Ok(rows.into_iter().map(Drug::from).collect())
    }

    async fn search_drugs(&self, query: &str, category: Option<Category>) -> Result<Vec<Drug>> {
        let pattern = format!("%{}%", query.trim());
        let rows: Vec<DrugRow> = match category {
            Some(category) => {
                sqlx::query_as(
                    r#"
                    SELECT DISTINCT d.* FROM drugs d
                    LEFT JOIN drug_aliases a ON a.drug_id = d.id
                    WHERE (d.name LIKE ? OR d.specification LIKE ? OR a.alias LIKE ?)
                      AND d.category = ?
                    ORDER BY d.updated_at DESC
                    LIMIT 200
                    "#,
                )
                .bind(&pattern)
                .bind(&pattern)
                .bind(&pattern)
                .bind(category.as_str())
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT DISTINCT d.* FROM drugs d
                    LEFT JOIN drug_aliases a ON a.drug_id = d.id
                    WHERE d.name LIKE ? OR d.specification LIKE ? OR a.alias LIKE ?
                    ORDER BY d.updated_at DESC
                    LIMIT 200
                    "#,
                )
                .bind(&pattern)
                .bind(&pattern)
                .bind(&pattern)
                .fetch_all(self.db.pool())
                .await?
            }
        };
        Ok(rows.into_iter().map(Drug::from).collect())
    }

    async fn add_alias(&self, drug_id: i64, alias: &str) -> Result<()> {
        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM drug_aliases WHERE drug_id = ? AND alias = ?")
                .bind(drug_id)
                .bind(alias)
                .fetch_optional(self.db.pool())
                .await?;
        if existing.is_some() {
            return Ok(());
        }
        sqlx::query("INSERT INTO drug_aliases (drug_id, alias) VALUES (?, ?)")
            .bind(drug_id)
            .bind(alias)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn list_aliases(&self, drug_id: i64) -> Result<Vec<DrugAlias>> {
        let rows: Vec<AliasRow> = sqlx::query_as("SELECT * FROM drug_aliases WHERE drug_id = ?")
            .bind(drug_id)
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows.into_iter().map(DrugAlias::from).collect())
    }
}

#[async_trait]
impl PriceRepository for SqliteStore {
    async fn append_prices(
        &self,
        drug_id: i64,
        observations: &[PriceObservation],
    ) -> Result<usize> {
        let mut tx = self.db.pool().begin().await?;
        let inserted = Self::append_prices_tx(&mut tx, drug_id, observations).await?;
        tx.commit().await?;
        debug!(drug_id, inserted = inserted.len(), "appended price observations");
        Ok(inserted.len())
    }

    async fn persist_identity(
        &self,
        identity: &IdentityKey,
        fields: &DrugFields,
        observations: &[PriceObservation],
    ) -> Result<PersistOutcome> {
        let mut tx = self.db.pool().begin().await?;
        let drug_id = Self::upsert_drug_tx(&mut tx, identity, fields).await?;
        let inserted_ids = Self::append_prices_tx(&mut tx, drug_id, observations).await?;
        tx.commit().await?;
        Ok(PersistOutcome {
            drug_id,
            inserted: inserted_ids.len(),
            inserted_ids,
        })
    }

    async fn get_prices(&self, drug_id: i64, include_outliers: bool) -> Result<Vec<PriceRecord>> {
        let rows: Vec<PriceRow> = if include_outliers {
            sqlx::query_as(
                "SELECT * FROM price_records WHERE drug_id = ? ORDER BY crawled_at, id",
            )
            .bind(drug_id)
            .fetch_all(self.db.pool())
            .await?
        } else {
            sqlx::query_as(
                "SELECT * FROM price_records WHERE drug_id = ? AND is_outlier = 0 ORDER BY crawled_at, id",
            )
            .bind(drug_id)
            .fetch_all(self.db.pool())
            .await?
        };
        Ok(rows.into_iter().map(PriceRecord::from).collect())
    }

    async fn set_outlier_flags(&self, updates: &[OutlierUpdate]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        for update in updates {
            sqlx::query("UPDATE price_records SET is_outlier = ?, outlier_reason = ? WHERE id = ?")
                .bind(update.flag.as_i64())
                .bind(&update.reason)
                .bind(update.price_record_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for SqliteStore {
    async fn create_task(&self, task: &CrawlTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_tasks (
                id, name, keywords, status, total_keywords, completed_keywords,
                failed_keywords, total_items, started_at, completed_at,
                last_error, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.name)
        .bind(serde_json::to_string(&task.keywords)?)
        .bind(task.status.as_str())
        .bind(task.total_keywords)
        .bind(task.completed_keywords)
        .bind(task.failed_keywords)
        .bind(task.total_items)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(&task.last_error)
        .bind(task.created_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<CrawlTask>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM crawl_tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn list_tasks(&self, limit: i64) -> Result<Vec<CrawlTask>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM crawl_tasks ORDER BY created_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn mark_running(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE crawl_tasks SET status = 'running', started_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn record_keyword_success(&self, id: Uuid, items: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_tasks
            SET completed_keywords = completed_keywords + 1,
                total_items = total_items + ?
            WHERE id = ?
            "#,
        )
        .bind(items)
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn record_keyword_failure(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_tasks
            SET failed_keywords = failed_keywords + 1,
                last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn finish_task(&self, id: Uuid, status: TaskStatus) -> Result<()> {
        sqlx::query("UPDATE crawl_tasks SET status = ?, completed_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WatchListRepository for SqliteStore {
    async fn add_watch_item(
        &self,
        keyword: &str,
        category_hint: Option<&str>,
        priority: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO watch_list (keyword, category_hint, priority, added_at, enabled)
            VALUES (?, ?, ?, ?, 1)
            "#,
        )
        .bind(keyword)
        .bind(category_hint)
        .bind(priority)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 1 {
            return Ok(result.last_insert_rowid());
        }
        let (id,): (i64,) = sqlx::query_as("SELECT id FROM watch_list WHERE keyword = ?")
            .bind(keyword)
            .fetch_one(self.db.pool())
            .await?;
        Ok(id)
    }

    async fn list_watch_items(&self, enabled_only: bool) -> Result<Vec<WatchListItem>> {
        let rows: Vec<WatchRow> = if enabled_only {
            sqlx::query_as(
                "SELECT * FROM watch_list WHERE enabled = 1 ORDER BY priority DESC, added_at",
            )
            .fetch_all(self.db.pool())
            .await?
        } else {
            sqlx::query_as("SELECT * FROM watch_list ORDER BY priority DESC, added_at")
                .fetch_all(self.db.pool())
                .await?
        };
        Ok(rows.into_iter().map(WatchListItem::from).collect())
    }

    async fn set_watch_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE watch_list SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn touch_watch_item(&self, keyword: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE watch_list SET last_crawled_at = ? WHERE keyword = ?")
            .bind(at)
            .bind(keyword)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MonitorRepository for SqliteStore {
    async fn create_rule(
        &self,
        drug_id: i64,
        kind: MonitorKind,
        threshold_pct: f64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO monitor_rules (drug_id, kind, threshold_pct, enabled, created_at)
            VALUES (?, ?, ?, 1, ?)
            "#,
        )
        .bind(drug_id)
        .bind(kind.as_str())
        .bind(threshold_pct)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_enabled_rules(&self, drug_id: i64) -> Result<Vec<MonitorRule>> {
        let rows: Vec<RuleRow> =
            sqlx::query_as("SELECT * FROM monitor_rules WHERE drug_id = ? AND enabled = 1")
                .bind(drug_id)
                .fetch_all(self.db.pool())
                .await?;
        rows.into_iter().map(RuleRow::into_rule).collect()
    }

    async fn insert_alert(&self, alert: &NewAlert) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (rule_id, drug_id, kind, message, price_record_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.rule_id)
        .bind(alert.drug_id)
        .bind(alert.kind.as_str())
        .bind(&alert.message)
        .bind(alert.price_record_id)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn recent_alerts(&self, days: i64) -> Result<Vec<Alert>> {
        let cutoff = Utc::now() - Duration::days(days.max(0));
        let rows: Vec<AlertRow> =
            sqlx::query_as("SELECT * FROM alerts WHERE created_at >= ? ORDER BY created_at DESC")
                .bind(cutoff)
                .fetch_all(self.db.pool())
                .await?;
        rows.into_iter().map(AlertRow::into_alert).collect()
    }
}
