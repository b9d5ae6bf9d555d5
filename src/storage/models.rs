//! Row mappings between SQLite and the domain types.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    Alert, Category, CrawlTask, Drug, DrugAlias, MonitorKind, MonitorRule, OutlierFlag,
    PharmaOpsError, PriceRecord, Result, TaskStatus, WatchListItem,
};

#[derive(Debug, Clone, FromRow)]
pub struct DrugRow {
    pub id: i64,
    pub upstream_id: Option<String>,
    pub name: String,
    pub specification: String,
    pub manufacturer: String,
    pub category: String,
    pub category_confidence: f64,
    pub category_source: String,
    pub approval_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DrugRow> for Drug {
    fn from(row: DrugRow) -> Self {
        Drug {
            id: row.id,
            upstream_id: row.upstream_id,
            name: row.name,
            specification: row.specification,
            manufacturer: row.manufacturer,
            category: Category::parse(&row.category),
            category_confidence: row.category_confidence,
            category_source: row.category_source,
            approval_number: row.approval_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PriceRow {
    pub id: i64,
    pub drug_id: i64,
    pub price_cents: i64,
    pub supplier_name: String,
    pub supplier_id: Option<String>,
    pub source_url: Option<String>,
    pub crawled_at: DateTime<Utc>,
    pub is_outlier: i64,
    pub outlier_reason: Option<String>,
}

impl From<PriceRow> for PriceRecord {
    fn from(row: PriceRow) -> Self {
        PriceRecord {
            id: row.id,
            drug_id: row.drug_id,
            price_cents: row.price_cents,
            supplier_name: row.supplier_name,
            supplier_id: row.supplier_id,
            source_url: row.source_url,
            crawled_at: row.crawled_at,
            is_outlier: OutlierFlag::from_i64(row.is_outlier),
            outlier_reason: row.outlier_reason,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AliasRow {
    pub id: i64,
    pub drug_id: i64,
    pub alias: String,
}

impl From<AliasRow> for DrugAlias {
    fn from(row: AliasRow) -> Self {
        DrugAlias {
            id: row.id,
            drug_id: row.drug_id,
            alias: row.alias,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WatchRow {
    pub id: i64,
    pub keyword: String,
    pub category_hint: Option<String>,
    pub priority: i64,
    pub added_at: DateTime<Utc>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub enabled: i64,
}

impl From<WatchRow> for WatchListItem {
    fn from(row: WatchRow) -> Self {
        WatchListItem {
            id: row.id,
            keyword: row.keyword,
            category_hint: row.category_hint,
            priority: row.priority,
            added_at: row.added_at,
            last_crawled_at: row.last_crawled_at,
            enabled: row.enabled != 0,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub name: String,
    pub keywords: String,
    pub status: String,
    pub total_keywords: i64,
    pub completed_keywords: i64,
    pub failed_keywords: i64,
    pub total_items: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskRow {
    pub fn into_task(self) -> Result<CrawlTask> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| PharmaOpsError::persistence(format!("bad task id {}: {e}", self.id)))?;
        let keywords: Vec<String> = serde_json::from_str(&self.keywords)?;
        Ok(CrawlTask {
            id,
            name: self.name,
            keywords,
            status: TaskStatus::parse(&self.status),
            total_keywords: self.total_keywords,
            completed_keywords: self.completed_keywords,
            failed_keywords: self.failed_keywords,
            total_items: self.total_items,
            started_at: self.started_at,
            completed_at: self.completed_at,
            last_error: self.last_error,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RuleRow {
    pub id: i64,
    pub drug_id: i64,
    pub kind: String,
    pub threshold_pct: f64,
    pub enabled: i64,
    pub created_at: DateTime<Utc>,
}

impl RuleRow {
    pub fn into_rule(self) -> Result<MonitorRule> {
        let kind = MonitorKind::parse(&self.kind).ok_or_else(|| {
            PharmaOpsError::persistence(format!("unknown monitor kind: {}", self.kind))
        })?;
        Ok(MonitorRule {
            id: self.id,
            drug_id: self.drug_id,
            kind,
            threshold_pct: self.threshold_pct,
            enabled: self.enabled != 0,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub rule_id: i64,
    pub drug_id: i64,
    pub kind: String,
    pub message: String,
    pub price_record_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl AlertRow {
    pub fn into_alert(self) -> Result<Alert> {
        let kind = MonitorKind::parse(&self.kind).ok_or_else(|| {
            PharmaOpsError::persistence(format!("unknown alert kind: {}", self.kind))
        })?;
        Ok(Alert {
            id: self.id,
            rule_id: self.rule_id,
            drug_id: self.drug_id,
            kind,
            message: self.message,
            price_record_id: self.price_record_id,
            created_at: self.created_at,
        })
    }
}
