//! Operator-console endpoint handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::acquisition::{AcquireOptions, KeywordIngestor, KeywordReport};
use crate::analytics::AnalyticsService;
use crate::config::CrawlConfig;
use crate::domain::{Alert, CancelToken, Category, CrawlTask, Drug, PriceRecord};
use crate::scheduler::BatchScheduler;
use crate::storage::{DrugRepository, PriceRepository, SqliteStore, TaskRepository};

use super::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub ingestor: Arc<dyn KeywordIngestor>,
    pub scheduler: Arc<BatchScheduler>,
    pub analytics: Arc<AnalyticsService>,
    pub defaults: CrawlConfig,
}

fn require_keyword(keyword: &str) -> ApiResult<()> {
    if keyword.trim().is_empty() {
        return Err(ApiError::bad_request("keyword must not be empty"));
    }
    Ok(())
}

// --- crawl -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QuickCrawlRequest {
    pub keyword: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_max_pages() -> u32 {
    1
}

/// Fast endpoint-only acquisition; never launches a browser.
pub async fn crawl_quick(
    State(state): State<AppState>,
    Json(request): Json<QuickCrawlRequest>,
) -> ApiResult<Json<KeywordReport>> {
    require_keyword(&request.keyword)?;

    let opts = AcquireOptions {
        endpoint_only: true,
        supplier_cap: (request.max_pages.clamp(1, 10) as usize) * 20,
        min_providers: state.defaults.min_providers,
        ..AcquireOptions::default()
    };

    let report = state
        .ingestor
        .ingest_keyword(request.keyword.trim(), &opts, &CancelToken::new())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct FullCrawlRequest {
    pub keyword: String,
}

/// Force the browser pass regardless of endpoint coverage.
pub async fn crawl_full(
    State(state): State<AppState>,
    Json(request): Json<FullCrawlRequest>,
) -> ApiResult<Json<KeywordReport>> {
    require_keyword(&request.keyword)?;

    let opts = AcquireOptions {
        force_browser: true,
        min_providers: state.defaults.min_providers,
        ..AcquireOptions::default()
    };

    let report = state
        .ingestor
        .ingest_keyword(request.keyword.trim(), &opts, &CancelToken::new())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct SmartCrawlRequest {
    pub keyword: String,
    pub min_providers: Option<usize>,
    #[serde(default)]
    pub force_browser: bool,
}

/// The hybrid strategy: endpoint pass first, browser only when coverage is
/// insufficient.
pub async fn crawl_smart(
    State(state): State<AppState>,
    Json(request): Json<SmartCrawlRequest>,
) -> ApiResult<Json<KeywordReport>> {
    require_keyword(&request.keyword)?;

    let opts = AcquireOptions {
        min_providers: request.min_providers.unwrap_or(state.defaults.min_providers),
        force_browser: request.force_browser,
        ..AcquireOptions::default()
    };

    let report = state
        .ingestor
        .ingest_keyword(request.keyword.trim(), &opts, &CancelToken::new())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct BatchCrawlRequest {
    pub keywords: Vec<String>,
    #[serde(default = "default_batch_name")]
    pub name: String,
}

fn default_batch_name() -> String {
    "batch".to_string()
}

#[derive(Debug, Serialize)]
pub struct BatchCrawlResponse {
    pub task_id: Uuid,
}

pub async fn crawl_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchCrawlRequest>,
) -> ApiResult<Json<BatchCrawlResponse>> {
    let opts = AcquireOptions {
        min_providers: state.defaults.min_providers,
        ..AcquireOptions::default()
    };

    let task_id = state
        .scheduler
        .enqueue(&request.name, request.keywords, opts)
        .await?;
    Ok(Json(BatchCrawlResponse { task_id }))
}

// --- tasks -----------------------------------------------------------------

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CrawlTask>> {
    let id = parse_task_id(&id)?;
    let task = state
        .store
        .get_task(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))?;
    Ok(Json(task))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: Uuid,
    pub cancelled: bool,
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let id = parse_task_id(&id)?;
    state.scheduler.cancel(id).await?;
    Ok(Json(CancelResponse {
        task_id: id,
        cancelled: true,
    }))
}

fn parse_task_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("invalid task id: {raw}")))
}

// --- search & prices -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub category: Option<String>,
}

pub async fn search_drugs(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Drug>>> {
    let category = query.category.as_deref().map(Category::parse);
    let drugs = state.analytics.search_drugs(&query.q, category).await?;
    Ok(Json(drugs))
}

#[derive(Debug, Deserialize)]
pub struct PricesQuery {
    #[serde(default)]
    pub include_outliers: bool,
}

#[derive(Debug, Serialize)]
pub struct PriceEntry {
    pub id: i64,
    pub price: Decimal,
    pub supplier_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    pub crawled_at: chrono::DateTime<chrono::Utc>,
    pub is_outlier: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlier_reason: Option<String>,
}

impl From<PriceRecord> for PriceEntry {
    fn from(record: PriceRecord) -> Self {
        Self {
            id: record.id,
            price: record.price(),
            supplier_name: record.supplier_name.clone(),
            supplier_id: record.supplier_id.clone(),
            crawled_at: record.crawled_at,
            is_outlier: record.is_outlier.as_i64(),
            outlier_reason: record.outlier_reason,
        }
    }
}

pub async fn drug_prices(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PricesQuery>,
) -> ApiResult<Json<Vec<PriceEntry>>> {
    if state.store.get_drug(id).await?.is_none() {
        return Err(ApiError::not_found(format!("drug {id} not found")));
    }
    let records = state.store.get_prices(id, query.include_outliers).await?;
    Ok(Json(records.into_iter().map(PriceEntry::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub drug_id: i64,
    #[serde(default)]
    pub include_outliers: bool,
}

pub async fn compare_drug(
    State(state): State<AppState>,
    Query(query): Query<CompareQuery>,
) -> ApiResult<Json<crate::analytics::ComparisonView>> {
    let view = state
        .analytics
        .compare_drug(query.drug_id, query.include_outliers)
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    #[serde(default = "default_alert_days")]
    pub days: i64,
}

fn default_alert_days() -> i64 {
    7
}

pub async fn recent_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> ApiResult<Json<Vec<Alert>>> {
    let alerts = state.analytics.recent_alerts(query.days).await?;
    Ok(Json(alerts))
}

// --- health ----------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.store.database().health_check().await?;
    Ok(Json(HealthResponse { status: "ok" }))
}
