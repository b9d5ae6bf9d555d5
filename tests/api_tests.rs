//! HTTP surface behavior: status mapping, task flow and read paths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use pharma_price_ops::acquisition::{AcquireOptions, KeywordIngestor, KeywordReport};
use pharma_price_ops::analytics::AnalyticsService;
use pharma_price_ops::api::{create_routes, AppState};
use pharma_price_ops::config::CrawlConfig;
use pharma_price_ops::domain::{
    AcquisitionMethod, CancelToken, Category, PharmaOpsError, Result,
};
use pharma_price_ops::engine::IdentityKey;
use pharma_price_ops::scheduler::{BatchScheduler, SchedulerConfig};
use pharma_price_ops::storage::{
    Database, DatabaseConfig, DrugFields, DrugRepository, PriceObservation, PriceRepository,
    SqliteStore, TaskRepository,
};

struct StubIngestor;

#[async_trait]
impl KeywordIngestor for StubIngestor {
    async fn ingest_keyword(
        &self,
        keyword: &str,
        _opts: &AcquireOptions,
        _cancel: &CancelToken,
    ) -> Result<KeywordReport> {
        if keyword == "上游坏了" {
            return Err(PharmaOpsError::UpstreamClient {
                status: 503,
                body_excerpt: "unavailable".to_string(),
            });
        }
        Ok(KeywordReport {
            keyword: keyword.to_string(),
            method: AcquisitionMethod::Endpoint,
            offers_seen: 3,
            drugs_touched: 1,
            prices_written: 3,
            alerts_emitted: 0,
            sample: Vec::new(),
        })
    }
}

async fn setup_app() -> (axum::Router, Arc<SqliteStore>) {
    let database = Database::new(&DatabaseConfig::sqlite_memory())
        .await
        .expect("Failed to create test database");
    let store = Arc::new(SqliteStore::new(database));

    let ingestor: Arc<dyn KeywordIngestor> = Arc::new(StubIngestor);
    let scheduler = Arc::new(BatchScheduler::new(
        ingestor.clone(),
        store.clone(),
        store.clone(),
        SchedulerConfig::default(),
    ));
    let analytics = Arc::new(AnalyticsService::new(store.clone()));

    let state = AppState {
        store: store.clone(),
        ingestor,
        scheduler,
        analytics,
        defaults: CrawlConfig::default(),
    };

    (create_routes(state), store)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _store) = setup_app().await;
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_quick_crawl_reports_counts() {
    let (app, _store) = setup_app().await;
    let response = app
        .oneshot(post_json("/crawl/quick", json!({"keyword": "阿莫西林"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["method"], "endpoint");
    assert_eq!(body["prices_written"], 3);
}

#[tokio::test]
async fn test_empty_keyword_is_bad_request() {
    let (app, _store) = setup_app().await;
    let response = app
        .oneshot(post_json("/crawl/smart", json!({"keyword": "  "})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn test_upstream_failure_maps_to_bad_gateway() {
    let (app, _store) = setup_app().await;
    let response = app
        .oneshot(post_json("/crawl/full", json!({"keyword": "上游坏了"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "upstream");
}

#[tokio::test]
async fn test_batch_task_flow() {
    let (app, store) = setup_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/crawl/batch",
            json!({"keywords": ["阿莫西林", "布洛芬"], "name": "nightly"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    // The snapshot endpoint serves the task while it runs and after.
    for _ in 0..200 {
        let task = store
            .get_task(task_id.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        if task.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let response = app
        .clone()
        .oneshot(get(&format!("/tasks/{task_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], "nightly");
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["completed_keywords"], 2);
}

#[tokio::test]
async fn test_cancel_unknown_task_is_not_found() {
    let (app, _store) = setup_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/tasks/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_task_id_is_bad_request() {
    let (app, _store) = setup_app().await;
    let response = app.oneshot(get("/tasks/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

async fn seed_drug(store: &SqliteStore) -> i64 {
    let drug_id = store
        .upsert_drug(
            &IdentityKey::new("阿莫西林胶囊", "0.25g*24粒", "华北制药"),
            &DrugFields {
                upstream_id: None,
                category: Category::Drug,
                category_confidence: 0.85,
                category_source: "keyword:dosage".to_string(),
                approval_number: None,
            },
        )
        .await
        .unwrap();
    store
        .append_prices(
            drug_id,
            &[
                PriceObservation {
                    price_cents: 1250,
                    supplier_name: "甲商".to_string(),
                    supplier_id: Some("p1".to_string()),
                    source_url: None,
                    crawled_at: Utc::now(),
                },
                PriceObservation {
                    price_cents: 1500,
                    supplier_name: "乙商".to_string(),
                    supplier_id: Some("p2".to_string()),
                    source_url: None,
                    crawled_at: Utc::now(),
                },
            ],
        )
        .await
        .unwrap();
    drug_id
}

#[tokio::test]
async fn test_search_and_prices_and_compare() {
    let (app, store) = setup_app().await;
    let drug_id = seed_drug(&store).await;

    let response = app
        .clone()
        .oneshot(get("/search?q=%E9%98%BF%E8%8E%AB%E8%A5%BF%E6%9E%97"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/drugs/{drug_id}/prices")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let prices = body.as_array().unwrap();
    assert_eq!(prices.len(), 2);
    assert_eq!(prices[0]["price"], 12.5);

    let response = app
        .clone()
        .oneshot(get(&format!("/compare?drug_id={drug_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["suppliers"].as_array().unwrap().len(), 2);
    assert_eq!(body["diff_pct"], 20.0);

    let response = app
        .clone()
        .oneshot(get("/compare?drug_id=424242"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_alerts_endpoint() {
    let (app, _store) = setup_app().await;
    let response = app.oneshot(get("/monitor/alerts?days=7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body.as_array().unwrap().is_empty());
}
