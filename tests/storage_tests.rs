use chrono::Utc;
use pharma_price_ops::domain::{Category, CrawlTask, TaskStatus};
use pharma_price_ops::engine::IdentityKey;
use pharma_price_ops::storage::{
    Database, DatabaseConfig, DrugFields, DrugFilter, DrugRepository, PriceObservation,
    PriceRepository, SqliteStore, TaskRepository, WatchListRepository,
};
use uuid::Uuid;

async fn setup_store() -> SqliteStore {
    let database = Database::new(&DatabaseConfig::sqlite_memory())
        .await
        .expect("Failed to create test database");
    SqliteStore::new(database)
}

fn identity(name: &str, spec: &str, manufacturer: &str) -> IdentityKey {
    IdentityKey::new(name, spec, manufacturer)
}

fn drug_fields(category: Category, confidence: f64) -> DrugFields {
    DrugFields {
        upstream_id: None,
        category,
        category_confidence: confidence,
        category_source: "keyword:dosage".to_string(),
        approval_number: None,
    }
}

fn observation(supplier: &str, cents: i64) -> PriceObservation {
    PriceObservation {
        price_cents: cents,
        supplier_name: supplier.to_string(),
        supplier_id: Some(format!("id-{supplier}")),
        source_url: None,
        crawled_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_upsert_returns_same_row_for_same_identity() {
    let store = setup_store().await;
    let identity = identity("阿莫西林胶囊", "0.25g*24粒", "华北制药");

    let first = store
        .upsert_drug(&identity, &drug_fields(Category::Drug, 0.85))
        .await
        .unwrap();
    let second = store
        .upsert_drug(&identity, &drug_fields(Category::Drug, 0.85))
        .await
        .unwrap();

    assert_eq!(first, second);

    let drugs = store.list_drugs(&DrugFilter::default()).await.unwrap();
    assert_eq!(drugs.len(), 1);
}

#[tokio::test]
async fn test_distinct_identities_create_distinct_rows() {
    let store = setup_store().await;

    let cream = identity("皇后牌 片仔癀 珍珠霜 25g", "25g", "漳州片仔癀");
    let pill = identity("片仔癀 3g*1粒(RX)", "3g*1粒", "漳州片仔癀");

    let a = store
        .upsert_drug(&cream, &drug_fields(Category::Cosmetic, 0.90))
        .await
        .unwrap();
    let b = store
        .upsert_drug(&pill, &drug_fields(Category::Drug, 1.00))
        .await
        .unwrap();

    assert_ne!(a, b);

    let stored_a = store.get_drug(a).await.unwrap().unwrap();
    let stored_b = store.get_drug(b).await.unwrap().unwrap();
    assert_eq!(stored_a.category, Category::Cosmetic);
    assert_eq!(stored_b.category, Category::Drug);
}

#[tokio::test]
async fn test_category_only_upgrades_with_confidence() {
    let store = setup_store().await;
    let identity = identity("某某产品", "", "");

    let id = store
        .upsert_drug(&identity, &drug_fields(Category::Drug, 0.85))
        .await
        .unwrap();

    // Lower-confidence revisit must not downgrade.
    store
        .upsert_drug(&identity, &drug_fields(Category::HealthProduct, 0.50))
        .await
        .unwrap();
    let drug = store.get_drug(id).await.unwrap().unwrap();
    assert_eq!(drug.category, Category::Drug);
    assert_eq!(drug.category_confidence, 0.85);

    // Equal-or-higher confidence wins.
    store
        .upsert_drug(&identity, &drug_fields(Category::Cosmetic, 0.95))
        .await
        .unwrap();
    let drug = store.get_drug(id).await.unwrap().unwrap();
    assert_eq!(drug.category, Category::Cosmetic);
}

#[tokio::test]
async fn test_approval_number_set_only_when_null() {
    let store = setup_store().await;
    let identity = identity("片仔癀", "3g*1粒", "漳州片仔癀");

    let mut fields = drug_fields(Category::Drug, 0.85);
    let id = store.upsert_drug(&identity, &fields).await.unwrap();

    fields.approval_number = Some("国药准字Z35020243".to_string());
    store.upsert_drug(&identity, &fields).await.unwrap();
    let drug = store.get_drug(id).await.unwrap().unwrap();
    assert_eq!(drug.approval_number.as_deref(), Some("国药准字Z35020243"));

    // A different later value must not overwrite.
    fields.approval_number = Some("国药准字H99999999".to_string());
    store.upsert_drug(&identity, &fields).await.unwrap();
    let drug = store.get_drug(id).await.unwrap().unwrap();
    assert_eq!(drug.approval_number.as_deref(), Some("国药准字Z35020243"));
}

#[tokio::test]
async fn test_price_history_is_append_only() {
    let store = setup_store().await;
    let identity = identity("阿莫西林胶囊", "0.25g*24粒", "华北制药");
    let id = store
        .upsert_drug(&identity, &drug_fields(Category::Drug, 0.85))
        .await
        .unwrap();

    let first = store
        .append_prices(id, &[observation("甲商", 1250), observation("乙商", 1300)])
        .await
        .unwrap();
    assert_eq!(first, 2);

    // The same supplier/price pair from a later crawl appends a new row.
    let second = store
        .append_prices(id, &[observation("甲商", 1250)])
        .await
        .unwrap();
    assert_eq!(second, 1);

    let prices = store.get_prices(id, true).await.unwrap();
    assert_eq!(prices.len(), 3);
}

#[tokio::test]
async fn test_intra_batch_dedup() {
    let store = setup_store().await;
    let identity = identity("阿莫西林胶囊", "0.25g*24粒", "华北制药");
    let id = store
        .upsert_drug(&identity, &drug_fields(Category::Drug, 0.85))
        .await
        .unwrap();

    // One crawl seeing the same card twice writes it once.
    let inserted = store
        .append_prices(
            id,
            &[
                observation("甲商", 1250),
                observation("甲商", 1250),
                observation("甲商", 1300),
            ],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 2);
}

#[tokio::test]
async fn test_persisted_offer_reads_back_equal() {
    let store = setup_store().await;
    let identity = identity("【热销】阿莫西林  胶囊", "0.25G×24粒", " 华北制药 ");

    let outcome = store
        .persist_identity(
            &identity,
            &drug_fields(Category::Drug, 0.85),
            &[observation("甲商", 1250)],
        )
        .await
        .unwrap();

    let drug = store.get_drug(outcome.drug_id).await.unwrap().unwrap();
    assert_eq!(drug.name, "阿莫西林 胶囊");
    assert_eq!(drug.specification, "0.25g*24粒");
    assert_eq!(drug.manufacturer, "华北制药");

    let prices = store.get_prices(outcome.drug_id, true).await.unwrap();
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].price().to_string(), "12.50");
}

#[tokio::test]
async fn test_search_covers_aliases() {
    let store = setup_store().await;
    let identity = identity("片仔癀", "3g*1粒", "漳州片仔癀");
    let id = store
        .upsert_drug(&identity, &drug_fields(Category::Drug, 1.00))
        .await
        .unwrap();
    store.add_alias(id, "漳州神药").await.unwrap();

    let by_name = store.search_drugs("片仔癀", None).await.unwrap();
    assert_eq!(by_name.len(), 1);

    let by_alias = store.search_drugs("神药", None).await.unwrap();
    assert_eq!(by_alias.len(), 1);
    assert_eq!(by_alias[0].id, id);

    let wrong_category = store
        .search_drugs("片仔癀", Some(Category::Cosmetic))
        .await
        .unwrap();
    assert!(wrong_category.is_empty());
}

#[tokio::test]
async fn test_task_round_trip_and_accounting() {
    let store = setup_store().await;

    let task = CrawlTask {
        id: Uuid::new_v4(),
        name: "nightly".to_string(),
        keywords: vec!["阿莫西林".to_string(), "布洛芬".to_string()],
        status: TaskStatus::Pending,
        total_keywords: 2,
        completed_keywords: 0,
        failed_keywords: 0,
        total_items: 0,
        started_at: None,
        completed_at: None,
        last_error: None,
        created_at: Utc::now(),
    };
    store.create_task(&task).await.unwrap();

    store.mark_running(task.id).await.unwrap();
    store.record_keyword_success(task.id, 12).await.unwrap();
    store
        .record_keyword_failure(task.id, "upstream 502")
        .await
        .unwrap();
    store.finish_task(task.id, TaskStatus::Succeeded).await.unwrap();

    let stored = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Succeeded);
    assert_eq!(stored.completed_keywords, 1);
    assert_eq!(stored.failed_keywords, 1);
    assert_eq!(stored.total_items, 12);
    assert_eq!(stored.last_error.as_deref(), Some("upstream 502"));
    assert_eq!(stored.keywords, task.keywords);
    assert!(stored.completed_keywords + stored.failed_keywords <= stored.total_keywords);
}

#[tokio::test]
async fn test_watch_list_round_trip() {
    let store = setup_store().await;

    let id = store
        .add_watch_item("阿莫西林", Some("drug"), 2)
        .await
        .unwrap();
    store.add_watch_item("布洛芬", None, 0).await.unwrap();

    // Duplicate keyword resolves to the existing row.
    let dup = store.add_watch_item("阿莫西林", None, 1).await.unwrap();
    assert_eq!(id, dup);

    let items = store.list_watch_items(true).await.unwrap();
    assert_eq!(items.len(), 2);
    // Urgent first.
    assert_eq!(items[0].keyword, "阿莫西林");

    store.set_watch_enabled(id, false).await.unwrap();
    let enabled = store.list_watch_items(true).await.unwrap();
    assert_eq!(enabled.len(), 1);

    let now = Utc::now();
    store.touch_watch_item("布洛芬", now).await.unwrap();
    let all = store.list_watch_items(false).await.unwrap();
    let ibuprofen = all.iter().find(|i| i.keyword == "布洛芬").unwrap();
    assert!(ibuprofen.last_crawled_at.is_some());
}
