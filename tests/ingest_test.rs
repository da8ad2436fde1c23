mod common;

use chrono::NaiveDate;
use common::{page, setup, RecordingStore};
use reqwest::Method;
use serde_json::json;
use store_sync::db;
use store_sync::ingest::{self, TimeWindow};
use store_sync::model::{EntityKind, QueueState};
use store_sync::store::StoreError;

fn window() -> TimeWindow {
    let to = NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    TimeWindow::until(to)
}

fn orders(range: std::ops::Range<usize>) -> Vec<serde_json::Value> {
    range
        .map(|i| json!({ "increment_id": format!("1000{i:04}"), "entity_id": i, "items": [] }))
        .collect()
}

#[tokio::test]
async fn orders_window_rolls_over_into_three_queues() {
    let (pool, cfg, mut instance) = setup().await;
    let store = RecordingStore::new();
    for chunk in [0..50, 50..100, 100..120] {
        store
            .push(Method::GET, "/V1/orders", Ok(page(orders(chunk), 120)))
            .await;
    }

    let report = ingest::ingest_orders(&pool, &store, &cfg, &mut instance, window())
        .await
        .unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(report.lines_created, 120);
    assert_eq!(store.calls_to(Method::GET, "/V1/orders").await.len(), 3);

    let queues = db::list_queues(&pool, instance.id, Some(EntityKind::Orders))
        .await
        .unwrap();
    let sizes: Vec<i64> = queues.iter().map(|q| q.counts.total()).collect();
    assert_eq!(sizes, vec![50, 50, 20]);
    assert!(queues.iter().all(|q| q.state == QueueState::Draft));

    // The cursor starts over for the next window.
    let stored = db::load_instance(&pool, instance.id).await.unwrap();
    assert_eq!(stored.page(EntityKind::Orders), 1);
}

#[tokio::test]
async fn pages_carry_page_size_and_cursor() {
    let (pool, cfg, mut instance) = setup().await;
    let store = RecordingStore::new();
    store
        .push(Method::GET, "/V1/orders", Ok(page(orders(0..10), 10)))
        .await;

    ingest::ingest_orders(&pool, &store, &cfg, &mut instance, window())
        .await
        .unwrap();

    let call = &store.calls().await[0];
    let query: std::collections::HashMap<_, _> = call.query.iter().cloned().collect();
    assert_eq!(query.get("searchCriteria[pageSize]").map(String::as_str), Some("50"));
    assert_eq!(query.get("searchCriteria[currentPage]").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn unreachable_store_creates_no_lines() {
    let (pool, cfg, mut instance) = setup().await;
    let store = RecordingStore::new();
    store
        .push(
            Method::GET,
            "/V1/orders",
            Err(StoreError::Transport("connection refused".into())),
        )
        .await;

    let err = ingest::ingest_orders(&pool, &store, &cfg, &mut instance, window())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let queues = db::list_queues(&pool, instance.id, None).await.unwrap();
    assert!(queues.is_empty());
}

#[tokio::test]
async fn draft_duplicates_are_not_enqueued_twice() {
    let (pool, cfg, mut instance) = setup().await;
    let store = RecordingStore::new();
    for _ in 0..2 {
        store
            .push(Method::GET, "/V1/orders", Ok(page(orders(0..5), 5)))
            .await;
    }

    let first = ingest::ingest_orders(&pool, &store, &cfg, &mut instance, window())
        .await
        .unwrap();
    let second = ingest::ingest_orders(&pool, &store, &cfg, &mut instance, window())
        .await
        .unwrap();
    assert_eq!(first.lines_created, 5);
    assert_eq!(second.lines_created, 0);
    assert_eq!(second.duplicates_skipped, 5);
}

#[tokio::test]
async fn products_are_ingested_configurable_pass_first() {
    let (pool, cfg, mut instance) = setup().await;
    let store = RecordingStore::new();
    store
        .push(
            Method::GET,
            "/V1/products",
            Ok(page(vec![json!({ "sku": "CHAIR", "type_id": "configurable" })], 1)),
        )
        .await;
    store
        .push(
            Method::GET,
            "/V1/products",
            Ok(page(vec![json!({ "sku": "CHAIR-RED", "type_id": "simple" })], 1)),
        )
        .await;

    let report = ingest::ingest_products(&pool, &store, &cfg, &mut instance, window(), false)
        .await
        .unwrap();
    assert_eq!(report.lines_created, 2);

    let calls = store.calls().await;
    let type_filter = |i: usize| {
        calls[i]
            .query
            .iter()
            .any(|(_, v)| v == if i == 0 { "configurable" } else { "simple" })
    };
    assert!(type_filter(0));
    assert!(type_filter(1));

    let queue = &db::list_queues(&pool, instance.id, Some(EntityKind::Products))
        .await
        .unwrap()[0];
    let lines = db::lines_of_queue(&pool, queue.queue.id).await.unwrap();
    let refs: Vec<&str> = lines.iter().map(|l| l.remote_ref.as_str()).collect();
    assert_eq!(refs, vec!["CHAIR", "CHAIR-RED"]);
}
