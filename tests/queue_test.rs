mod common;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{page, setup, RecordingStore};
use reqwest::Method;
use serde_json::json;
use std::time::Duration;
use store_sync::db::{self, Pool, QueueLineRow};
use store_sync::ingest::{self, TimeWindow};
use store_sync::model::{EntityKind, Instance, QueueState};
use store_sync::queue::{self, LineHandler, LineOutcome, TickBudget};

/// Answers every line with the same outcome.
struct FixedHandler(LineOutcome);

#[async_trait]
impl LineHandler for FixedHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::Orders
    }

    async fn handle(&self, _pool: &Pool, _instance: &Instance, _line: &QueueLineRow) -> Result<LineOutcome> {
        Ok(self.0.clone())
    }
}

/// Completes a line only once the budget would already be spent.
struct SlowHandler;

#[async_trait]
impl LineHandler for SlowHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::Orders
    }

    async fn handle(&self, _pool: &Pool, _instance: &Instance, line: &QueueLineRow) -> Result<LineOutcome> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(LineOutcome::Done(format!("order:{}", line.remote_ref)))
    }
}

async fn enqueue_orders(pool: &Pool, instance: &mut Instance, count: usize, total: usize) {
    let cfg = common::example_config();
    let store = RecordingStore::new();
    let items = (0..count)
        .map(|i| json!({ "increment_id": format!("{}-{i}", instance.id), "items": [] }))
        .collect();
    store
        .push(Method::GET, "/V1/orders", Ok(page(items, total)))
        .await;
    let to = NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    ingest::ingest_orders(pool, &store, &cfg, instance, TimeWindow::until(to))
        .await
        .unwrap();
}

#[tokio::test]
async fn fourth_selection_escalates_and_is_never_drained_again() {
    let (pool, cfg, mut instance) = setup().await;
    enqueue_orders(&pool, &mut instance, 3, 3).await;
    let handler = FixedHandler(LineOutcome::Retry("store timeout".into()));
    let max = cfg.app.max_queue_process_count;

    for _ in 0..3 {
        let report = queue::process_tick(&pool, &instance, max, &handler, TickBudget::unlimited())
            .await
            .unwrap();
        assert!(report.escalated.is_empty());
        assert_eq!(report.retried, 3);
    }
    let queue_id = db::list_queues(&pool, instance.id, None).await.unwrap()[0].queue.id;
    assert!(!db::get_queue(&pool, queue_id).await.unwrap().action_required);

    let report = queue::process_tick(&pool, &instance, max, &handler, TickBudget::unlimited())
        .await
        .unwrap();
    assert_eq!(report.escalated, vec![queue_id]);
    assert_eq!(report.retried, 0);
    let queue = db::get_queue(&pool, queue_id).await.unwrap();
    assert!(queue.action_required);
    assert!(queue.log_book_id.is_some());

    let report = queue::process_tick(&pool, &instance, max, &handler, TickBudget::unlimited())
        .await
        .unwrap();
    assert!(report.escalated.is_empty());
    assert_eq!(report.queues_drained, 0);
    assert_eq!(db::get_queue(&pool, queue_id).await.unwrap().process_count, 4);

    queue::reset_action_required(&pool, queue_id).await.unwrap();
    let queue = db::get_queue(&pool, queue_id).await.unwrap();
    assert!(!queue.action_required);
    assert_eq!(queue.process_count, 0);
}

#[tokio::test]
async fn completed_lines_complete_the_queue() {
    let (pool, cfg, mut instance) = setup().await;
    enqueue_orders(&pool, &mut instance, 4, 4).await;
    let handler = FixedHandler(LineOutcome::Done("order:1".into()));

    let report = queue::process_tick(
        &pool,
        &instance,
        cfg.app.max_queue_process_count,
        &handler,
        TickBudget::unlimited(),
    )
    .await
    .unwrap();
    assert_eq!(report.done, 4);

    let summary = &db::list_queues(&pool, instance.id, None).await.unwrap()[0];
    assert_eq!(summary.state, QueueState::Completed);
    // A clean pass leaves no log book behind.
    assert_eq!(summary.queue.log_book_id, None);
}

#[tokio::test]
async fn failed_lines_are_logged_and_stay_failed() {
    let (pool, cfg, mut instance) = setup().await;
    enqueue_orders(&pool, &mut instance, 2, 2).await;
    let handler = FixedHandler(LineOutcome::Failed("unknown product".into()));

    queue::process_tick(
        &pool,
        &instance,
        cfg.app.max_queue_process_count,
        &handler,
        TickBudget::unlimited(),
    )
    .await
    .unwrap();

    let summary = &db::list_queues(&pool, instance.id, None).await.unwrap()[0];
    assert_eq!(summary.state, QueueState::Failed);
    let book = summary.queue.log_book_id.unwrap();
    assert_eq!(db::count_log_lines(&pool, book).await.unwrap(), 2);
}

#[tokio::test]
async fn exhausted_budget_yields_with_drafts_untouched() {
    let (pool, cfg, mut instance) = setup().await;
    enqueue_orders(&pool, &mut instance, 3, 3).await;

    let report = queue::process_tick(
        &pool,
        &instance,
        cfg.app.max_queue_process_count,
        &SlowHandler,
        TickBudget::with_limit(Duration::from_millis(10)),
    )
    .await
    .unwrap();
    assert!(report.yielded);
    assert_eq!(report.done, 1);

    let summary = &db::list_queues(&pool, instance.id, None).await.unwrap()[0];
    assert_eq!(summary.counts.draft, 2);
    assert_eq!(summary.state, QueueState::PartiallyCompleted);

    // The next tick resumes where this one stopped.
    let report = queue::process_tick(
        &pool,
        &instance,
        cfg.app.max_queue_process_count,
        &SlowHandler,
        TickBudget::unlimited(),
    )
    .await
    .unwrap();
    assert_eq!(report.done, 2);
    let summary = &db::list_queues(&pool, instance.id, None).await.unwrap()[0];
    assert_eq!(summary.state, QueueState::Completed);
}

#[tokio::test]
async fn cancel_and_purge_clear_the_queue() {
    let (pool, _cfg, mut instance) = setup().await;
    enqueue_orders(&pool, &mut instance, 2, 2).await;
    let queue_id = db::list_queues(&pool, instance.id, None).await.unwrap()[0].queue.id;

    assert_eq!(queue::cancel_queue(&pool, queue_id).await.unwrap(), 2);
    assert_eq!(
        db::queue_state(&pool, queue_id).await.unwrap(),
        QueueState::Completed
    );
    let (lines, queues) = queue::purge(&pool, instance.id).await.unwrap();
    assert_eq!((lines, queues), (2, 1));
    assert!(db::list_queues(&pool, instance.id, None).await.unwrap().is_empty());
}
