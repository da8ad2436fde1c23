//! Cron-driven draining of queued lines.
//!
//! One call to [`process_tick`] drains as many queues of one kind as fit in
//! the tick budget and then returns. Lines left in `draft` are picked up by the
//! next tick; finished lines are never revisited.

use anyhow::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::db::{self, Pool, QueueLineRow, QueueRow};
use crate::logbook::{Direction, PassLog};
use crate::model::{EntityKind, Instance, LineState};

/// Seconds kept free before the scheduler fires again.
const BUDGET_MARGIN_SECS: u64 = 60;

/// Result of handling one queue line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Materialised as the given Ledger entity reference.
    Done(String),
    /// Terminal per-line failure.
    Failed(String),
    /// Nothing to do for this line.
    Cancelled(String),
    /// Transient failure; the line stays in `draft`.
    Retry(String),
}

#[async_trait]
pub trait LineHandler: Send + Sync {
    fn kind(&self) -> EntityKind;

    async fn handle(
        &self,
        pool: &Pool,
        instance: &Instance,
        line: &QueueLineRow,
    ) -> Result<LineOutcome>;
}

/// Wall-clock allowance of one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickBudget {
    started: Instant,
    limit: Option<Duration>,
}

impl TickBudget {
    /// Budget of `cron_interval - 60s`.
    pub fn from_cron_interval(cron_interval_seconds: u64) -> Self {
        Self::with_limit(Duration::from_secs(
            cron_interval_seconds.saturating_sub(BUDGET_MARGIN_SECS),
        ))
    }

    pub fn with_limit(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit: Some(limit),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn exhausted(&self) -> bool {
        self.limit.map_or(false, |limit| self.elapsed() >= limit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub queues_drained: u32,
    pub done: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub retried: u32,
    /// Queues flagged for operator action during this tick.
    pub escalated: Vec<i64>,
    /// The budget ran out before every selected queue was drained.
    pub yielded: bool,
}

/// Drains queues of `handler.kind()` oldest line first until the budget is spent.
#[instrument(skip_all, fields(kind = handler.kind().as_str(), instance = instance.id))]
pub async fn process_tick(
    pool: &Pool,
    instance: &Instance,
    max_process_count: i64,
    handler: &dyn LineHandler,
    budget: TickBudget,
) -> Result<TickReport> {
    let mut report = TickReport::default();
    let queue_ids = db::queues_to_process(pool, instance.id, handler.kind()).await?;

    for queue_id in queue_ids {
        let attempts = db::bump_process_count(pool, queue_id).await?;
        let queue = db::get_queue(pool, queue_id).await?;

        if attempts > max_process_count {
            escalate(pool, instance, &queue, attempts).await?;
            report.escalated.push(queue_id);
            continue;
        }

        let finished = drain_queue(pool, instance, &queue, handler, &budget, &mut report).await?;
        report.queues_drained += 1;

        if !finished || budget.exhausted() {
            info!(elapsed = ?budget.elapsed(), "tick budget exhausted, yielding");
            report.yielded = true;
            break;
        }
    }

    info!(
        queues = report.queues_drained,
        done = report.done,
        failed = report.failed,
        cancelled = report.cancelled,
        retried = report.retried,
        escalated = report.escalated.len(),
        "tick finished"
    );
    Ok(report)
}

/// Returns false when the budget ran out with draft lines still waiting.
async fn drain_queue(
    pool: &Pool,
    instance: &Instance,
    queue: &QueueRow,
    handler: &dyn LineHandler,
    budget: &TickBudget,
    report: &mut TickReport,
) -> Result<bool> {
    let mut log = PassLog::new();
    let mut finished = true;

    for line in db::draft_lines(pool, queue.id).await? {
        if budget.exhausted() {
            finished = false;
            break;
        }
        match handler.handle(pool, instance, &line).await? {
            LineOutcome::Done(entity) => {
                db::finish_line(pool, line.id, LineState::Done, Some(entity.as_str())).await?;
                report.done += 1;
            }
            LineOutcome::Failed(message) => {
                log.push_line(line.id, &line.remote_ref, message);
                db::finish_line(pool, line.id, LineState::Failed, None).await?;
                report.failed += 1;
            }
            LineOutcome::Cancelled(message) => {
                log.push_line(line.id, &line.remote_ref, message);
                db::finish_line(pool, line.id, LineState::Cancelled, None).await?;
                report.cancelled += 1;
            }
            LineOutcome::Retry(message) => {
                log.push_line(line.id, &line.remote_ref, message);
                report.retried += 1;
            }
        }
    }

    let book = log
        .persist(
            pool,
            instance.id,
            Direction::Import,
            queue.kind.as_str(),
            queue.log_book_id,
        )
        .await?;
    if book != queue.log_book_id {
        db::set_queue_log_book(pool, queue.id, book).await?;
    }
    Ok(finished)
}

async fn escalate(pool: &Pool, instance: &Instance, queue: &QueueRow, attempts: i64) -> Result<()> {
    db::flag_action_required(pool, queue.id).await?;
    warn!(
        queue_id = queue.id,
        queue = %queue.name,
        attempts,
        "queue needs operator action"
    );
    let mut log = PassLog::new();
    log.push(
        Some(queue.name.as_str()),
        format!(
            "Queue {} could not be completed after {} attempts. Check the failed lines and reset the queue manually.",
            queue.name,
            attempts - 1
        ),
    );
    let book = log
        .persist(
            pool,
            instance.id,
            Direction::Import,
            queue.kind.as_str(),
            queue.log_book_id,
        )
        .await?;
    if book != queue.log_book_id {
        db::set_queue_log_book(pool, queue.id, book).await?;
    }
    Ok(())
}

/// Operator reset of an escalated queue.
#[instrument(skip_all)]
pub async fn reset_action_required(pool: &Pool, queue_id: i64) -> Result<()> {
    db::clear_action_required(pool, queue_id).await?;
    info!(queue_id, "queue reset by operator");
    Ok(())
}

/// Cancels every line of the queue still waiting in `draft`.
#[instrument(skip_all)]
pub async fn cancel_queue(pool: &Pool, queue_id: i64) -> Result<u64> {
    let cancelled = db::cancel_draft_lines(pool, queue_id).await?;
    info!(queue_id, cancelled, "draft lines cancelled");
    Ok(cancelled)
}

/// Removes processed lines and the queues they leave empty.
#[instrument(skip_all)]
pub async fn purge(pool: &Pool, instance_id: i64) -> Result<(u64, u64)> {
    let (lines, queues) = db::purge_processed(pool, instance_id).await?;
    info!(lines, queues, "purged processed lines");
    Ok((lines, queues))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_keeps_a_minute_free() {
        let budget = TickBudget::from_cron_interval(60);
        assert!(budget.exhausted());
        let budget = TickBudget::from_cron_interval(600);
        assert!(!budget.exhausted());
        assert!(!TickBudget::unlimited().exhausted());
    }

    #[test]
    fn zero_limit_is_exhausted_immediately() {
        assert!(TickBudget::with_limit(Duration::ZERO).exhausted());
    }
}
