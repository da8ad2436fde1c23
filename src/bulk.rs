//! Tracking of bulk jobs submitted to the Store.
//!
//! Submission and polling only meet through the persisted job uuid. A poll
//! replaces the job's item details wholesale and then applies them to the
//! products the job was linked to.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::db::catalog;
use crate::db::model::{BulkJobDetail, BulkJobRow};
use crate::db::{self, OwnerKind, Pool};
use crate::logbook::{Direction, PassLog};
use crate::model::{BulkItemStatus, ExportStatus};
use crate::store::api;
use crate::store::StoreService;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub polled: usize,
    pub skipped: usize,
    pub complete: usize,
    pub failed: usize,
    pub open: usize,
    pub log_book_id: Option<i64>,
}

/// Details that can no longer change.
pub fn is_final(details: &[BulkJobDetail]) -> bool {
    !details.is_empty() && details.iter().all(|d| d.status != BulkItemStatus::Open)
}

/// Fetches the detailed status of one job and stores it. Returns `None` when
/// the stored details were already final and the Store wasn't asked.
#[instrument(skip_all, fields(job = %job.remote_uuid))]
pub async fn poll_job(
    pool: &Pool,
    store: &dyn StoreService,
    job: &BulkJobRow,
) -> Result<Option<Vec<BulkJobDetail>>> {
    if is_final(&db::bulk_job_details(pool, job.id).await?) {
        debug!("details already final");
        return Ok(None);
    }
    let status = api::bulk_detailed_status(store, &job.remote_uuid)
        .await
        .with_context(|| format!("detailed status of bulk job {}", job.remote_uuid))?;
    let details: Vec<BulkJobDetail> = status
        .operations_list
        .iter()
        .map(|op| BulkJobDetail {
            item_ref: op.id,
            sku: op.sku(),
            status: BulkItemStatus::from_code(op.status),
            message: op.result_message.clone().filter(|m| !m.trim().is_empty()),
        })
        .collect();
    db::replace_bulk_job_details(pool, job.id, &details).await?;
    Ok(Some(details))
}

async fn entity_state(pool: &Pool, owner: OwnerKind, id: i64) -> Result<(String, ExportStatus)> {
    Ok(match owner {
        OwnerKind::Configurable => {
            let p = catalog::get_configurable(pool, id).await?;
            (p.sku, p.status)
        }
        OwnerKind::Simple => {
            let p = catalog::get_simple(pool, id).await?;
            (p.sku, p.status)
        }
    })
}

/// Moves the job's products according to the polled details: a failed item
/// puts its product in `log_error`. A product whose items all completed
/// leaves `in_process` once none of its other jobs has work left.
async fn apply_details(
    pool: &Pool,
    job: &BulkJobRow,
    details: &[BulkJobDetail],
    log: &mut PassLog,
    report: &mut PollReport,
) -> Result<()> {
    for (owner, id) in db::bulk_job_entities(pool, job.id).await? {
        let (sku, status) = entity_state(pool, owner, id).await?;
        let items: Vec<&BulkJobDetail> = details
            .iter()
            .filter(|d| d.sku.as_deref() == Some(sku.as_str()))
            .collect();
        if items.is_empty() {
            continue;
        }
        if let Some(failed) = items.iter().find(|d| d.status.is_failure()) {
            report.failed += 1;
            log.push(
                Some(sku.as_str()),
                format!(
                    "'{}' bulk request failed in Magento. {}",
                    job.topic,
                    failed.message.as_deref().unwrap_or("No message given.")
                ),
            );
            catalog::set_product_status(pool, owner, id, ExportStatus::LogError).await?;
        } else if items.iter().any(|d| d.status == BulkItemStatus::Open) {
            report.open += 1;
        } else if items.iter().all(|d| d.status == BulkItemStatus::Complete) {
            report.complete += 1;
            if status != ExportStatus::InProcess {
                continue;
            }
            let pending = db::pending_bulk_jobs(pool, owner, id, &sku).await?;
            if pending == 0 {
                catalog::set_product_status(pool, owner, id, ExportStatus::InMagento).await?;
            } else {
                debug!(sku = %sku, pending, "other bulk jobs still running");
            }
        }
    }
    Ok(())
}

/// Polls every job of the instance, then applies the fresh details. A job
/// whose poll fails is skipped with a warning; the others still run.
#[instrument(skip_all)]
pub async fn poll_all(pool: &Pool, store: &dyn StoreService, instance_id: i64) -> Result<PollReport> {
    let mut report = PollReport::default();
    let mut polled = Vec::new();
    for job in db::list_bulk_jobs(pool, instance_id).await? {
        match poll_job(pool, store, &job).await {
            Ok(Some(details)) => polled.push((job, details)),
            Ok(None) => report.skipped += 1,
            Err(e) => warn!(job = %job.remote_uuid, error = %e, "bulk poll failed"),
        }
    }
    report.polled = polled.len();

    let mut log = PassLog::new();
    for (job, details) in &polled {
        apply_details(pool, job, details, &mut log, &mut report).await?;
    }
    report.log_book_id = log
        .persist(pool, instance_id, Direction::Export, "bulk jobs", None)
        .await?;
    info!(
        polled = report.polled,
        skipped = report.skipped,
        complete = report.complete,
        failed = report.failed,
        "bulk jobs polled"
    );
    Ok(report)
}

/// Whether the latest job of the instance still has items the Store is
/// working on. The job is polled first so the answer reflects the Store.
/// A job rejected at submission never counts as running.
pub async fn latest_job_open(pool: &Pool, store: &dyn StoreService, instance_id: i64) -> Result<bool> {
    let Some(job) = db::latest_bulk_job(pool, instance_id).await? else {
        return Ok(false);
    };
    if job.submission_errors {
        return Ok(false);
    }
    let details = match poll_job(pool, store, &job).await? {
        Some(details) => details,
        None => db::bulk_job_details(pool, job.id).await?,
    };
    Ok(details.iter().any(|d| d.status == BulkItemStatus::Open))
}

/// Deletes jobs no longer linked to any product.
pub async fn purge_orphans(pool: &Pool) -> Result<u64> {
    let removed = db::delete_orphan_bulk_jobs(pool).await?;
    if removed > 0 {
        info!(removed, "orphan bulk jobs deleted");
    }
    Ok(removed)
}
