//! Writes a finished pass back to the product layer.

use anyhow::Result;
use tracing::instrument;

use super::record::{ConfigurableRecord, SimpleRecord};
use crate::db::catalog;
use crate::db::model::ProductSync;
use crate::db::{OwnerKind, Pool};
use crate::logbook::{Direction, PassLog};
use crate::model::ExportStatus;

/// Final status of a record: any message turns it into `log_error`.
fn final_status(status: ExportStatus, messages: &[String]) -> ExportStatus {
    if messages.is_empty() {
        status
    } else {
        ExportStatus::LogError
    }
}

pub fn configurable_sync(rec: &ConfigurableRecord) -> ProductSync {
    let status = final_status(rec.status, &rec.messages);
    ProductSync {
        id: rec.product.id,
        status,
        remote_id: rec.remote_id().or(rec.product.remote_id),
        website_ids: rec.outcome.website_ids.clone().or_else(|| {
            rec.remote
                .as_ref()
                .map(|r| r.extension_attributes.website_ids.clone())
        }),
        remote_children: Some(rec.children.clone()),
        export_date: rec
            .outcome
            .exported
            .then(|| rec.outcome.export_date.clone())
            .flatten(),
        force_update: rec.force_update && status == ExportStatus::LogError,
    }
}

pub fn simple_sync(rec: &SimpleRecord) -> ProductSync {
    let status = final_status(rec.status, &rec.messages);
    ProductSync {
        id: rec.product.id,
        status,
        remote_id: rec.remote_id().or(rec.product.remote_id),
        website_ids: rec.outcome.website_ids.clone().or_else(|| {
            rec.remote
                .as_ref()
                .map(|r| r.extension_attributes.website_ids.clone())
        }),
        remote_children: None,
        export_date: rec
            .outcome
            .exported
            .then(|| rec.outcome.export_date.clone())
            .flatten(),
        force_update: rec.force_update && status == ExportStatus::LogError,
    }
}

/// Messages of the pass, one line per message, referenced by SKU.
pub fn collect_messages(records: &[ConfigurableRecord]) -> PassLog {
    let mut log = PassLog::new();
    for rec in records {
        for message in &rec.messages {
            log.push(Some(rec.sku()), message.as_str());
        }
        for variant in &rec.variants {
            for message in &variant.messages {
                log.push(Some(variant.sku()), message.as_str());
            }
        }
    }
    log
}

/// Saves every record (one transaction per parent and its variants) and the
/// pass's log book. Returns the log book id, if one was kept.
#[instrument(skip_all, fields(parents = records.len()))]
pub async fn persist(
    pool: &Pool,
    instance_id: i64,
    records: &[ConfigurableRecord],
) -> Result<Option<i64>> {
    for rec in records {
        let mut tx = pool.begin().await?;
        catalog::apply_product_sync_tx(&mut tx, OwnerKind::Configurable, &configurable_sync(rec))
            .await?;
        for variant in &rec.variants {
            catalog::apply_product_sync_tx(&mut tx, OwnerKind::Simple, &simple_sync(variant))
                .await?;
        }
        tx.commit().await?;
    }
    collect_messages(records)
        .persist(pool, instance_id, Direction::Export, "products", None)
        .await
}
