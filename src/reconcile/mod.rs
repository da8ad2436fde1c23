//! Product reconciliation between the product layer and the Store.
//!
//! A pass loads the selected configurable products with their variants,
//! resolves attribute sets once per name, fetches the remote snapshot, decides
//! a status per record, runs the remote calls (one by one or through bulk
//! jobs) and writes the outcome back. Failures stay on the record they concern
//! and end up in the pass's log book.

pub mod attributes;
pub mod bulk_export;
pub mod decide;
pub mod execute;
pub mod payload;
pub mod persist;
pub mod record;
pub mod sku;

use anyhow::Context;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{info, instrument};

use crate::bulk;
use crate::config::Config;
use crate::db::catalog::{self, NewConfigurable, NewSimple};
use crate::db::{self, OwnerKind, Pool};
use crate::model::{ExportStatus, Instance};
use crate::store::{api, StoreService};
use attributes::AttributeCatalog;
use record::ConfigurableRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// One REST call per change, for small operator-triggered selections.
    Direct,
    /// Bulk jobs, confirmed by a later poll.
    Bulk,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("There are some API requests still processing by Magento. Please try again later.")]
    BulkInProgress,

    #[error("{count} products selected; direct export is limited to {limit}")]
    TooManyForDirect { count: usize, limit: usize },

    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub parents: usize,
    pub variants: usize,
    pub exported: usize,
    pub in_magento: usize,
    pub errors: usize,
    pub log_books: Vec<i64>,
}

impl ExportReport {
    fn count(&mut self, records: &[ConfigurableRecord]) {
        for rec in records {
            self.parents += 1;
            self.tally(rec.outcome.exported, rec.status, rec.messages.is_empty());
            for variant in &rec.variants {
                self.variants += 1;
                self.tally(
                    variant.outcome.exported,
                    variant.status,
                    variant.messages.is_empty(),
                );
            }
        }
    }

    fn tally(&mut self, exported: bool, status: ExportStatus, clean: bool) {
        if !clean {
            self.errors += 1;
        } else if exported {
            self.exported += 1;
        } else if status == ExportStatus::InMagento {
            self.in_magento += 1;
        }
    }
}

/// Runs the decision steps over a chunk. Everything here is local apart
/// from option creation.
async fn decide_chunk(
    store: &dyn StoreService,
    catalog: &mut AttributeCatalog,
    records: &mut [ConfigurableRecord],
) {
    for rec in records.iter_mut() {
        decide::decide_configurable(rec, catalog);
        let mut variants = std::mem::take(&mut rec.variants);
        for variant in variants.iter_mut() {
            decide::decide_simple(rec, variant);
        }
        rec.variants = variants;

        decide::check_configurable(rec, catalog);
        let set = rec
            .product
            .attribute_set
            .as_deref()
            .and_then(|name| catalog.set(name));
        let mut variants = std::mem::take(&mut rec.variants);
        for variant in variants.iter_mut() {
            decide::check_simple(rec, variant, set);
        }
        rec.variants = variants;

        execute::prepare_variants(store, catalog, rec).await;
        decide::reject_duplicate_combinations(rec, catalog);
    }
}

/// Exports the active configurable products of an instance (or the given
/// subset) with their variants. Attribute sets are resolved once for the
/// whole pass; remote snapshots are fetched per chunk.
#[instrument(skip_all, fields(instance = %instance.name, mode = ?mode))]
pub async fn export_products(
    pool: &Pool,
    store: &dyn StoreService,
    cfg: &Config,
    instance: &Instance,
    ids: Option<&[i64]>,
    mode: ExportMode,
) -> Result<ExportReport, ExportError> {
    let parents = catalog::list_configurables(pool, instance.id, ids).await?;
    if mode == ExportMode::Direct && parents.len() > cfg.sync.direct_export_limit {
        return Err(ExportError::TooManyForDirect {
            count: parents.len(),
            limit: cfg.sync.direct_export_limit,
        });
    }
    if mode == ExportMode::Bulk && bulk::latest_job_open(pool, store, instance.id).await? {
        return Err(ExportError::BulkInProgress);
    }

    let records = record::load_records(pool, parents).await?;
    let names: BTreeSet<String> = records
        .iter()
        .filter_map(|r| r.product.attribute_set.clone())
        .collect();
    let mut catalog = AttributeCatalog::load(store, names.iter().map(String::as_str)).await;

    let mut report = ExportReport::default();
    for mut chunk in record::chunk_by_variants(records, cfg.sync.export_batch_size) {
        record::fetch_remote(store, &mut chunk).await;
        decide_chunk(store, &mut catalog, &mut chunk).await;

        match mode {
            ExportMode::Direct => {
                for rec in chunk.iter_mut() {
                    execute::export_direct(store, cfg, &catalog, rec).await;
                }
            }
            ExportMode::Bulk => {
                bulk_export::export_bulk(pool, store, cfg, instance.id, &catalog, &mut chunk)
                    .await?;
            }
        }

        if let Some(book) = persist::persist(pool, instance.id, &chunk).await? {
            report.log_books.push(book);
        }
        report.count(&chunk);
    }
    info!(
        parents = report.parents,
        variants = report.variants,
        exported = report.exported,
        errors = report.errors,
        "product export finished"
    );
    Ok(report)
}

/// Registers a local template and its variants in the product layer. A new
/// template gets the first free SKU derived from `base_sku`; a known one is
/// refreshed and flagged for a forced update.
#[instrument(skip_all, fields(template = %template.template_ref))]
pub async fn register_template(
    pool: &Pool,
    instance_id: i64,
    base_sku: &str,
    template: &NewConfigurable,
    variants: &[NewSimple],
) -> anyhow::Result<i64> {
    let mut tx = pool.begin().await?;
    let id = match catalog::configurable_by_template_tx(&mut tx, instance_id, &template.template_ref)
        .await?
    {
        Some(id) => {
            catalog::refresh_configurable_tx(&mut tx, id, template).await?;
            id
        }
        None => {
            let sku = sku::unique_sku_tx(&mut tx, instance_id, base_sku).await?;
            info!(%sku, "registering configurable product");
            catalog::insert_configurable_tx(&mut tx, instance_id, &sku, template).await?
        }
    };
    for variant in variants {
        catalog::upsert_simple_tx(&mut tx, instance_id, id, variant).await?;
    }
    tx.commit().await.context("commit template registration")?;
    Ok(id)
}

/// Deletes a product from the Store. A product the Store no longer knows
/// counts as deleted.
#[instrument(skip_all, fields(owner = owner.as_str(), id = id))]
pub async fn delete_remote_product(
    pool: &Pool,
    store: &dyn StoreService,
    owner: OwnerKind,
    id: i64,
) -> anyhow::Result<()> {
    let sku = match owner {
        OwnerKind::Configurable => catalog::get_configurable(pool, id).await?.sku,
        OwnerKind::Simple => catalog::get_simple(pool, id).await?.sku,
    };
    match api::delete_product(store, &sku).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => info!(%sku, "product already gone from the Store"),
        Err(e) => return Err(e).with_context(|| format!("delete product {sku}")),
    }
    catalog::mark_product_deleted(pool, owner, id).await?;
    db::unlink_bulk_entity(pool, owner, id).await?;
    Ok(())
}
