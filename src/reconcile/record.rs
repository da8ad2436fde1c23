//! Per-pass reconciliation records.
//!
//! Built fresh for every export pass from the product layer and the remote
//! snapshot, mutated by the decision and execution steps, then written back
//! and dropped.

use anyhow::Result;
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::db::catalog;
use crate::db::model::{ConfigurableProduct, ProductImage, SimpleProduct, Translation};
use crate::db::{OwnerKind, Pool};
use crate::model::ExportStatus;
use crate::store::api;
use crate::store::model::{RemoteProduct, STORE_DATETIME_FORMAT};
use crate::store::StoreService;

/// SKUs per remote `IN` lookup.
pub const FETCH_CHUNK: usize = 50;

/// What the execution step changed, written back by persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub exported: bool,
    pub export_date: Option<String>,
    pub remote_id: Option<i64>,
    pub website_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleRecord {
    pub product: SimpleProduct,
    pub images: Vec<ProductImage>,
    pub translations: Vec<Translation>,
    pub remote: Option<RemoteProduct>,
    pub status: ExportStatus,
    pub to_export: bool,
    pub force_update: bool,
    pub messages: Vec<String>,
    /// `(attribute_code, option id)` pairs resolved before export.
    pub custom_attributes: Vec<(String, String)>,
    pub outcome: Outcome,
}

impl SimpleRecord {
    pub fn new(product: SimpleProduct, images: Vec<ProductImage>, translations: Vec<Translation>) -> Self {
        Self {
            status: product.status,
            force_update: product.force_update,
            product,
            images,
            translations,
            remote: None,
            to_export: true,
            messages: Vec::new(),
            custom_attributes: Vec::new(),
            outcome: Outcome::default(),
        }
    }

    pub fn sku(&self) -> &str {
        &self.product.sku
    }

    /// Eligible for remote calls in this pass.
    pub fn exportable(&self) -> bool {
        self.to_export && self.messages.is_empty()
    }

    pub fn remote_id(&self) -> Option<i64> {
        self.outcome
            .remote_id
            .or_else(|| self.remote.as_ref().map(|r| r.id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurableRecord {
    pub product: ConfigurableProduct,
    pub images: Vec<ProductImage>,
    pub translations: Vec<Translation>,
    pub variants: Vec<SimpleRecord>,
    pub remote: Option<RemoteProduct>,
    pub attribute_set_id: Option<i64>,
    pub status: ExportStatus,
    pub to_export: bool,
    pub force_update: bool,
    /// The local axis set differs from the options on the remote parent.
    pub axes_changed: bool,
    pub messages: Vec<String>,
    pub outcome: Outcome,
    /// Remote ids of linked children, updated as links are made.
    pub children: Vec<i64>,
}

impl ConfigurableRecord {
    pub fn new(
        product: ConfigurableProduct,
        images: Vec<ProductImage>,
        translations: Vec<Translation>,
        variants: Vec<SimpleRecord>,
    ) -> Self {
        Self {
            status: product.status,
            force_update: product.force_update,
            to_export: !product.do_not_create,
            children: product.remote_children.clone(),
            product,
            images,
            translations,
            variants,
            remote: None,
            attribute_set_id: None,
            axes_changed: false,
            messages: Vec::new(),
            outcome: Outcome::default(),
        }
    }

    pub fn sku(&self) -> &str {
        &self.product.sku
    }

    pub fn exportable(&self) -> bool {
        self.to_export && self.messages.is_empty()
    }

    pub fn remote_id(&self) -> Option<i64> {
        self.outcome
            .remote_id
            .or_else(|| self.remote.as_ref().map(|r| r.id))
    }

    /// Remote snapshot of the parent's link data.
    pub fn link_data(&self) -> &[String] {
        self.remote
            .as_ref()
            .map(|r| r.extension_attributes.configurable_product_link_data.as_slice())
            .unwrap_or_default()
    }

    /// Appends a message to the record owning `(owner, id)`.
    pub fn push_message(&mut self, owner: OwnerKind, id: i64, message: &str) {
        match owner {
            OwnerKind::Configurable if self.product.id == id => self.messages.push(message.to_string()),
            OwnerKind::Configurable => {}
            OwnerKind::Simple => {
                if let Some(variant) = self.variants.iter_mut().find(|v| v.product.id == id) {
                    variant.messages.push(message.to_string());
                }
            }
        }
    }
}

/// Remote `updated_at` is at least the local export date. A missing or
/// unparsable date on either side counts as older than anything.
pub fn remote_is_current(remote_updated_at: Option<&str>, export_date: Option<&str>) -> bool {
    let parse = |raw: Option<&str>| {
        raw.and_then(|s| NaiveDateTime::parse_from_str(s.trim(), STORE_DATETIME_FORMAT).ok())
    };
    match (parse(remote_updated_at), parse(export_date)) {
        (Some(remote), Some(local)) => remote >= local,
        _ => false,
    }
}

/// Loads records for the given parents, dropping parents without active variants.
pub async fn load_records(
    pool: &Pool,
    parents: Vec<ConfigurableProduct>,
) -> Result<Vec<ConfigurableRecord>> {
    let mut records = Vec::with_capacity(parents.len());
    for parent in parents {
        let simples = catalog::simples_of(pool, parent.id).await?;
        if simples.is_empty() {
            continue;
        }
        let mut variants = Vec::with_capacity(simples.len());
        for simple in simples {
            let images = catalog::images_of(pool, OwnerKind::Simple, simple.id).await?;
            let translations = catalog::translations_of(pool, OwnerKind::Simple, simple.id).await?;
            variants.push(SimpleRecord::new(simple, images, translations));
        }
        let images = catalog::images_of(pool, OwnerKind::Configurable, parent.id).await?;
        let translations = catalog::translations_of(pool, OwnerKind::Configurable, parent.id).await?;
        records.push(ConfigurableRecord::new(parent, images, translations, variants));
    }
    Ok(records)
}

/// Attaches the remote snapshot of every parent and variant, fetched in chunks.
/// A failed chunk leaves a message on each record it covered.
pub async fn fetch_remote(store: &dyn StoreService, records: &mut [ConfigurableRecord]) {
    let skus: Vec<String> = records
        .iter()
        .flat_map(|r| {
            std::iter::once(r.product.sku.clone()).chain(r.variants.iter().map(|v| v.product.sku.clone()))
        })
        .collect();

    for chunk in skus.chunks(FETCH_CHUNK) {
        match api::products_by_skus(store, chunk).await {
            Ok(found) => {
                let mut by_sku: HashMap<String, RemoteProduct> =
                    found.into_iter().map(|p| (p.sku.clone(), p)).collect();
                for record in records.iter_mut() {
                    if let Some(remote) = by_sku.remove(&record.product.sku) {
                        record.remote = Some(remote);
                    }
                    for variant in record.variants.iter_mut() {
                        if let Some(remote) = by_sku.remove(&variant.product.sku) {
                            variant.remote = Some(remote);
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, skus = chunk.len(), "remote product lookup failed");
                let message = format!("Error while requesting product from Magento. {}", e);
                let covered: HashSet<&str> = chunk.iter().map(String::as_str).collect();
                for record in records.iter_mut() {
                    if covered.contains(record.product.sku.as_str()) {
                        record.messages.push(message.clone());
                    }
                    for variant in record.variants.iter_mut() {
                        if covered.contains(variant.product.sku.as_str()) {
                            variant.messages.push(message.clone());
                        }
                    }
                }
            }
        }
    }

    for record in records.iter_mut() {
        if let Some(remote) = &record.remote {
            record.children = remote.extension_attributes.configurable_product_links.clone();
        }
    }
}

/// Splits parents into chunks holding at most `batch_size` variants each.
/// A parent with more variants than that gets a chunk of its own.
pub fn chunk_by_variants(
    records: Vec<ConfigurableRecord>,
    batch_size: usize,
) -> Vec<Vec<ConfigurableRecord>> {
    let mut chunks = Vec::new();
    let mut current: Vec<ConfigurableRecord> = Vec::new();
    let mut size = 0;
    for record in records {
        let n = record.variants.len();
        if !current.is_empty() && size + n > batch_size {
            chunks.push(std::mem::take(&mut current));
            size = 0;
        }
        size += n;
        current.push(record);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn configurable(id: i64, sku: &str) -> ConfigurableProduct {
        ConfigurableProduct {
            id,
            instance_id: 1,
            template_ref: format!("tmpl-{id}"),
            sku: sku.into(),
            name: sku.into(),
            description: None,
            attribute_set: Some("Default".into()),
            assign_attributes: vec!["Color".into()],
            category_ids: Vec::new(),
            do_not_create: false,
            remote_id: None,
            remote_children: Vec::new(),
            website_ids: Vec::new(),
            status: ExportStatus::NotExported,
            export_date: None,
            force_update: false,
            active: true,
        }
    }

    pub fn simple(id: i64, parent: i64, sku: &str, color: &str) -> SimpleProduct {
        SimpleProduct {
            id,
            instance_id: 1,
            configurable_id: parent,
            sku: sku.into(),
            name: sku.into(),
            attributes: vec![crate::db::model::AttributeValue::new("Color", color)],
            price: 10.0,
            weight: 1.0,
            qty: 5.0,
            remote_id: None,
            website_ids: Vec::new(),
            status: ExportStatus::NotExported,
            export_date: None,
            force_update: false,
            active: true,
        }
    }

    pub fn record(parent: ConfigurableProduct, variants: Vec<SimpleProduct>) -> ConfigurableRecord {
        let variants = variants
            .into_iter()
            .map(|v| SimpleRecord::new(v, Vec::new(), Vec::new()))
            .collect();
        ConfigurableRecord::new(parent, Vec::new(), Vec::new(), variants)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn missing_dates_are_never_current() {
        assert!(remote_is_current(Some("2024-05-01 10:00:00"), Some("2024-05-01 10:00:00")));
        assert!(remote_is_current(Some("2024-05-02 00:00:00"), Some("2024-05-01 10:00:00")));
        assert!(!remote_is_current(Some("2024-04-30 00:00:00"), Some("2024-05-01 10:00:00")));
        assert!(!remote_is_current(None, Some("2024-05-01 10:00:00")));
        assert!(!remote_is_current(Some("2024-05-01 10:00:00"), None));
        assert!(!remote_is_current(Some("yesterday"), Some("2024-05-01 10:00:00")));
    }

    #[test]
    fn do_not_create_parents_start_without_export() {
        let mut parent = configurable(1, "CHAIR");
        parent.do_not_create = true;
        let rec = record(parent, vec![simple(2, 1, "CHAIR-RED", "Red")]);
        assert!(!rec.to_export);
        assert!(rec.variants[0].to_export);
    }

    #[test]
    fn chunks_respect_variant_budget() {
        let records = (1..=4)
            .map(|i| {
                record(
                    configurable(i, &format!("P{i}")),
                    (0..3).map(|j| simple(i * 10 + j, i, &format!("P{i}-{j}"), "Red")).collect(),
                )
            })
            .collect();
        let chunks = chunk_by_variants(records, 7);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2]);

        let big = vec![record(
            configurable(9, "BIG"),
            (0..5).map(|j| simple(90 + j, 9, &format!("B{j}"), "Red")).collect(),
        )];
        assert_eq!(chunk_by_variants(big, 2).len(), 1);
    }

    #[test]
    fn messages_reach_the_owning_variant() {
        let mut rec = record(configurable(1, "CHAIR"), vec![simple(2, 1, "CHAIR-RED", "Red")]);
        rec.push_message(OwnerKind::Simple, 2, "boom");
        rec.push_message(OwnerKind::Configurable, 7, "not mine");
        assert_eq!(rec.variants[0].messages, vec!["boom".to_string()]);
        assert!(rec.messages.is_empty());
    }
}
