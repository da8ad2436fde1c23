//! Asynchronous export through the Store's bulk endpoints.
//!
//! Each submission is persisted as a bulk job linked to the records it
//! covers. Accepted records move to `in_process`; only a later poll confirms
//! them. A submission reporting errors confirms nothing.

use anyhow::Result;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use super::attributes::AttributeCatalog;
use super::execute::{missing_options, price_targets, stale_options, translation_for, PARENT_NOT_OK};
use super::payload;
use super::record::ConfigurableRecord;
use crate::config::Config;
use crate::db::{self, OwnerKind, Pool};
use crate::model::ExportStatus;
use crate::store::api;
use crate::store::model::STORE_DATETIME_FORMAT;
use crate::store::StoreService;

pub const TOPIC_PRODUCTS: &str = "Product Export";
pub const TOPIC_WEBSITES: &str = "Website info export";
pub const TOPIC_IMAGES: &str = "Product Images";
pub const TOPIC_REMOVE_IMAGES: &str = "Remove Product Images";
pub const TOPIC_OPTIONS: &str = "Assign Product Attributes";
pub const TOPIC_CHILDREN: &str = "Link Simple to Configurable";

/// One element of a bulk request body and the record it belongs to.
#[derive(Debug, Clone, PartialEq)]
struct Item {
    owner: OwnerKind,
    id: i64,
    body: Value,
}

impl Item {
    fn new(owner: OwnerKind, id: i64, body: Value) -> Self {
        Self { owner, id, body }
    }
}

struct Bulk<'a> {
    pool: &'a Pool,
    store: &'a dyn StoreService,
    instance_id: i64,
}

impl Bulk<'_> {
    /// Submits `items` and records the job. `Ok(false)` means the submission
    /// failed or reported errors; the records then carry a message.
    async fn submit(
        &self,
        records: &mut [ConfigurableRecord],
        method: Method,
        path: &str,
        topic: &str,
        items: Vec<Item>,
    ) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        let entities: Vec<(OwnerKind, i64)> = items.iter().map(|i| (i.owner, i.id)).collect();
        let bodies = items.iter().map(|i| i.body.clone()).collect();

        let message = match api::submit_bulk(self.store, method, path, bodies).await {
            Ok(accepted) => {
                db::insert_bulk_job(
                    self.pool,
                    self.instance_id,
                    &accepted.bulk_uuid,
                    topic,
                    accepted.errors,
                    &entities,
                )
                .await?;
                if !accepted.errors {
                    info!(topic, job = %accepted.bulk_uuid, items = entities.len(), "bulk request accepted");
                    return Ok(true);
                }
                format!(
                    "Magento reported errors for the '{}' bulk request {}.",
                    topic, accepted.bulk_uuid
                )
            }
            Err(e) => format!("Error while submitting '{}' bulk request to Magento. {}", topic, e),
        };
        warn!(topic, "{}", message);
        for (owner, id) in entities {
            for record in records.iter_mut() {
                record.push_message(owner, id, &message);
            }
        }
        Ok(false)
    }
}

fn owned_by(items: &[Item], owner: OwnerKind, id: i64) -> bool {
    items.iter().any(|i| i.owner == owner && i.id == id)
}

fn product_item(owner: OwnerKind, id: i64, sku: &str, mut product: Value) -> Item {
    product["sku"] = json!(sku);
    Item::new(owner, id, json!({ "product": product }))
}

/// Exports a chunk of parents with their variants through bulk requests.
#[instrument(skip_all, fields(parents = records.len()))]
pub async fn export_bulk(
    pool: &Pool,
    store: &dyn StoreService,
    cfg: &Config,
    instance_id: i64,
    catalog: &AttributeCatalog,
    records: &mut [ConfigurableRecord],
) -> Result<()> {
    let bulk = Bulk {
        pool,
        store,
        instance_id,
    };
    let now = Utc::now().naive_utc().format(STORE_DATETIME_FORMAT).to_string();

    // Parents.
    let mut creates = Vec::new();
    let mut updates = Vec::new();
    for rec in records.iter().filter(|r| r.exportable()) {
        let Some(set_id) = rec.attribute_set_id else {
            continue;
        };
        let is_new = rec.remote.is_none();
        let item = product_item(
            OwnerKind::Configurable,
            rec.product.id,
            &rec.product.sku,
            payload::configurable(rec, set_id, false),
        );
        if is_new {
            creates.push(item);
        } else {
            updates.push(item);
        }
    }
    let created = bulk
        .submit(records, Method::POST, api::BULK_PRODUCTS, TOPIC_PRODUCTS, creates.clone())
        .await?;
    let updated = bulk
        .submit(
            records,
            Method::PUT,
            &api::bulk_storeview_products("all"),
            TOPIC_PRODUCTS,
            updates.clone(),
        )
        .await?;
    for rec in records.iter_mut() {
        let id = rec.product.id;
        let accepted = (created && owned_by(&creates, OwnerKind::Configurable, id))
            || (updated && owned_by(&updates, OwnerKind::Configurable, id));
        if accepted {
            rec.status = ExportStatus::InProcess;
            rec.outcome.exported = true;
            rec.outcome.export_date = Some(now.clone());
            if rec.axes_changed {
                rec.children.clear();
            }
        }
    }
    // Parents in error at this point hold their variants back; later side
    // submissions only add messages.
    let blocked: Vec<i64> = records
        .iter()
        .filter(|r| !r.messages.is_empty())
        .map(|r| r.product.id)
        .collect();
    let accepted_creates: Vec<i64> = if created {
        creates.iter().map(|i| i.id).collect()
    } else {
        Vec::new()
    };

    let mut websites = Vec::new();
    let mut translations: Vec<(String, Vec<Item>)> = Vec::new();
    let mut removals = Vec::new();
    let mut media = Vec::new();
    for rec in records.iter().filter(|r| r.outcome.exported && r.messages.is_empty()) {
        let (id, sku) = (rec.product.id, rec.product.sku.as_str());
        let is_new = accepted_creates.contains(&id);
        if is_new {
            for website_id in cfg.instance.website_ids() {
                websites.push(Item::new(
                    OwnerKind::Configurable,
                    id,
                    json!({ "productWebsiteLink": { "sku": sku, "website_id": website_id } }),
                ));
            }
        }
        for view in cfg.instance.storeviews() {
            if let Some(t) = translation_for(&rec.translations, &view.lang) {
                let item = Item::new(
                    OwnerKind::Configurable,
                    id,
                    json!({ "product": payload::translation(sku, t) }),
                );
                match translations.iter_mut().find(|(code, _)| code == &view.code) {
                    Some((_, items)) => items.push(item),
                    None => translations.push((view.code.clone(), vec![item])),
                }
            }
        }
        let remote_media = rec
            .remote
            .as_ref()
            .map(|r| r.media_gallery_entries.as_slice())
            .unwrap_or_default();
        if is_new || rec.images.len() != remote_media.len() {
            for entry in remote_media {
                removals.push(Item::new(
                    OwnerKind::Configurable,
                    id,
                    json!({ "sku": sku, "entryId": entry.id }),
                ));
            }
            for image in &rec.images {
                media.push(Item::new(
                    OwnerKind::Configurable,
                    id,
                    json!({ "sku": sku, "entry": payload::media_entry(sku, image) }),
                ));
            }
        }
    }
    if bulk
        .submit(records, Method::POST, api::BULK_WEBSITES, TOPIC_WEBSITES, websites)
        .await?
    {
        for rec in records.iter_mut().filter(|r| accepted_creates.contains(&r.product.id)) {
            rec.outcome.website_ids = Some(cfg.instance.website_ids());
        }
    }

    // Variants of parents that are fine.
    let mut simple_creates = Vec::new();
    let mut simple_updates = Vec::new();
    for rec in records.iter_mut() {
        if blocked.contains(&rec.product.id) {
            for variant in rec.variants.iter_mut().filter(|v| v.exportable()) {
                variant.messages.push(PARENT_NOT_OK.into());
            }
            continue;
        }
        let Some(set_id) = rec.attribute_set_id else {
            continue;
        };
        for variant in rec.variants.iter().filter(|v| v.exportable()) {
            let is_new = variant.remote.is_none();
            if !is_new && variant.status == ExportStatus::NeedToLink {
                continue;
            }
            let item = product_item(
                OwnerKind::Simple,
                variant.product.id,
                &variant.product.sku,
                payload::simple(variant, set_id, is_new),
            );
            if is_new {
                simple_creates.push(item);
            } else {
                simple_updates.push(item);
            }
        }
    }
    let created = bulk
        .submit(records, Method::POST, api::BULK_PRODUCTS, TOPIC_PRODUCTS, simple_creates.clone())
        .await?;
    let updated = bulk
        .submit(
            records,
            Method::PUT,
            &api::bulk_storeview_products("all"),
            TOPIC_PRODUCTS,
            simple_updates.clone(),
        )
        .await?;

    let mut prices: Vec<(String, Vec<Item>)> = Vec::new();
    let mut variant_websites = Vec::new();
    for rec in records.iter_mut() {
        for variant in rec.variants.iter_mut() {
            let id = variant.product.id;
            let is_new = created && owned_by(&simple_creates, OwnerKind::Simple, id);
            let accepted = is_new || (updated && owned_by(&simple_updates, OwnerKind::Simple, id));
            if !accepted {
                continue;
            }
            variant.status = ExportStatus::InProcess;
            variant.outcome.exported = true;
            variant.outcome.export_date = Some(now.clone());

            let sku = variant.product.sku.clone();
            if is_new {
                for website_id in cfg.instance.website_ids() {
                    variant_websites.push(Item::new(
                        OwnerKind::Simple,
                        id,
                        json!({ "productWebsiteLink": { "sku": sku, "website_id": website_id } }),
                    ));
                }
            }
            let (targets, messages) = price_targets(cfg, variant);
            variant.messages.extend(messages);
            for (code, body) in targets {
                let item = Item::new(OwnerKind::Simple, id, json!({ "product": body }));
                match prices.iter_mut().find(|(c, _)| c == &code) {
                    Some((_, items)) => items.push(item),
                    None => prices.push((code, vec![item])),
                }
            }
            let remote_media = variant
                .remote
                .as_ref()
                .map(|r| r.media_gallery_entries.as_slice())
                .unwrap_or_default();
            if is_new || variant.images.len() != remote_media.len() {
                for entry in remote_media {
                    removals.push(Item::new(
                        OwnerKind::Simple,
                        id,
                        json!({ "sku": sku, "entryId": entry.id }),
                    ));
                }
                for image in &variant.images {
                    media.push(Item::new(
                        OwnerKind::Simple,
                        id,
                        json!({ "sku": sku, "entry": payload::media_entry(&sku, image) }),
                    ));
                }
            }
        }
    }

    if bulk
        .submit(records, Method::POST, api::BULK_WEBSITES, TOPIC_WEBSITES, variant_websites.clone())
        .await?
    {
        for rec in records.iter_mut() {
            for variant in rec.variants.iter_mut() {
                if owned_by(&variant_websites, OwnerKind::Simple, variant.product.id) {
                    variant.outcome.website_ids = Some(cfg.instance.website_ids());
                }
            }
        }
    }
    for (code, items) in translations.into_iter().chain(prices) {
        let topic = format!("Storeview-{} info export", code);
        bulk.submit(records, Method::PUT, &api::bulk_storeview_products(&code), &topic, items)
            .await?;
    }
    if bulk
        .submit(records, Method::DELETE, api::BULK_MEDIA_REMOVE, TOPIC_REMOVE_IMAGES, removals)
        .await?
    {
        bulk.submit(records, Method::POST, api::BULK_MEDIA, TOPIC_IMAGES, media)
            .await?;
    }

    // Axes and links.
    let mut options = Vec::new();
    let mut links = Vec::new();
    for rec in records.iter_mut() {
        if rec.product.do_not_create || blocked.contains(&rec.product.id) {
            continue;
        }
        if !rec.variants.iter().any(|v| v.exportable()) {
            continue;
        }
        let Some(set) = rec.product.attribute_set.as_deref().and_then(|n| catalog.set(n)) else {
            continue;
        };
        let sku = rec.product.sku.clone();
        for option_id in stale_options(rec, set) {
            if let Err(e) = api::delete_configurable_option(store, &sku, option_id).await {
                rec.messages.push(format!(
                    "Error while unlinking Assign Attribute of {} Config.Product in Magento. {}",
                    sku, e
                ));
            }
        }
        for option in missing_options(rec, set) {
            options.push(Item::new(
                OwnerKind::Configurable,
                rec.product.id,
                json!({ "option": option, "sku": sku }),
            ));
        }
        let children = rec.children.clone();
        for variant in rec.variants.iter_mut().filter(|v| v.exportable()) {
            match variant.remote_id() {
                Some(remote_id) if children.contains(&remote_id) => {
                    variant.status = ExportStatus::InMagento;
                }
                _ => links.push(Item::new(
                    OwnerKind::Simple,
                    variant.product.id,
                    json!({ "childSku": variant.product.sku, "sku": sku }),
                )),
            }
        }
    }
    bulk.submit(records, Method::POST, api::BULK_OPTIONS, TOPIC_OPTIONS, options)
        .await?;
    if bulk
        .submit(records, Method::POST, api::BULK_CHILDREN, TOPIC_CHILDREN, links.clone())
        .await?
    {
        for rec in records.iter_mut() {
            for variant in rec.variants.iter_mut() {
                if owned_by(&links, OwnerKind::Simple, variant.product.id) {
                    variant.status = ExportStatus::InProcess;
                }
            }
        }
    }
    Ok(())
}
