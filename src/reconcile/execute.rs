//! Synchronous export: one REST call per remote change.
//!
//! Every call is wrapped on its own. A failure becomes a message on the record
//! it concerns and the remaining calls still run.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use super::attributes::{normalize, AttributeCatalog, ResolvedSet};
use super::payload;
use super::record::{ConfigurableRecord, SimpleRecord};
use crate::config::Config;
use crate::db::model::{ProductImage, Translation};
use crate::model::ExportStatus;
use crate::store::api;
use crate::store::model::MediaEntry;
use crate::store::StoreService;

pub(super) const PARENT_NOT_OK: &str = "Configurable Product is not ok. Please check it first.";

/// Resolves the option ids of every exportable variant, creating options the
/// Store doesn't have yet.
pub async fn prepare_variants(
    store: &dyn StoreService,
    catalog: &mut AttributeCatalog,
    parent: &mut ConfigurableRecord,
) {
    if !parent.messages.is_empty() {
        return;
    }
    let Some(set_name) = parent.product.attribute_set.clone() else {
        return;
    };
    for variant in parent.variants.iter_mut().filter(|v| v.exportable()) {
        let mut resolved = Vec::with_capacity(variant.product.attributes.len());
        for value in &variant.product.attributes {
            let Some(code) = catalog
                .set(&set_name)
                .and_then(|s| s.attribute(&value.attribute))
                .map(|a| a.attribute_code.clone())
            else {
                continue;
            };
            match catalog
                .ensure_option(store, &set_name, &value.attribute, &value.value)
                .await
            {
                Ok(Some(option)) => resolved.push((code, option)),
                Ok(None) => {}
                Err(e) => variant.messages.push(format!(
                    "Error while new Product Attribute Option(Swatch) creation for {} Attribute: {}.",
                    code, e
                )),
            }
        }
        variant.custom_attributes = resolved;
    }
}

/// `(storeview code, body)` price updates for a variant, plus the messages of
/// websites that can't be priced.
pub fn price_targets(cfg: &Config, rec: &SimpleRecord) -> (Vec<(String, Value)>, Vec<String>) {
    let mut targets = Vec::new();
    let mut messages = Vec::new();
    if cfg.instance.catalog_price_scope != "website" {
        messages.push(format!(
            "Catalog Price Scope has to be 'website' in Magento for '{}' instance.",
            cfg.instance.name
        ));
        return (targets, messages);
    }
    for website in &cfg.instance.websites {
        let Some(view) = website.storeviews.first() else {
            continue;
        };
        let Some(currency) = &website.pricelist_currency else {
            messages.push(format!(
                "There are no price-list defined for '{}' website.",
                website.name
            ));
            continue;
        };
        if currency != &website.base_currency {
            messages.push(format!(
                "Price-list '{}' currency is different than Magento base currency for '{}' website.",
                currency, website.name
            ));
            break;
        }
        if rec.product.price <= 0.0 {
            messages.push(format!(
                "There are no or '0' price defined for product in '{}' website's price-list.",
                website.name
            ));
            continue;
        }
        let translation = translation_for(&rec.translations, &view.lang);
        targets.push((
            view.code.clone(),
            payload::storeview_price(&rec.product.sku, rec.product.price, translation),
        ));
    }
    (targets, messages)
}

pub fn translation_for<'a>(translations: &'a [Translation], lang: &str) -> Option<&'a Translation> {
    translations.iter().find(|t| t.lang == lang)
}

/// Remote option ids on the parent whose attribute is no longer an axis.
pub fn stale_options(parent: &ConfigurableRecord, set: &ResolvedSet) -> Vec<i64> {
    let Some(remote) = &parent.remote else {
        return Vec::new();
    };
    let axes: BTreeSet<String> = parent.product.assign_attributes.iter().map(|a| normalize(a)).collect();
    remote
        .extension_attributes
        .configurable_product_options
        .iter()
        .filter(|o| {
            let label = set
                .label_of(&o.attribute_id)
                .map(str::to_string)
                .unwrap_or_else(|| normalize(o.label.as_deref().unwrap_or_default()));
            !axes.contains(&label)
        })
        .filter_map(|o| o.id)
        .collect()
}

/// Option bodies for axes not yet defined on the remote parent. The value
/// index is taken from the first variant carrying a known value for the axis.
pub fn missing_options(parent: &ConfigurableRecord, set: &ResolvedSet) -> Vec<Value> {
    let present: BTreeSet<String> = parent
        .remote
        .iter()
        .flat_map(|r| r.extension_attributes.configurable_product_options.iter())
        .map(|o| {
            set.label_of(&o.attribute_id)
                .map(str::to_string)
                .unwrap_or_else(|| normalize(o.label.as_deref().unwrap_or_default()))
        })
        .collect();

    let mut out = Vec::new();
    for label in &parent.product.assign_attributes {
        if present.contains(&normalize(label)) {
            continue;
        }
        let Some(attr) = set.attribute(label) else {
            continue;
        };
        let value_index = parent.variants.iter().find_map(|v| {
            v.product
                .attributes
                .iter()
                .find(|a| normalize(&a.attribute) == normalize(label))
                .and_then(|a| set.option_value(label, &a.value))
        });
        if let Some(value_index) = value_index {
            out.push(payload::option(attr, label, value_index));
        }
    }
    out
}

async fn upload_images(
    store: &dyn StoreService,
    sku: &str,
    images: &[ProductImage],
    messages: &mut Vec<String>,
    force_update: &mut bool,
) {
    for image in images {
        if let Err(e) = api::add_media(store, sku, payload::media_entry(sku, image)).await {
            messages.push(format!(
                "Error while Product ({}) Image export to Magento. {}",
                image.role.as_deref().unwrap_or("image"),
                e
            ));
            *force_update = true;
        }
    }
}

async fn remove_images(
    store: &dyn StoreService,
    sku: &str,
    entries: &[MediaEntry],
    messages: &mut Vec<String>,
) {
    for entry in entries {
        if let Err(e) = api::delete_media(store, sku, entry.id).await {
            messages.push(format!("Error while removing Product Image from Magento. {}", e));
        }
    }
}

async fn assign_websites(store: &dyn StoreService, cfg: &Config, sku: &str, messages: &mut Vec<String>) {
    for website_id in cfg.instance.website_ids() {
        if let Err(e) = api::assign_website(store, sku, website_id).await {
            messages.push(format!(
                "Error while assigning Product to website {} in Magento. {}",
                website_id, e
            ));
        }
    }
}

/// Saves the parent and fans out its side calls. Returns false only when the
/// parent itself could not be saved; a failed website, storeview or image
/// call stays on the parent's messages.
async fn export_configurable(
    store: &dyn StoreService,
    cfg: &Config,
    rec: &mut ConfigurableRecord,
) -> bool {
    let Some(set_id) = rec.attribute_set_id else {
        return true;
    };
    let is_new = rec.remote.is_none();
    let sku = rec.product.sku.clone();
    let body = payload::configurable(rec, set_id, is_new);
    let saved = match api::save_product(store, "all", (!is_new).then_some(sku.as_str()), body).await {
        Ok(saved) => saved,
        Err(e) => {
            rec.messages
                .push(format!("Error while Config.Product update/creation in Magento. {}", e));
            return false;
        }
    };
    debug!(sku = %sku, remote_id = saved.id, is_new, "configurable saved");
    rec.outcome.remote_id = Some(saved.id);
    rec.outcome.exported = true;
    rec.outcome.export_date = saved.updated_at.clone();
    rec.status = ExportStatus::InMagento;
    if rec.axes_changed {
        rec.children.clear();
    }

    if is_new {
        assign_websites(store, cfg, &sku, &mut rec.messages).await;
        rec.outcome.website_ids = Some(cfg.instance.website_ids());
    } else if !saved.extension_attributes.website_ids.is_empty() {
        rec.outcome.website_ids = Some(saved.extension_attributes.website_ids.clone());
    }

    for view in cfg.instance.storeviews() {
        let Some(translation) = translation_for(&rec.translations, &view.lang) else {
            continue;
        };
        let body = payload::translation(&sku, translation);
        if let Err(e) = api::save_product(store, &view.code, Some(sku.as_str()), body).await {
            rec.messages.push(format!(
                "Error while exporting product data to '{}' store view. {}",
                view.code, e
            ));
            rec.force_update = true;
        }
    }

    let remote_media = rec
        .remote
        .as_ref()
        .map(|r| r.media_gallery_entries.clone())
        .unwrap_or_default();
    if is_new || rec.images.len() != remote_media.len() {
        remove_images(store, &sku, &remote_media, &mut rec.messages).await;
        upload_images(store, &sku, &rec.images, &mut rec.messages, &mut rec.force_update).await;
    }
    true
}

/// What a variant export needs from its parent.
#[derive(Debug, Clone, Copy)]
struct ParentRef<'a> {
    sku: &'a str,
    set_id: i64,
    do_not_create: bool,
}

/// Returns whether the variant exists remotely and can be linked.
async fn export_simple(
    store: &dyn StoreService,
    cfg: &Config,
    parent: ParentRef<'_>,
    rec: &mut SimpleRecord,
) -> bool {
    let is_new = rec.remote.is_none();
    if !is_new && rec.status == ExportStatus::NeedToLink {
        return true;
    }
    let sku = rec.product.sku.clone();
    let body = payload::simple(rec, parent.set_id, is_new);
    let saved = match api::save_product(store, "all", (!is_new).then_some(sku.as_str()), body).await {
        Ok(saved) => saved,
        Err(e) if is_new => {
            rec.messages
                .push(format!("Error while new Simple Product creation in Magento: {}", e));
            return false;
        }
        Err(e) => {
            rec.messages
                .push(format!("Error while Simple Product update in Magento: {}", e));
            return false;
        }
    };
    debug!(sku = %sku, parent = parent.sku, remote_id = saved.id, is_new, "simple saved");
    rec.outcome.remote_id = Some(saved.id);
    rec.outcome.exported = true;
    rec.outcome.export_date = saved.updated_at.clone();
    rec.status = if parent.do_not_create {
        ExportStatus::InMagento
    } else {
        ExportStatus::NeedToLink
    };

    if is_new {
        assign_websites(store, cfg, &sku, &mut rec.messages).await;
        rec.outcome.website_ids = Some(cfg.instance.website_ids());
    } else if !saved.extension_attributes.website_ids.is_empty() {
        rec.outcome.website_ids = Some(saved.extension_attributes.website_ids.clone());
    }

    let (targets, messages) = price_targets(cfg, rec);
    rec.messages.extend(messages);
    for (code, body) in targets {
        if let Err(e) = api::save_product(store, &code, Some(sku.as_str()), body).await {
            rec.messages.push(format!(
                "Error while exporting product data to '{}' store view. {}",
                code, e
            ));
            rec.force_update = true;
        }
    }

    let remote_media = rec
        .remote
        .as_ref()
        .map(|r| r.media_gallery_entries.clone())
        .unwrap_or_default();
    if is_new || rec.images.len() != remote_media.len() {
        remove_images(store, &sku, &remote_media, &mut rec.messages).await;
        upload_images(store, &sku, &rec.images, &mut rec.messages, &mut rec.force_update).await;
    }
    true
}

/// Removes stale axes from the remote parent and adds the missing ones.
async fn sync_options(store: &dyn StoreService, set: &ResolvedSet, parent: &mut ConfigurableRecord) {
    let sku = parent.product.sku.clone();
    for option_id in stale_options(parent, set) {
        if let Err(e) = api::delete_configurable_option(store, &sku, option_id).await {
            parent.messages.push(format!(
                "Error while unlinking Assign Attribute of {} Config.Product in Magento. {}",
                sku, e
            ));
        }
    }
    for option in missing_options(parent, set) {
        if let Err(e) = api::add_configurable_option(store, &sku, option).await {
            parent.messages.push(format!(
                "Error while assigning Attribute to {} Config.Product in Magento. {}",
                sku, e
            ));
        }
    }
}

async fn link_variant(
    store: &dyn StoreService,
    parent_sku: &str,
    children: &mut Vec<i64>,
    rec: &mut SimpleRecord,
) {
    if let Some(remote_id) = rec.remote_id() {
        if children.contains(&remote_id) {
            rec.status = ExportStatus::InMagento;
            return;
        }
    }
    match api::link_child(store, parent_sku, &rec.product.sku).await {
        Ok(()) => {
            rec.status = ExportStatus::InMagento;
            if let Some(remote_id) = rec.remote_id() {
                children.push(remote_id);
            }
        }
        Err(e) => rec.messages.push(format!(
            "Error while linking {} to {} Configurable Product in Magento. {}",
            rec.product.sku, parent_sku, e
        )),
    }
}

fn reject_variants(parent: &mut ConfigurableRecord) {
    for variant in parent.variants.iter_mut().filter(|v| v.exportable()) {
        variant.messages.push(PARENT_NOT_OK.into());
    }
}

/// Exports one parent and its variants, in order: parent, websites,
/// storeviews, images, variants, axes, links.
///
/// Variants are held back when the parent was already in error or could not
/// be saved. Failures of the other calls are recorded on their record and the
/// remaining calls still run.
#[instrument(skip_all, fields(sku = %parent.product.sku))]
pub async fn export_direct(
    store: &dyn StoreService,
    cfg: &Config,
    catalog: &AttributeCatalog,
    parent: &mut ConfigurableRecord,
) {
    let usable = if parent.exportable() {
        export_configurable(store, cfg, parent).await
    } else {
        parent.messages.is_empty()
    };
    if !usable {
        reject_variants(parent);
        return;
    }
    let Some(set_id) = parent.attribute_set_id else {
        return;
    };
    let parent_sku = parent.product.sku.clone();
    let parent_ref = ParentRef {
        sku: &parent_sku,
        set_id,
        do_not_create: parent.product.do_not_create,
    };
    let mut linkable = Vec::new();
    for variant in parent.variants.iter_mut().filter(|v| v.exportable()) {
        if export_simple(store, cfg, parent_ref, variant).await {
            linkable.push(variant.product.id);
        }
    }
    if parent.product.do_not_create || linkable.is_empty() {
        return;
    }

    let Some(set) = parent.product.attribute_set.as_deref().and_then(|n| catalog.set(n)) else {
        return;
    };
    let before = parent.messages.len();
    sync_options(store, set, parent).await;
    if parent.messages.len() > before {
        reject_variants(parent);
        return;
    }
    let mut children = std::mem::take(&mut parent.children);
    for variant in parent
        .variants
        .iter_mut()
        .filter(|v| linkable.contains(&v.product.id))
    {
        link_variant(store, &parent_sku, &mut children, variant).await;
    }
    parent.children = children;
}

#[cfg(test)]
mod tests {
    use super::super::record::fixtures as fx;
    use super::*;
    use crate::store::model::{AttributeOption, ConfigurableOption, RemoteAttribute, RemoteProduct};

    fn set() -> ResolvedSet {
        let attr = |id: i64, code: &str, label: &str, options: Vec<(&str, &str)>| RemoteAttribute {
            attribute_id: id,
            attribute_code: code.into(),
            default_frontend_label: Some(label.into()),
            scope: Some("global".into()),
            is_user_defined: true,
            options: options
                .into_iter()
                .map(|(l, v)| AttributeOption { label: l.into(), value: v.into() })
                .collect(),
        };
        ResolvedSet::new(
            4,
            vec![
                attr(93, "color", "Color", vec![("Red", "5")]),
                attr(94, "size", "Size", vec![("XL", "8")]),
            ],
        )
    }

    fn config() -> Config {
        serde_yaml::from_str(crate::config::example()).unwrap()
    }

    #[test]
    fn price_targets_use_first_storeview_per_website() {
        let rec = fx::record(fx::configurable(1, "CHAIR"), vec![fx::simple(2, 1, "CHAIR-RED", "Red")]);
        let (targets, messages) = price_targets(&config(), &rec.variants[0]);
        assert!(messages.is_empty());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0, "default");
        assert_eq!(targets[0].1["price"], 10.0);
    }

    #[test]
    fn price_targets_report_configuration_gaps() {
        let rec = fx::record(fx::configurable(1, "CHAIR"), vec![fx::simple(2, 1, "CHAIR-RED", "Red")]);

        let mut cfg = config();
        cfg.instance.catalog_price_scope = "global".into();
        let (targets, messages) = price_targets(&cfg, &rec.variants[0]);
        assert!(targets.is_empty());
        assert_eq!(
            messages,
            vec!["Catalog Price Scope has to be 'website' in Magento for 'main-shop' instance.".to_string()]
        );

        let mut cfg = config();
        cfg.instance.websites[0].pricelist_currency = Some("USD".into());
        let (targets, messages) = price_targets(&cfg, &rec.variants[0]);
        assert!(targets.is_empty());
        assert!(messages[0].contains("currency is different"));

        let mut cfg = config();
        cfg.instance.websites[0].pricelist_currency = None;
        let (_, messages) = price_targets(&cfg, &rec.variants[0]);
        assert!(messages[0].contains("no price-list defined for 'Main Website'"));

        let mut zero = rec.variants[0].clone();
        zero.product.price = 0.0;
        let (_, messages) = price_targets(&config(), &zero);
        assert!(messages[0].contains("'0' price"));
    }

    #[test]
    fn option_diff_against_remote_parent() {
        let mut parent = fx::configurable(1, "CHAIR");
        parent.assign_attributes = vec!["Color".into()];
        let mut rec = fx::record(parent, vec![fx::simple(2, 1, "CHAIR-RED", "Red")]);
        let mut remote = RemoteProduct {
            id: 100,
            sku: "CHAIR".into(),
            type_id: Some("configurable".into()),
            ..Default::default()
        };
        remote.extension_attributes.configurable_product_options = vec![ConfigurableOption {
            id: Some(31),
            attribute_id: "94".into(),
            label: Some("Size".into()),
        }];
        rec.remote = Some(remote);

        assert_eq!(stale_options(&rec, &set()), vec![31]);
        let missing = missing_options(&rec, &set());
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0]["attribute_id"], 93);
        assert_eq!(missing[0]["values"][0]["value_index"], "5");
    }
}
