//! Status decisions and pre-export validation.
//!
//! Everything here is pure: it reads the records and the attribute catalog
//! and only writes statuses and messages back onto the records.

use serde::Deserialize;
use std::collections::BTreeSet;

use super::attributes::{normalize, AttributeCatalog, ResolvedSet};
use super::record::{remote_is_current, ConfigurableRecord, SimpleRecord};
use crate::model::ExportStatus;

/// Normalized `(attribute, value)` pairs of one variant on its parent's axes.
pub type Combination = BTreeSet<(String, String)>;

fn normalized_axes(parent: &ConfigurableRecord) -> BTreeSet<String> {
    parent
        .product
        .assign_attributes
        .iter()
        .map(|a| normalize(a))
        .collect()
}

/// Normalized labels of the options defined on the remote parent.
fn remote_axes(remote: &crate::store::model::RemoteProduct, set: &ResolvedSet) -> BTreeSet<String> {
    remote
        .extension_attributes
        .configurable_product_options
        .iter()
        .map(|o| {
            set.label_of(&o.attribute_id)
                .map(str::to_string)
                .unwrap_or_else(|| normalize(o.label.as_deref().unwrap_or_default()))
        })
        .collect()
}

pub fn decide_configurable(rec: &mut ConfigurableRecord, catalog: &AttributeCatalog) {
    if !rec.messages.is_empty() {
        rec.to_export = false;
        return;
    }
    let Some(set_name) = rec.product.attribute_set.clone() else {
        rec.messages
            .push("Missed 'Magento Product Attribute Set' field for Config.Product.".into());
        return;
    };
    let Some(set) = catalog.set(&set_name) else {
        rec.messages.push(format!(
            "Error while getting attribute set id for - {} from Magento.",
            set_name
        ));
        return;
    };
    rec.attribute_set_id = Some(set.id);

    if rec.product.do_not_create {
        rec.status = ExportStatus::NoNeed;
        rec.to_export = false;
        return;
    }
    if rec.product.assign_attributes.is_empty() {
        rec.messages
            .push("Configurable Product has no configurable(assign) attributes defined.".into());
        return;
    }

    let Some(remote) = &rec.remote else {
        rec.status = ExportStatus::NotExported;
        return;
    };
    if remote.is_type("configurable") {
        rec.axes_changed = remote_axes(remote, set) != normalized_axes(rec);
    }

    if rec.product.export_date.is_none() || rec.force_update {
        if rec.status == ExportStatus::InMagento {
            rec.status = ExportStatus::UpdateNeeded;
        }
        return;
    }

    if remote_is_current(remote.updated_at.as_deref(), rec.product.export_date.as_deref())
        && remote.is_type("configurable")
    {
        if rec.images.len() != remote.media_gallery_entries.len() {
            rec.status = ExportStatus::UpdateNeeded;
        } else if remote.attribute_set_id == Some(set.id) && !rec.axes_changed {
            rec.status = ExportStatus::InMagento;
            rec.to_export = false;
        } else {
            rec.status = ExportStatus::UpdateNeeded;
        }
    } else if !rec.status.is_pending() {
        rec.status = ExportStatus::UpdateNeeded;
    }
}

pub fn decide_simple(parent: &ConfigurableRecord, rec: &mut SimpleRecord) {
    if !parent.messages.is_empty() {
        rec.messages
            .push("Configurable Product is not ok. Please check it first.".into());
        return;
    }
    if !rec.messages.is_empty() {
        rec.to_export = false;
        return;
    }
    let Some(remote) = &rec.remote else {
        rec.status = ExportStatus::NotExported;
        return;
    };
    if rec.product.export_date.is_none() || rec.force_update {
        if rec.status == ExportStatus::InMagento {
            rec.status = ExportStatus::UpdateNeeded;
        }
        return;
    }

    if remote_is_current(remote.updated_at.as_deref(), rec.product.export_date.as_deref()) {
        if !parent.to_export {
            if parent.product.do_not_create || parent.children.contains(&remote.id) {
                if rec.images.len() != remote.media_gallery_entries.len() {
                    rec.status = ExportStatus::UpdateNeeded;
                } else {
                    rec.status = ExportStatus::InMagento;
                    rec.to_export = false;
                }
            } else {
                rec.status = ExportStatus::NeedToLink;
            }
        } else if rec.status == ExportStatus::InMagento {
            rec.status = ExportStatus::UpdateNeeded;
        }
    } else if !rec.status.is_pending() {
        rec.status = ExportStatus::UpdateNeeded;
    }
}

/// Checks a parent that is about to be exported against the remote catalog.
pub fn check_configurable(rec: &mut ConfigurableRecord, catalog: &AttributeCatalog) {
    if !rec.exportable() {
        return;
    }
    let Some(set) = rec.product.attribute_set.as_deref().and_then(|n| catalog.set(n)) else {
        return;
    };

    let mut missing = Vec::new();
    let mut unusable = Vec::new();
    for label in &rec.product.assign_attributes {
        match set.attribute(label) {
            None => missing.push(label.as_str()),
            Some(attr) => {
                let global = attr.scope.as_deref() == Some("global");
                if !global || !attr.is_user_defined {
                    unusable.push(label.as_str());
                }
            }
        }
    }
    if !missing.is_empty() {
        rec.messages.push(format!(
            "Attribute(s) - '{}' have to be created and linked to relevant Attribute-set on Magento side.",
            missing.join(", ")
        ));
    }
    if !unusable.is_empty() {
        rec.messages.push(format!(
            "The attribute(s): {} can't be assigned as configurable in Magento. Make sure each of it has 'Global' scope and was created manually.",
            unusable.join(", ")
        ));
    }
    if let Some(remote) = &rec.remote {
        if !remote.is_type("configurable") {
            rec.messages.push(format!(
                "Product with the following sku - \"{}\" already exists in Magento. And it's type is not Configurable.",
                rec.product.sku
            ));
        }
    }
}

/// Shape checks of a variant that don't need the Store. Attributes unknown
/// to the attribute set are reported here; missing options are created later.
pub fn check_simple(parent: &ConfigurableRecord, rec: &mut SimpleRecord, set: Option<&ResolvedSet>) {
    if !rec.exportable() {
        return;
    }
    if rec.product.attributes.is_empty() && !parent.product.do_not_create {
        rec.messages
            .push(format!("Product - {} has no attributes.", rec.product.sku));
    }
    if let Some(set) = set {
        for value in &rec.product.attributes {
            if set.attribute(&value.attribute).is_none() {
                rec.messages.push(format!(
                    "Attribute - {} has to be created on Magento side and attached to Attribute Set.",
                    value.attribute
                ));
            }
        }
    }
    if let Some(remote) = &rec.remote {
        if !remote.is_type("simple") {
            rec.messages.push(
                "The Product with such sku is already in Magento. (And it's type isn't Simple Product)."
                    .into(),
            );
        }
    }
    if !parent.product.do_not_create {
        let own: BTreeSet<String> = rec
            .product
            .attributes
            .iter()
            .map(|a| normalize(&a.attribute))
            .collect();
        let missing: Vec<&str> = parent
            .product
            .assign_attributes
            .iter()
            .filter(|a| !own.contains(&normalize(a)))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            rec.messages.push(format!(
                "Simple product is missing attribute(s): '{}' defined as configurable.",
                missing.join(", ")
            ));
        }
    }
}

/// The variant's values on the parent's axes, limited to values that already
/// have a remote option.
pub fn combination(parent: &ConfigurableRecord, rec: &SimpleRecord, set: &ResolvedSet) -> Combination {
    let axes = normalized_axes(parent);
    rec.product
        .attributes
        .iter()
        .filter(|a| axes.contains(&normalize(&a.attribute)))
        .filter(|a| set.option_value(&a.attribute, &a.value).is_some())
        .map(|a| (normalize(&a.attribute), normalize(&a.value)))
        .collect()
}

#[derive(Debug, Deserialize)]
struct LinkData {
    #[serde(default)]
    simple_product_sku: String,
    #[serde(default)]
    simple_product_attribute: Vec<LinkAttribute>,
}

#[derive(Debug, Deserialize)]
struct LinkAttribute {
    #[serde(default)]
    label: String,
    #[serde(default)]
    value: String,
}

/// `(child sku, combination)` of each child already linked on the remote parent.
pub fn linked_combinations(link_data: &[String]) -> Vec<(String, Combination)> {
    link_data
        .iter()
        .filter_map(|raw| serde_json::from_str::<LinkData>(raw).ok())
        .map(|link| {
            let combo = link
                .simple_product_attribute
                .iter()
                .map(|a| (normalize(&a.label), normalize(&a.value)))
                .collect();
            (link.simple_product_sku, combo)
        })
        .collect()
}

/// Rejects variants whose axis values collide with an already linked child or
/// with another variant exported in the same pass. Both sides of a sibling
/// collision are rejected.
pub fn reject_duplicate_combinations(parent: &mut ConfigurableRecord, catalog: &AttributeCatalog) {
    if parent.product.do_not_create || !parent.messages.is_empty() {
        return;
    }
    let Some(set) = parent.product.attribute_set.as_deref().and_then(|n| catalog.set(n)) else {
        return;
    };
    let linked = linked_combinations(parent.link_data());
    let combos: Vec<Option<Combination>> = parent
        .variants
        .iter()
        .map(|v| v.exportable().then(|| combination(parent, v, set)))
        .collect();

    let mut found: Vec<Vec<String>> = vec![Vec::new(); combos.len()];
    for (i, combo) in combos.iter().enumerate() {
        let Some(combo) = combo.as_ref().filter(|c| !c.is_empty()) else {
            continue;
        };
        let sku = parent.variants[i].product.sku.as_str();
        for (linked_sku, linked_combo) in &linked {
            if linked_sku != sku && linked_combo == combo {
                found[i].push(linked_sku.clone());
            }
        }
        for (j, other) in combos.iter().enumerate() {
            if i != j && other.as_ref() == Some(combo) {
                found[i].push(parent.variants[j].product.sku.clone());
            }
        }
    }

    for (variant, colliding) in parent.variants.iter_mut().zip(found) {
        for sku in colliding {
            variant.messages.push(format!(
                "The same configurable Set of Attribute Values was found in Product - {}.",
                sku
            ));
        }
    }
}
