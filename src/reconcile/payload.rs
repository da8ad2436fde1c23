//! JSON bodies sent to the Store.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};

use super::record::{ConfigurableRecord, SimpleRecord};
use crate::db::model::{ProductImage, Translation};
use crate::store::model::RemoteAttribute;

const VISIBILITY_CATALOG: i64 = 2;
const VISIBILITY_SEARCH: i64 = 3;

pub fn configurable(rec: &ConfigurableRecord, attribute_set_id: i64, with_sku: bool) -> Value {
    let mut custom = Vec::new();
    if let Some(description) = &rec.product.description {
        custom.push(json!({ "attribute_code": "description", "value": description }));
    }
    let category_links: Vec<Value> = rec
        .product
        .category_ids
        .iter()
        .map(|id| json!({ "position": 0, "category_id": id }))
        .collect();

    let mut extension = Map::new();
    extension.insert("stock_item".into(), json!({ "is_in_stock": true }));
    extension.insert("category_links".into(), Value::Array(category_links));
    if rec.axes_changed && !with_sku {
        extension.insert("configurable_product_links".into(), json!([]));
    }

    let mut product = Map::new();
    if with_sku {
        product.insert("sku".into(), json!(rec.product.sku));
    }
    product.insert("name".into(), json!(rec.product.name.to_uppercase()));
    product.insert("attribute_set_id".into(), json!(attribute_set_id));
    product.insert("type_id".into(), json!("configurable"));
    product.insert("status".into(), json!(1));
    product.insert("visibility".into(), json!(VISIBILITY_CATALOG));
    product.insert("custom_attributes".into(), Value::Array(custom));
    product.insert("extension_attributes".into(), Value::Object(extension));
    Value::Object(product)
}

pub fn simple(rec: &SimpleRecord, attribute_set_id: i64, with_sku: bool) -> Value {
    let custom: Vec<Value> = rec
        .custom_attributes
        .iter()
        .map(|(code, value)| json!({ "attribute_code": code, "value": value }))
        .collect();
    let mut product = json!({
        "name": rec.product.name,
        "attribute_set_id": attribute_set_id,
        "status": 1,
        "visibility": VISIBILITY_SEARCH,
        "price": 0,
        "type_id": "simple",
        "weight": rec.product.weight,
        "custom_attributes": custom,
    });
    if with_sku {
        product["sku"] = json!(rec.product.sku);
        product["extension_attributes"] = json!({
            "stock_item": { "qty": rec.product.qty, "is_in_stock": rec.product.qty > 0.0 }
        });
    }
    product
}

/// Storeview-level name/description override.
pub fn translation(sku: &str, translation: &Translation) -> Value {
    let mut product = json!({ "sku": sku, "name": translation.name });
    if let Some(description) = &translation.description {
        product["custom_attributes"] =
            json!([{ "attribute_code": "description", "value": description }]);
    }
    product
}

/// Storeview-level price, with the translated name when there is one.
pub fn storeview_price(sku: &str, price: f64, translation: Option<&Translation>) -> Value {
    let mut product = json!({ "sku": sku, "price": price });
    if let Some(t) = translation {
        product["name"] = json!(t.name);
    }
    product
}

pub fn media_entry(sku: &str, image: &ProductImage) -> Value {
    let role = image.role.as_deref().unwrap_or("image");
    let (mime, ext) = image_type(&image.content);
    json!({
        "media_type": "image",
        "types": [role],
        "disabled": role == "thumbnail",
        "label": image.label.clone().unwrap_or_default(),
        "position": image.position,
        "content": {
            "base64EncodedData": STANDARD.encode(&image.content),
            "type": mime,
            "name": format!("{}_{}.{}", sku, image.id, ext),
        }
    })
}

/// Configurable option definition for one axis.
pub fn option(attribute: &RemoteAttribute, label: &str, value_index: &str) -> Value {
    json!({
        "attribute_id": attribute.attribute_id,
        "label": label,
        "position": 0,
        "is_use_default": false,
        "values": [{ "value_index": value_index }]
    })
}

fn image_type(bytes: &[u8]) -> (&'static str, &'static str) {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => ("image/png", "png"),
        [b'G', b'I', b'F', b'8', ..] => ("image/gif", "gif"),
        _ => ("image/jpeg", "jpg"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::record::fixtures as fx;
    use super::*;

    #[test]
    fn configurable_update_clears_links_when_axes_change() {
        let mut rec = fx::record(fx::configurable(1, "Chair"), Vec::new());
        rec.product.category_ids = vec!["12".into()];
        let created = configurable(&rec, 4, true);
        assert_eq!(created["sku"], "Chair");
        assert_eq!(created["name"], "CHAIR");
        assert_eq!(created["visibility"], 2);
        assert_eq!(created["extension_attributes"]["category_links"][0]["category_id"], "12");
        assert!(created["extension_attributes"].get("configurable_product_links").is_none());

        rec.axes_changed = true;
        let updated = configurable(&rec, 4, false);
        assert!(updated.get("sku").is_none());
        assert_eq!(updated["extension_attributes"]["configurable_product_links"], json!([]));
    }

    #[test]
    fn simple_stock_only_on_create() {
        let mut rec = fx::record(fx::configurable(1, "CHAIR"), vec![fx::simple(2, 1, "CHAIR-RED", "Red")]);
        let mut variant = rec.variants.remove(0);
        variant.custom_attributes = vec![("color".into(), "5".into())];
        let created = simple(&variant, 4, true);
        assert_eq!(created["extension_attributes"]["stock_item"]["qty"], 5.0);
        assert_eq!(created["custom_attributes"][0]["value"], "5");
        assert_eq!(created["price"], 0);
        let updated = simple(&variant, 4, false);
        assert!(updated.get("extension_attributes").is_none());
        assert!(updated.get("sku").is_none());
    }

    #[test]
    fn media_entry_encodes_content() {
        let image = ProductImage {
            id: 7,
            role: Some("thumbnail".into()),
            label: None,
            position: 1,
            content: vec![0x89, b'P', b'N', b'G', 0, 1],
        };
        let entry = media_entry("CHAIR", &image);
        assert_eq!(entry["disabled"], true);
        assert_eq!(entry["content"]["type"], "image/png");
        assert_eq!(entry["content"]["name"], "CHAIR_7.png");
        assert_eq!(entry["content"]["base64EncodedData"], STANDARD.encode(&image.content));
    }
}
