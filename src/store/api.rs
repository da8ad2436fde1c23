//! Typed helpers over the Store REST endpoints used by the sync engine.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::model::{
    BulkAccepted, BulkStatus, RemoteAttribute, RemoteAttributeSet, RemoteCustomer, RemoteProduct,
    SearchPage,
};
use super::{SearchCriteria, StoreError, StoreRequest, StoreService};

/// Catalog product entity type in the Store's EAV model.
pub const PRODUCT_ENTITY_TYPE_ID: i64 = 4;

pub const ORDERS_PATH: &str = "/V1/orders";
pub const CUSTOMERS_PATH: &str = "/V1/customers/search";
pub const PRODUCTS_PATH: &str = "/V1/products";

pub const BULK_PRODUCTS: &str = "/all/async/bulk/V1/products";
pub const BULK_WEBSITES: &str = "/all/async/bulk/V1/products/bySku/websites";
pub const BULK_MEDIA: &str = "/all/async/bulk/V1/products/bySku/media";
pub const BULK_MEDIA_REMOVE: &str = "/all/async/bulk/V1/products/bySku/media/byEntryId";
pub const BULK_OPTIONS: &str = "/async/bulk/V1/configurable-products/bySku/options";
pub const BULK_CHILDREN: &str = "/async/bulk/V1/configurable-products/bySku/child";

/// Storeview-scoped bulk product update path.
pub fn bulk_storeview_products(code: &str) -> String {
    format!("/{}/async/bulk/V1/products/bySku", encode_segment(code))
}

pub async fn search(
    store: &dyn StoreService,
    path: &str,
    criteria: &SearchCriteria,
) -> Result<SearchPage, StoreError> {
    let value = store
        .send(StoreRequest::get(path).with_criteria(criteria))
        .await?;
    decode(value)
}

pub async fn customer_by_id(
    store: &dyn StoreService,
    customer_id: i64,
) -> Result<RemoteCustomer, StoreError> {
    decode(
        store
            .send(StoreRequest::get(format!("/V1/customers/{}", customer_id)))
            .await?,
    )
}

/// One `IN` query over the given SKUs. Callers chunk the SKU list.
pub async fn products_by_skus(
    store: &dyn StoreService,
    skus: &[String],
) -> Result<Vec<RemoteProduct>, StoreError> {
    if skus.is_empty() {
        return Ok(Vec::new());
    }
    let criteria = SearchCriteria::new().filter_in("sku", skus);
    let page = search(store, PRODUCTS_PATH, &criteria).await?;
    page.items.into_iter().map(decode).collect()
}

pub async fn attribute_sets(
    store: &dyn StoreService,
) -> Result<Vec<RemoteAttributeSet>, StoreError> {
    let criteria = SearchCriteria::new().filter(
        "entity_type_id",
        PRODUCT_ENTITY_TYPE_ID.to_string(),
        super::Condition::Eq,
    );
    let page = search(store, "/all/V1/eav/attribute-sets/list", &criteria).await?;
    page.items.into_iter().map(decode).collect()
}

pub async fn attribute_set_attributes(
    store: &dyn StoreService,
    attribute_set_id: i64,
) -> Result<Vec<RemoteAttribute>, StoreError> {
    let value = store
        .send(StoreRequest::get(format!(
            "/all/V1/products/attribute-sets/{}/attributes",
            attribute_set_id
        )))
        .await?;
    decode(value)
}

/// Creates an option on an attribute and returns its option id.
pub async fn create_attribute_option(
    store: &dyn StoreService,
    attribute_code: &str,
    label: &str,
) -> Result<String, StoreError> {
    let body = json!({
        "option": {
            "label": label,
            "sort_order": 0,
            "is_default": false,
            "store_labels": []
        }
    });
    let value = store
        .send(StoreRequest::post(
            format!(
                "/all/V1/products/attributes/{}/options",
                encode_segment(attribute_code)
            ),
            body,
        ))
        .await?;
    let raw = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        other => return Err(StoreError::Decode(format!("unexpected option id {other}"))),
    };
    Ok(raw.trim_start_matches("id_").to_string())
}

/// Creates (`sku == None`) or updates a product in the given scope.
pub async fn save_product(
    store: &dyn StoreService,
    scope: &str,
    sku: Option<&str>,
    product: Value,
) -> Result<RemoteProduct, StoreError> {
    let body = json!({ "product": product });
    let request = match sku {
        None => StoreRequest::post(format!("/{}/V1/products", encode_segment(scope)), body),
        Some(sku) => StoreRequest::put(
            format!("/{}/V1/products/{}", encode_segment(scope), encode_segment(sku)),
            body,
        ),
    };
    decode(store.send(request).await?)
}

pub async fn assign_website(
    store: &dyn StoreService,
    sku: &str,
    website_id: i64,
) -> Result<(), StoreError> {
    let body = json!({ "productWebsiteLink": { "sku": sku, "website_id": website_id } });
    store
        .send(StoreRequest::post(
            format!("/V1/products/{}/websites", encode_segment(sku)),
            body,
        ))
        .await?;
    Ok(())
}

pub async fn add_media(
    store: &dyn StoreService,
    sku: &str,
    entry: Value,
) -> Result<(), StoreError> {
    store
        .send(StoreRequest::post(
            format!("/all/V1/products/{}/media", encode_segment(sku)),
            json!({ "entry": entry }),
        ))
        .await?;
    Ok(())
}

pub async fn delete_media(
    store: &dyn StoreService,
    sku: &str,
    entry_id: i64,
) -> Result<(), StoreError> {
    store
        .send(StoreRequest::delete(format!(
            "/all/V1/products/{}/media/{}",
            encode_segment(sku),
            entry_id
        )))
        .await?;
    Ok(())
}

pub async fn add_configurable_option(
    store: &dyn StoreService,
    sku: &str,
    option: Value,
) -> Result<(), StoreError> {
    store
        .send(StoreRequest::post(
            format!("/V1/configurable-products/{}/options", encode_segment(sku)),
            json!({ "option": option }),
        ))
        .await?;
    Ok(())
}

pub async fn delete_configurable_option(
    store: &dyn StoreService,
    sku: &str,
    option_id: i64,
) -> Result<(), StoreError> {
    store
        .send(StoreRequest::delete(format!(
            "/V1/configurable-products/{}/options/{}",
            encode_segment(sku),
            option_id
        )))
        .await?;
    Ok(())
}

pub async fn link_child(
    store: &dyn StoreService,
    parent_sku: &str,
    child_sku: &str,
) -> Result<(), StoreError> {
    store
        .send(StoreRequest::post(
            format!("/V1/configurable-products/{}/child", encode_segment(parent_sku)),
            json!({ "childSku": child_sku }),
        ))
        .await?;
    Ok(())
}

pub async fn delete_product(store: &dyn StoreService, sku: &str) -> Result<(), StoreError> {
    store
        .send(StoreRequest::delete(format!(
            "/all/V1/products/{}",
            encode_segment(sku)
        )))
        .await?;
    Ok(())
}

pub async fn submit_bulk(
    store: &dyn StoreService,
    method: Method,
    path: &str,
    items: Vec<Value>,
) -> Result<BulkAccepted, StoreError> {
    let request = StoreRequest::new(method, path).with_body(Value::Array(items));
    decode(store.send(request).await?)
}

pub async fn bulk_detailed_status(
    store: &dyn StoreService,
    bulk_uuid: &str,
) -> Result<BulkStatus, StoreError> {
    let value = store
        .send(StoreRequest::get(format!(
            "/V1/bulk/{}/detailed-status",
            encode_segment(bulk_uuid)
        )))
        .await?;
    decode(value)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Percent-encodes a value for use as one URL path segment.
pub fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_segment_escapes_reserved_bytes() {
        assert_eq!(encode_segment("CHAIR-01"), "CHAIR-01");
        assert_eq!(encode_segment("A/B C"), "A%2FB%20C");
        assert_eq!(encode_segment("Stuhl-ü"), "Stuhl-%C3%BC");
    }

    #[test]
    fn storeview_bulk_path_uses_code() {
        assert_eq!(bulk_storeview_products("de"), "/de/async/bulk/V1/products/bySku");
    }
}
