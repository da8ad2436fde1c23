//! Typed views over Store REST payloads.
//!
//! Only the fields the sync engine reads are modelled; unknown keys are
//! ignored and missing collections default to empty.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Textual timestamp format of `updated_at`/`created_at` fields.
pub const STORE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Generic `searchCriteria` list response.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SearchPage {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub total_count: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RemoteProduct {
    #[serde(default)]
    pub id: i64,
    pub sku: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub type_id: Option<String>,
    #[serde(default)]
    pub attribute_set_id: Option<i64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub media_gallery_entries: Vec<MediaEntry>,
    #[serde(default)]
    pub extension_attributes: ProductExtension,
    #[serde(default)]
    pub custom_attributes: Vec<CustomAttribute>,
}

impl RemoteProduct {
    pub fn is_type(&self, type_id: &str) -> bool {
        self.type_id.as_deref() == Some(type_id)
    }

    pub fn custom_attribute(&self, code: &str) -> Option<&Value> {
        self.custom_attributes
            .iter()
            .find(|a| a.attribute_code == code)
            .map(|a| &a.value)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct MediaEntry {
    pub id: i64,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ProductExtension {
    #[serde(default)]
    pub website_ids: Vec<i64>,
    #[serde(default)]
    pub configurable_product_options: Vec<ConfigurableOption>,
    #[serde(default)]
    pub configurable_product_links: Vec<i64>,
    /// JSON-encoded `{simple_product_sku, simple_product_attribute: [{label, value}]}` strings.
    #[serde(default)]
    pub configurable_product_link_data: Vec<String>,
    #[serde(default)]
    pub category_links: Vec<CategoryLink>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ConfigurableOption {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(deserialize_with = "string_or_number")]
    pub attribute_id: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CategoryLink {
    #[serde(default)]
    pub position: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub category_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CustomAttribute {
    pub attribute_code: String,
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RemoteAttributeSet {
    pub attribute_set_id: i64,
    pub attribute_set_name: String,
    #[serde(default)]
    pub entity_type_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RemoteAttribute {
    pub attribute_id: i64,
    pub attribute_code: String,
    #[serde(default)]
    pub default_frontend_label: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub is_user_defined: bool,
    #[serde(default)]
    pub options: Vec<AttributeOption>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AttributeOption {
    #[serde(deserialize_with = "string_or_number")]
    pub label: String,
    #[serde(deserialize_with = "string_or_number")]
    pub value: String,
}

/// Submission response of an `/async/bulk/...` endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BulkAccepted {
    pub bulk_uuid: String,
    #[serde(default)]
    pub request_items: Vec<BulkRequestItem>,
    #[serde(default)]
    pub errors: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BulkRequestItem {
    pub id: i64,
    #[serde(default)]
    pub status: String,
}

/// `/V1/bulk/{uuid}/detailed-status` response.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BulkStatus {
    #[serde(default)]
    pub operations_list: Vec<BulkOperation>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BulkOperation {
    pub id: i64,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub result_message: Option<String>,
    #[serde(default)]
    pub result_serialized_data: Option<String>,
    #[serde(default)]
    pub serialized_data: Option<String>,
}

impl BulkOperation {
    /// SKU of the affected item, decoded from the serialized result or, failing
    /// that, the serialized request. Non-object payloads yield `None`.
    pub fn sku(&self) -> Option<String> {
        [&self.result_serialized_data, &self.serialized_data]
            .into_iter()
            .flatten()
            .filter(|raw| !raw.trim().is_empty())
            .find_map(|raw| sku_from_serialized(raw))
    }
}

fn sku_from_serialized(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    // A link request names the parent as `sku`; the item belongs to the child.
    if let Some(sku) = object
        .get("childSku")
        .or_else(|| object.get("sku"))
        .and_then(Value::as_str)
    {
        return Some(sku.to_string());
    }
    // Request payloads nest the entity under `meta_information`.
    let meta = object.get("meta_information").and_then(Value::as_str)?;
    let meta: Value = serde_json::from_str(meta).ok()?;
    meta.get("childSku")
        .or_else(|| meta.get("sku"))
        .or_else(|| meta.get("product").and_then(|p| p.get("sku")))
        .or_else(|| meta.get("productWebsiteLink").and_then(|p| p.get("sku")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RemoteOrder {
    #[serde(default)]
    pub entity_id: Option<i64>,
    pub increment_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_firstname: Option<String>,
    #[serde(default)]
    pub customer_lastname: Option<String>,
    #[serde(default)]
    pub order_currency_code: Option<String>,
    #[serde(default)]
    pub grand_total: f64,
    #[serde(default)]
    pub items: Vec<RemoteOrderItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RemoteOrderItem {
    pub sku: String,
    #[serde(default)]
    pub qty_ordered: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub parent_item_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RemoteCustomer {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub website_id: Option<i64>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Ok(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_product_tolerates_sparse_payloads() {
        let product: RemoteProduct = serde_json::from_value(json!({
            "id": 7,
            "sku": "CHAIR",
            "type_id": "configurable",
            "extension_attributes": {
                "configurable_product_options": [{ "id": 3, "attribute_id": "93", "label": "Color" }],
                "configurable_product_links": [11, 12]
            }
        }))
        .unwrap();
        assert!(product.is_type("configurable"));
        assert_eq!(product.extension_attributes.configurable_product_options[0].attribute_id, "93");
        assert_eq!(product.extension_attributes.configurable_product_links, vec![11, 12]);
        assert!(product.media_gallery_entries.is_empty());
        assert!(product.updated_at.is_none());
    }

    #[test]
    fn attribute_option_values_accept_numbers() {
        let attr: RemoteAttribute = serde_json::from_value(json!({
            "attribute_id": 93,
            "attribute_code": "color",
            "default_frontend_label": "Color",
            "scope": "global",
            "is_user_defined": true,
            "options": [{ "label": " ", "value": "" }, { "label": "Red", "value": 5 }]
        }))
        .unwrap();
        assert_eq!(attr.options[1].value, "5");
    }

    #[test]
    fn bulk_operation_sku_prefers_result_data() {
        let op = BulkOperation {
            id: 1,
            status: 1,
            result_message: None,
            result_serialized_data: Some(r#"{"sku":"CHAIR-RED"}"#.into()),
            serialized_data: Some(r#"{"meta_information":"{\"product\":{\"sku\":\"OTHER\"}}"}"#.into()),
        };
        assert_eq!(op.sku().as_deref(), Some("CHAIR-RED"));
    }

    #[test]
    fn bulk_operation_sku_falls_back_to_request_meta() {
        let op = BulkOperation {
            id: 2,
            status: 3,
            result_message: Some("boom".into()),
            result_serialized_data: Some("[]".into()),
            serialized_data: Some(r#"{"meta_information":"{\"product\":{\"sku\":\"CHAIR\"}}"}"#.into()),
        };
        assert_eq!(op.sku().as_deref(), Some("CHAIR"));

        let op = BulkOperation {
            id: 3,
            status: 3,
            result_message: None,
            result_serialized_data: Some("not json".into()),
            serialized_data: None,
        };
        assert_eq!(op.sku(), None);
    }

    #[test]
    fn link_operation_belongs_to_the_child() {
        let op = BulkOperation {
            id: 4,
            status: 3,
            result_message: Some("The product is already attached.".into()),
            result_serialized_data: None,
            serialized_data: Some(
                r#"{"entity_id":null,"meta_information":"{\"sku\":\"CHAIR\",\"childSku\":\"CHAIR-RED\"}"}"#
                    .into(),
            ),
        };
        assert_eq!(op.sku().as_deref(), Some("CHAIR-RED"));
    }
}
