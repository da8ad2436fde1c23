//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use serde::{Deserialize, Serialize};

use crate::model::{BulkItemStatus, EntityKind, ExportStatus, LineCounts, LineState, QueueState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub id: i64,
    pub instance_id: i64,
    pub kind: EntityKind,
    pub name: String,
    pub process_count: i64,
    pub action_required: bool,
    pub log_book_id: Option<i64>,
}

/// Queue plus its derived state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSummary {
    pub queue: QueueRow,
    pub counts: LineCounts,
    pub state: QueueState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLineRow {
    pub id: i64,
    pub queue_id: i64,
    pub instance_id: i64,
    pub kind: EntityKind,
    pub remote_ref: String,
    pub payload: String,
    pub state: LineState,
    pub do_not_update: bool,
    pub entity_ref: Option<String>,
    pub processed_at: Option<String>,
}

/// Line to be appended during ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLine {
    pub remote_ref: String,
    pub payload: String,
    pub do_not_update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLineRow {
    pub id: i64,
    pub reference: Option<String>,
    pub queue_line_id: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnerKind {
    Configurable,
    Simple,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Configurable => "configurable",
            OwnerKind::Simple => "simple",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "configurable" => Some(OwnerKind::Configurable),
            "simple" => Some(OwnerKind::Simple),
            _ => None,
        }
    }
}

/// Attribute label with the value a variant carries for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeValue {
    pub attribute: String,
    pub value: String,
}

impl AttributeValue {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurableProduct {
    pub id: i64,
    pub instance_id: i64,
    pub template_ref: String,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub attribute_set: Option<String>,
    /// Attribute labels used as configurable axes.
    pub assign_attributes: Vec<String>,
    pub category_ids: Vec<String>,
    pub do_not_create: bool,
    pub remote_id: Option<i64>,
    pub remote_children: Vec<i64>,
    pub website_ids: Vec<i64>,
    pub status: ExportStatus,
    pub export_date: Option<String>,
    pub force_update: bool,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleProduct {
    pub id: i64,
    pub instance_id: i64,
    pub configurable_id: i64,
    pub sku: String,
    pub name: String,
    pub attributes: Vec<AttributeValue>,
    pub price: f64,
    pub weight: f64,
    pub qty: f64,
    pub remote_id: Option<i64>,
    pub website_ids: Vec<i64>,
    pub status: ExportStatus,
    pub export_date: Option<String>,
    pub force_update: bool,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductImage {
    pub id: i64,
    pub role: Option<String>,
    pub label: Option<String>,
    pub position: i64,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub lang: String,
    pub name: String,
    pub description: Option<String>,
}

/// Outcome of a reconciliation pass for one product-layer record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSync {
    pub id: i64,
    pub status: ExportStatus,
    pub remote_id: Option<i64>,
    /// Replaces the stored set wholesale when present.
    pub website_ids: Option<Vec<i64>>,
    pub remote_children: Option<Vec<i64>>,
    /// Only written when the record was actually exported.
    pub export_date: Option<String>,
    pub force_update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkJobRow {
    pub id: i64,
    pub instance_id: i64,
    pub remote_uuid: String,
    pub topic: String,
    pub submission_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkJobDetail {
    pub item_ref: i64,
    pub sku: Option<String>,
    pub status: BulkItemStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    pub remote_id: i64,
    pub email: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub website_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub increment_id: String,
    pub remote_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub customer_email: Option<String>,
    pub status: Option<String>,
    pub currency: Option<String>,
    pub grand_total: f64,
    pub items: Vec<OrderItemRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItemRecord {
    pub sku: String,
    pub qty: f64,
    pub price: f64,
}
