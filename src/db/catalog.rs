//! Ledger-side records: the product layer mirrored to the Store, plus the
//! customers and orders materialised from ingested queue lines.

use super::model::{
    AttributeValue, ConfigurableProduct, CustomerRecord, OrderRecord, OwnerKind, ProductImage,
    ProductSync, SimpleProduct, Translation,
};
use super::repo::Pool;
use crate::model::ExportStatus;
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::instrument;

fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.get(column);
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in column {column}"))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to encode JSON column")
}

fn status_column(row: &SqliteRow) -> Result<ExportStatus> {
    let raw: String = row.get("status");
    ExportStatus::parse_status(&raw).ok_or_else(|| anyhow!("unknown export status {raw}"))
}

const CONFIGURABLE_COLUMNS: &str = "id, instance_id, template_ref, sku, name, description, \
    attribute_set, assign_attributes, category_ids, do_not_create, remote_id, remote_children, \
    website_ids, status, export_date, force_update, active";

const SIMPLE_COLUMNS: &str = "id, instance_id, configurable_id, sku, name, attributes, price, \
    weight, qty, remote_id, website_ids, status, export_date, force_update, active";

fn configurable_from_row(row: &SqliteRow) -> Result<ConfigurableProduct> {
    Ok(ConfigurableProduct {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        template_ref: row.get("template_ref"),
        sku: row.get("sku"),
        name: row.get("name"),
        description: row.try_get::<Option<String>, _>("description").ok().flatten(),
        attribute_set: row
            .try_get::<Option<String>, _>("attribute_set")
            .ok()
            .flatten()
            .filter(|s| !s.trim().is_empty()),
        assign_attributes: json_column(row, "assign_attributes")?,
        category_ids: json_column(row, "category_ids")?,
        do_not_create: row.get("do_not_create"),
        remote_id: row.try_get::<Option<i64>, _>("remote_id").ok().flatten(),
        remote_children: json_column(row, "remote_children")?,
        website_ids: json_column(row, "website_ids")?,
        status: status_column(row)?,
        export_date: row.try_get::<Option<String>, _>("export_date").ok().flatten(),
        force_update: row.get("force_update"),
        active: row.get("active"),
    })
}

fn simple_from_row(row: &SqliteRow) -> Result<SimpleProduct> {
    Ok(SimpleProduct {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        configurable_id: row.get("configurable_id"),
        sku: row.get("sku"),
        name: row.get("name"),
        attributes: json_column(row, "attributes")?,
        price: row.get("price"),
        weight: row.get("weight"),
        qty: row.get("qty"),
        remote_id: row.try_get::<Option<i64>, _>("remote_id").ok().flatten(),
        website_ids: json_column(row, "website_ids")?,
        status: status_column(row)?,
        export_date: row.try_get::<Option<String>, _>("export_date").ok().flatten(),
        force_update: row.get("force_update"),
        active: row.get("active"),
    })
}

// ---------------------------------------------------------------------------
// Product layer registration

/// Local template registered for export.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConfigurable {
    pub template_ref: String,
    pub name: String,
    pub description: Option<String>,
    pub attribute_set: Option<String>,
    pub assign_attributes: Vec<String>,
    pub category_ids: Vec<String>,
    pub do_not_create: bool,
}

/// Local variant registered for export.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSimple {
    pub sku: String,
    pub name: String,
    pub attributes: Vec<AttributeValue>,
    pub price: f64,
    pub weight: f64,
    pub qty: f64,
}

/// Whether any layer record of the instance already uses `sku`.
pub async fn sku_taken_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: i64,
    sku: &str,
) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM configurable_products WHERE instance_id = ? AND sku = ? \
         UNION ALL SELECT id FROM simple_products WHERE instance_id = ? AND sku = ? LIMIT 1",
    )
    .bind(instance_id)
    .bind(sku)
    .bind(instance_id)
    .bind(sku)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(found.is_some())
}

pub async fn configurable_by_template_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: i64,
    template_ref: &str,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar(
        "SELECT id FROM configurable_products WHERE instance_id = ? AND template_ref = ?",
    )
    .bind(instance_id)
    .bind(template_ref)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(id)
}

pub async fn insert_configurable_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: i64,
    sku: &str,
    template: &NewConfigurable,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO configurable_products (instance_id, template_ref, sku, name, description, \
         attribute_set, assign_attributes, category_ids, do_not_create) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(instance_id)
    .bind(&template.template_ref)
    .bind(sku)
    .bind(&template.name)
    .bind(&template.description)
    .bind(&template.attribute_set)
    .bind(to_json(&template.assign_attributes)?)
    .bind(to_json(&template.category_ids)?)
    .bind(template.do_not_create)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

/// Refreshes the local definition of an already registered template and
/// forces it (and its variants) through the next export.
pub async fn refresh_configurable_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: i64,
    template: &NewConfigurable,
) -> Result<()> {
    sqlx::query(
        "UPDATE configurable_products SET name = ?, description = ?, attribute_set = ?, \
         assign_attributes = ?, category_ids = ?, do_not_create = ?, active = 1, force_update = 1 \
         WHERE id = ?",
    )
    .bind(&template.name)
    .bind(&template.description)
    .bind(&template.attribute_set)
    .bind(to_json(&template.assign_attributes)?)
    .bind(to_json(&template.category_ids)?)
    .bind(template.do_not_create)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    sqlx::query("UPDATE simple_products SET force_update = 1 WHERE configurable_id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Inserts or refreshes a variant by SKU. Returns the record id.
pub async fn upsert_simple_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: i64,
    configurable_id: i64,
    variant: &NewSimple,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO simple_products (instance_id, configurable_id, sku, name, attributes, price, weight, qty) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(instance_id, sku) DO UPDATE SET configurable_id = excluded.configurable_id, \
         name = excluded.name, attributes = excluded.attributes, price = excluded.price, \
         weight = excluded.weight, qty = excluded.qty, active = 1 \
         RETURNING id",
    )
    .bind(instance_id)
    .bind(configurable_id)
    .bind(&variant.sku)
    .bind(&variant.name)
    .bind(to_json(&variant.attributes)?)
    .bind(variant.price)
    .bind(variant.weight)
    .bind(variant.qty)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

// ---------------------------------------------------------------------------
// Product layer queries

pub async fn get_configurable(pool: &Pool, id: i64) -> Result<ConfigurableProduct> {
    let row = sqlx::query(&format!(
        "SELECT {CONFIGURABLE_COLUMNS} FROM configurable_products WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Err(anyhow!("configurable product {} not found", id));
    };
    configurable_from_row(&row)
}

pub async fn find_configurable_by_sku(
    pool: &Pool,
    instance_id: i64,
    sku: &str,
) -> Result<Option<ConfigurableProduct>> {
    let row = sqlx::query(&format!(
        "SELECT {CONFIGURABLE_COLUMNS} FROM configurable_products WHERE instance_id = ? AND sku = ?"
    ))
    .bind(instance_id)
    .bind(sku)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(configurable_from_row).transpose()
}

/// Active configurable products of the instance, optionally restricted to `ids`.
#[instrument(skip_all)]
pub async fn list_configurables(
    pool: &Pool,
    instance_id: i64,
    ids: Option<&[i64]>,
) -> Result<Vec<ConfigurableProduct>> {
    let rows = sqlx::query(&format!(
        "SELECT {CONFIGURABLE_COLUMNS} FROM configurable_products \
         WHERE instance_id = ? AND active = 1 ORDER BY id"
    ))
    .bind(instance_id)
    .fetch_all(pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let product = configurable_from_row(&row)?;
        if ids.map_or(true, |ids| ids.contains(&product.id)) {
            out.push(product);
        }
    }
    Ok(out)
}

pub async fn simples_of(pool: &Pool, configurable_id: i64) -> Result<Vec<SimpleProduct>> {
    let rows = sqlx::query(&format!(
        "SELECT {SIMPLE_COLUMNS} FROM simple_products WHERE configurable_id = ? AND active = 1 ORDER BY id"
    ))
    .bind(configurable_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(simple_from_row).collect()
}

pub async fn get_simple(pool: &Pool, id: i64) -> Result<SimpleProduct> {
    let row = sqlx::query(&format!("SELECT {SIMPLE_COLUMNS} FROM simple_products WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Err(anyhow!("simple product {} not found", id));
    };
    simple_from_row(&row)
}

pub async fn find_simple_by_sku(
    pool: &Pool,
    instance_id: i64,
    sku: &str,
) -> Result<Option<SimpleProduct>> {
    let row = sqlx::query(&format!(
        "SELECT {SIMPLE_COLUMNS} FROM simple_products WHERE instance_id = ? AND sku = ?"
    ))
    .bind(instance_id)
    .bind(sku)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(simple_from_row).transpose()
}

/// Configurable whose remote children include `remote_child_id`.
pub async fn find_parent_of_remote_child(
    pool: &Pool,
    instance_id: i64,
    remote_child_id: i64,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar(
        "SELECT c.id FROM configurable_products c, json_each(c.remote_children) j \
         WHERE c.instance_id = ? AND j.value = ? LIMIT 1",
    )
    .bind(instance_id)
    .bind(remote_child_id)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

pub async fn images_of(pool: &Pool, owner: OwnerKind, owner_id: i64) -> Result<Vec<ProductImage>> {
    let rows = sqlx::query(
        "SELECT id, role, label, position, content FROM product_images \
         WHERE owner_kind = ? AND owner_id = ? ORDER BY position, id",
    )
    .bind(owner.as_str())
    .bind(owner_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| ProductImage {
            id: row.get("id"),
            role: row.try_get::<Option<String>, _>("role").ok().flatten(),
            label: row.try_get::<Option<String>, _>("label").ok().flatten(),
            position: row.get("position"),
            content: row.get("content"),
        })
        .collect())
}

pub async fn add_image(
    pool: &Pool,
    owner: OwnerKind,
    owner_id: i64,
    role: Option<&str>,
    label: Option<&str>,
    content: &[u8],
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO product_images (owner_kind, owner_id, role, label, position, content) \
         VALUES (?, ?, ?, ?, (SELECT COUNT(*) FROM product_images WHERE owner_kind = ? AND owner_id = ?), ?) \
         RETURNING id",
    )
    .bind(owner.as_str())
    .bind(owner_id)
    .bind(role)
    .bind(label)
    .bind(owner.as_str())
    .bind(owner_id)
    .bind(content)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

pub async fn translations_of(
    pool: &Pool,
    owner: OwnerKind,
    owner_id: i64,
) -> Result<Vec<Translation>> {
    let rows = sqlx::query(
        "SELECT lang, name, description FROM product_translations \
         WHERE owner_kind = ? AND owner_id = ? ORDER BY lang",
    )
    .bind(owner.as_str())
    .bind(owner_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| Translation {
            lang: row.get("lang"),
            name: row.get("name"),
            description: row.try_get::<Option<String>, _>("description").ok().flatten(),
        })
        .collect())
}

pub async fn set_translation(
    pool: &Pool,
    owner: OwnerKind,
    owner_id: i64,
    translation: &Translation,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO product_translations (owner_kind, owner_id, lang, name, description) \
         VALUES (?, ?, ?, ?, ?) ON CONFLICT(owner_kind, owner_id, lang) \
         DO UPDATE SET name = excluded.name, description = excluded.description",
    )
    .bind(owner.as_str())
    .bind(owner_id)
    .bind(&translation.lang)
    .bind(&translation.name)
    .bind(&translation.description)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Write-back of reconciliation outcomes

fn owner_table(owner: OwnerKind) -> &'static str {
    match owner {
        OwnerKind::Configurable => "configurable_products",
        OwnerKind::Simple => "simple_products",
    }
}

/// Writes one reconciliation outcome. Website links are replaced wholesale and
/// the export date only moves when the record was exported.
pub async fn apply_product_sync_tx(
    tx: &mut Transaction<'_, Sqlite>,
    owner: OwnerKind,
    sync: &ProductSync,
) -> Result<()> {
    let table = owner_table(owner);
    sqlx::query(&format!(
        "UPDATE {table} SET status = ?, remote_id = ?, force_update = ?, \
         export_date = COALESCE(?, export_date) WHERE id = ?"
    ))
    .bind(sync.status.as_str())
    .bind(sync.remote_id)
    .bind(sync.force_update)
    .bind(&sync.export_date)
    .bind(sync.id)
    .execute(&mut **tx)
    .await?;
    if let Some(websites) = &sync.website_ids {
        sqlx::query(&format!("UPDATE {table} SET website_ids = ? WHERE id = ?"))
            .bind(to_json(websites)?)
            .bind(sync.id)
            .execute(&mut **tx)
            .await?;
    }
    if let (OwnerKind::Configurable, Some(children)) = (owner, &sync.remote_children) {
        sqlx::query("UPDATE configurable_products SET remote_children = ? WHERE id = ?")
            .bind(to_json(children)?)
            .bind(sync.id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

pub async fn set_product_status(
    pool: &Pool,
    owner: OwnerKind,
    id: i64,
    status: ExportStatus,
) -> Result<()> {
    sqlx::query(&format!("UPDATE {} SET status = ? WHERE id = ?", owner_table(owner)))
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Marks a record as removed from the Store.
pub async fn mark_product_deleted(pool: &Pool, owner: OwnerKind, id: i64) -> Result<()> {
    sqlx::query(&format!(
        "UPDATE {} SET status = 'deleted', remote_id = NULL, export_date = NULL, \
         website_ids = '[]', force_update = 0 WHERE id = ?",
        owner_table(owner)
    ))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Products materialised from the Store

/// Remote state of a product seen during ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedProduct {
    pub sku: String,
    pub name: String,
    pub remote_id: i64,
    pub website_ids: Vec<i64>,
    pub updated_at: Option<String>,
}

#[instrument(skip_all)]
pub async fn upsert_imported_configurable(
    pool: &Pool,
    instance_id: i64,
    product: &ImportedProduct,
    assign_attributes: &[String],
    remote_children: &[i64],
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO configurable_products (instance_id, template_ref, sku, name, assign_attributes, \
         remote_id, remote_children, website_ids, status, export_date) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'in_magento', ?) \
         ON CONFLICT(instance_id, sku) DO UPDATE SET remote_id = excluded.remote_id, \
         remote_children = excluded.remote_children, website_ids = excluded.website_ids, \
         status = 'in_magento', export_date = excluded.export_date \
         RETURNING id",
    )
    .bind(instance_id)
    .bind(format!("remote:{}", product.sku))
    .bind(&product.sku)
    .bind(&product.name)
    .bind(to_json(&assign_attributes)?)
    .bind(product.remote_id)
    .bind(to_json(&remote_children)?)
    .bind(to_json(&product.website_ids)?)
    .bind(&product.updated_at)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn upsert_imported_simple(
    pool: &Pool,
    instance_id: i64,
    configurable_id: i64,
    product: &ImportedProduct,
    price: f64,
    weight: f64,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO simple_products (instance_id, configurable_id, sku, name, price, weight, \
         remote_id, website_ids, status, export_date) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'in_magento', ?) \
         ON CONFLICT(instance_id, sku) DO UPDATE SET configurable_id = excluded.configurable_id, \
         remote_id = excluded.remote_id, website_ids = excluded.website_ids, \
         status = 'in_magento', export_date = excluded.export_date \
         RETURNING id",
    )
    .bind(instance_id)
    .bind(configurable_id)
    .bind(&product.sku)
    .bind(&product.name)
    .bind(price)
    .bind(weight)
    .bind(product.remote_id)
    .bind(to_json(&product.website_ids)?)
    .bind(&product.updated_at)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

pub async fn layer_sku_exists(pool: &Pool, instance_id: i64, sku: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM simple_products WHERE instance_id = ? AND sku = ? AND active = 1 \
         UNION ALL SELECT id FROM configurable_products WHERE instance_id = ? AND sku = ? AND active = 1 \
         LIMIT 1",
    )
    .bind(instance_id)
    .bind(sku)
    .bind(instance_id)
    .bind(sku)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

// ---------------------------------------------------------------------------
// Customers and orders

#[instrument(skip_all)]
pub async fn upsert_customer(pool: &Pool, instance_id: i64, customer: &CustomerRecord) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO customers (instance_id, remote_id, email, firstname, lastname, website_id) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(instance_id, remote_id) DO UPDATE SET email = excluded.email, \
         firstname = excluded.firstname, lastname = excluded.lastname, \
         website_id = excluded.website_id, updated_at = CURRENT_TIMESTAMP \
         RETURNING id",
    )
    .bind(instance_id)
    .bind(customer.remote_id)
    .bind(&customer.email)
    .bind(&customer.firstname)
    .bind(&customer.lastname)
    .bind(customer.website_id)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

pub async fn find_customer_by_remote_id(
    pool: &Pool,
    instance_id: i64,
    remote_id: i64,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar("SELECT id FROM customers WHERE instance_id = ? AND remote_id = ?")
        .bind(instance_id)
        .bind(remote_id)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

pub async fn find_order(pool: &Pool, instance_id: i64, increment_id: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar("SELECT id FROM orders WHERE instance_id = ? AND increment_id = ?")
        .bind(instance_id)
        .bind(increment_id)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn insert_order(pool: &Pool, instance_id: i64, order: &OrderRecord) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let order_id: i64 = sqlx::query(
        "INSERT INTO orders (instance_id, increment_id, remote_id, customer_id, customer_email, \
         status, currency, grand_total) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(instance_id)
    .bind(&order.increment_id)
    .bind(order.remote_id)
    .bind(order.customer_id)
    .bind(&order.customer_email)
    .bind(&order.status)
    .bind(&order.currency)
    .bind(order.grand_total)
    .fetch_one(&mut *tx)
    .await?
    .get("id");
    for item in &order.items {
        sqlx::query("INSERT INTO order_items (order_id, sku, qty, price) VALUES (?, ?, ?, ?)")
            .bind(order_id)
            .bind(&item.sku)
            .bind(item.qty)
            .bind(item.price)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(order_id)
}

pub async fn order_item_count(pool: &Pool, order_id: i64) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_items WHERE order_id = ?")
        .bind(order_id)
        .fetch_one(pool)
        .await?;
    Ok(n)
}
