//! Queue line handlers: turn one ingested Store payload into a Ledger record.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::db::catalog::{self, ImportedProduct};
use crate::db::model::{CustomerRecord, OrderItemRecord, OrderRecord};
use crate::db::{Pool, QueueLineRow};
use crate::model::{EntityKind, Instance};
use crate::queue::{LineHandler, LineOutcome};
use crate::store::api;
use crate::store::model::{RemoteCustomer, RemoteOrder, RemoteProduct};
use crate::store::StoreService;

fn decode_payload<T: DeserializeOwned>(line: &QueueLineRow) -> Result<T, LineOutcome> {
    serde_json::from_str(&line.payload).map_err(|e| {
        LineOutcome::Failed(format!(
            "Unable to read the {} payload of {}: {}",
            line.kind.as_str(),
            line.remote_ref,
            e
        ))
    })
}

fn customer_record(customer: &RemoteCustomer) -> Option<CustomerRecord> {
    let email = customer.email.as_deref().map(str::trim).filter(|e| !e.is_empty())?;
    Some(CustomerRecord {
        remote_id: customer.id,
        email: email.to_string(),
        firstname: customer.firstname.clone(),
        lastname: customer.lastname.clone(),
        website_id: customer.website_id,
    })
}

/// Orders: idempotent by increment id.
pub struct OrderHandler {
    store: Arc<dyn StoreService>,
}

impl OrderHandler {
    pub fn new(store: Arc<dyn StoreService>) -> Self {
        Self { store }
    }

    /// Local customer id for the order, fetching the customer from the Store
    /// when it was never imported. Guest orders have none.
    async fn resolve_customer(
        &self,
        pool: &Pool,
        instance: &Instance,
        order: &RemoteOrder,
    ) -> Result<Result<Option<i64>, LineOutcome>> {
        let Some(remote_id) = order.customer_id else {
            return Ok(Ok(None));
        };
        if let Some(id) = catalog::find_customer_by_remote_id(pool, instance.id, remote_id).await? {
            return Ok(Ok(Some(id)));
        }
        let customer = match api::customer_by_id(self.store.as_ref(), remote_id).await {
            Ok(customer) => customer,
            Err(e) if e.is_transient() => {
                return Ok(Err(LineOutcome::Retry(format!(
                    "Customer {} of order {} could not be fetched: {}",
                    remote_id, order.increment_id, e
                ))))
            }
            Err(e) => {
                return Ok(Err(LineOutcome::Failed(format!(
                    "Customer {} of order {} is not available in the Store: {}",
                    remote_id, order.increment_id, e
                ))))
            }
        };
        let Some(record) = customer_record(&customer) else {
            return Ok(Err(LineOutcome::Failed(format!(
                "Customer {} of order {} has no e-mail address.",
                remote_id, order.increment_id
            ))));
        };
        Ok(Ok(Some(catalog::upsert_customer(pool, instance.id, &record).await?)))
    }
}

#[async_trait]
impl LineHandler for OrderHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::Orders
    }

    #[instrument(skip_all, fields(order = %line.remote_ref))]
    async fn handle(
        &self,
        pool: &Pool,
        instance: &Instance,
        line: &QueueLineRow,
    ) -> Result<LineOutcome> {
        let order: RemoteOrder = match decode_payload(line) {
            Ok(order) => order,
            Err(outcome) => return Ok(outcome),
        };
        if let Some(id) = catalog::find_order(pool, instance.id, &order.increment_id).await? {
            debug!(order_id = id, "order already imported");
            return Ok(LineOutcome::Done(format!("order:{id}")));
        }

        // Child rows of configurable items repeat the parent's SKU line.
        let items: Vec<_> = order
            .items
            .iter()
            .filter(|item| item.parent_item_id.is_none())
            .collect();
        let mut missing = Vec::new();
        for item in &items {
            if !catalog::layer_sku_exists(pool, instance.id, &item.sku).await? {
                missing.push(item.sku.as_str());
            }
        }
        if !missing.is_empty() {
            return Ok(LineOutcome::Failed(format!(
                "Order {} contains product(s) unknown to the Ledger: {}",
                order.increment_id,
                missing.join(", ")
            )));
        }

        let customer_id = match self.resolve_customer(pool, instance, &order).await? {
            Ok(id) => id,
            Err(outcome) => return Ok(outcome),
        };

        let record = OrderRecord {
            increment_id: order.increment_id.clone(),
            remote_id: order.entity_id,
            customer_id,
            customer_email: order.customer_email.clone(),
            status: order.status.clone(),
            currency: order.order_currency_code.clone(),
            grand_total: order.grand_total,
            items: items
                .iter()
                .map(|item| OrderItemRecord {
                    sku: item.sku.clone(),
                    qty: item.qty_ordered,
                    price: item.price,
                })
                .collect(),
        };
        let id = catalog::insert_order(pool, instance.id, &record).await?;
        Ok(LineOutcome::Done(format!("order:{id}")))
    }
}

pub struct CustomerHandler;

#[async_trait]
impl LineHandler for CustomerHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::Customers
    }

    #[instrument(skip_all, fields(customer = %line.remote_ref))]
    async fn handle(
        &self,
        pool: &Pool,
        instance: &Instance,
        line: &QueueLineRow,
    ) -> Result<LineOutcome> {
        let customer: RemoteCustomer = match decode_payload(line) {
            Ok(customer) => customer,
            Err(outcome) => return Ok(outcome),
        };
        let Some(record) = customer_record(&customer) else {
            return Ok(LineOutcome::Failed(format!(
                "Customer {} has no e-mail address.",
                customer.id
            )));
        };
        let id = catalog::upsert_customer(pool, instance.id, &record).await?;
        Ok(LineOutcome::Done(format!("customer:{id}")))
    }
}

/// Products: configurables become layer parents, simples attach to the
/// parent that lists them among its children.
pub struct ProductHandler;

fn imported(product: &RemoteProduct) -> ImportedProduct {
    ImportedProduct {
        sku: product.sku.clone(),
        name: product.name.clone().unwrap_or_else(|| product.sku.clone()),
        remote_id: product.id,
        website_ids: product.extension_attributes.website_ids.clone(),
        updated_at: product.updated_at.clone(),
    }
}

#[async_trait]
impl LineHandler for ProductHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::Products
    }

    #[instrument(skip_all, fields(sku = %line.remote_ref))]
    async fn handle(
        &self,
        pool: &Pool,
        instance: &Instance,
        line: &QueueLineRow,
    ) -> Result<LineOutcome> {
        let product: RemoteProduct = match decode_payload(line) {
            Ok(product) => product,
            Err(outcome) => return Ok(outcome),
        };

        if product.is_type("configurable") {
            if line.do_not_update {
                if let Some(existing) =
                    catalog::find_configurable_by_sku(pool, instance.id, &product.sku).await?
                {
                    return Ok(LineOutcome::Done(format!("configurable:{}", existing.id)));
                }
            }
            let ext = &product.extension_attributes;
            let axes: Vec<String> = ext
                .configurable_product_options
                .iter()
                .filter_map(|o| o.label.clone())
                .collect();
            let id = catalog::upsert_imported_configurable(
                pool,
                instance.id,
                &imported(&product),
                &axes,
                &ext.configurable_product_links,
            )
            .await?;
            return Ok(LineOutcome::Done(format!("configurable:{id}")));
        }

        if !product.is_type("simple") {
            return Ok(LineOutcome::Cancelled(format!(
                "Product {} of type {} is not synchronised.",
                product.sku,
                product.type_id.as_deref().unwrap_or("unknown")
            )));
        }

        if line.do_not_update {
            if let Some(existing) =
                catalog::find_simple_by_sku(pool, instance.id, &product.sku).await?
            {
                return Ok(LineOutcome::Done(format!("simple:{}", existing.id)));
            }
        }
        let Some(parent_id) =
            catalog::find_parent_of_remote_child(pool, instance.id, product.id).await?
        else {
            return Ok(LineOutcome::Failed(format!(
                "Simple product {} is not linked to any imported Configurable Product.",
                product.sku
            )));
        };
        let id = catalog::upsert_imported_simple(
            pool,
            instance.id,
            parent_id,
            &imported(&product),
            product.price.unwrap_or_default(),
            product.weight.unwrap_or_default(),
        )
        .await?;
        Ok(LineOutcome::Done(format!("simple:{id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_without_email_is_rejected() {
        let customer = RemoteCustomer {
            id: 4,
            email: Some("  ".into()),
            firstname: None,
            lastname: None,
            website_id: Some(1),
        };
        assert!(customer_record(&customer).is_none());
        let customer = RemoteCustomer {
            email: Some("a@example.com".into()),
            ..customer
        };
        assert_eq!(customer_record(&customer).unwrap().email, "a@example.com");
    }
}
