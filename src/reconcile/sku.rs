//! Unique SKUs for auto-registered configurable products.

use anyhow::Result;
use sqlx::{Sqlite, Transaction};

use crate::db::catalog;

/// `base`, then `base0`, `base1`, ...
pub fn candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_string()).chain((0u64..).map(move |n| format!("{base}{n}")))
}

/// First candidate not yet used by any layer record of the instance.
pub async fn unique_sku_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: i64,
    base: &str,
) -> Result<String> {
    for candidate in candidates(base.trim()) {
        if !catalog::sku_taken_tx(tx, instance_id, &candidate).await? {
            return Ok(candidate);
        }
    }
    anyhow::bail!("no free SKU derived from {base}")
}
