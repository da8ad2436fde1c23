//! Paginated ingestion of remote collections into queues.
//!
//! Each page is fetched, sliced into queue lines and committed together with
//! the advanced page cursor, so an interrupted run loses at most the page in
//! flight. The cursor goes back to 1 once the window is exhausted or a page
//! comes back empty.

use anyhow::Context;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, Paging};
use crate::db::{self, NewLine, Pool};
use crate::logbook::{Direction, PassLog};
use crate::model::{EntityKind, Instance, ProductPass};
use crate::store::api;
use crate::store::model::{RemoteProduct, STORE_DATETIME_FORMAT};
use crate::store::{Condition, SearchCriteria, StoreError, StoreService};

/// SKUs per `IN` lookup.
pub const SKU_CHUNK: usize = 50;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store unreachable while fetching {kind} page {page}: {source}")]
    Store {
        kind: &'static str,
        page: i64,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

impl IngestError {
    /// The whole step can be retried on the next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Store { .. })
    }
}

/// Inclusive `updated_at` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: Option<NaiveDateTime>,
    pub to: NaiveDateTime,
}

impl TimeWindow {
    pub fn until(to: NaiveDateTime) -> Self {
        Self { from: None, to }
    }

    fn apply(&self, criteria: SearchCriteria) -> SearchCriteria {
        let criteria = match self.from {
            Some(from) => criteria.filter(
                "updated_at",
                from.format(STORE_DATETIME_FORMAT).to_string(),
                Condition::Gteq,
            ),
            None => criteria,
        };
        criteria.filter(
            "updated_at",
            self.to.format(STORE_DATETIME_FORMAT).to_string(),
            Condition::Lteq,
        )
    }
}

/// Queue currently being filled, carried across pages of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchAccumulator {
    pub queue_id: Option<i64>,
    pub count: u32,
    pub total_batches: u32,
}

impl BatchAccumulator {
    /// Queue that receives the next line, rolling over once `batch_size` is reached.
    async fn queue_for_next(
        &mut self,
        tx: &mut Transaction<'_, Sqlite>,
        instance_id: i64,
        kind: EntityKind,
        batch_size: u32,
    ) -> anyhow::Result<i64> {
        if let Some(id) = self.queue_id {
            if self.count < batch_size {
                return Ok(id);
            }
        }
        let id = match db::find_open_queue_tx(tx, instance_id, kind, batch_size).await? {
            Some((id, count)) => {
                debug!(queue_id = id, count, "continuing open queue");
                self.count = count;
                id
            }
            None => {
                let id = db::create_queue_tx(tx, instance_id, kind).await?;
                debug!(queue_id = id, "created queue");
                self.count = 0;
                id
            }
        };
        self.queue_id = Some(id);
        self.total_batches += 1;
        Ok(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub pages: u32,
    pub lines_created: u32,
    pub duplicates_skipped: u32,
    /// Queues that received lines, in fill order.
    pub queues: Vec<i64>,
    pub total_count: i64,
}

impl IngestReport {
    fn touch_queue(&mut self, queue_id: i64) {
        if !self.queues.contains(&queue_id) {
            self.queues.push(queue_id);
        }
    }

    fn merge(&mut self, other: IngestReport) {
        self.pages += other.pages;
        self.lines_created += other.lines_created;
        self.duplicates_skipped += other.duplicates_skipped;
        self.total_count += other.total_count;
        for q in other.queues {
            self.touch_queue(q);
        }
    }
}

/// Remote collection walked page by page.
struct Collection<'a> {
    kind: EntityKind,
    path: &'a str,
    criteria: SearchCriteria,
    do_not_update: bool,
}

/// Identifier a queue line is keyed by.
pub fn remote_ref(kind: EntityKind, item: &Value) -> Option<String> {
    let field = match kind {
        EntityKind::Orders => "increment_id",
        EntityKind::Customers => "id",
        EntityKind::Products => "sku",
    };
    match item.get(field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Appends `items` to queues inside `tx`. Items without an identifier or with
/// a waiting draft line are skipped.
#[allow(clippy::too_many_arguments)]
async fn enqueue_items(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: i64,
    kind: EntityKind,
    batch_size: u32,
    items: &[Value],
    do_not_update: bool,
    acc: &mut BatchAccumulator,
    report: &mut IngestReport,
) -> anyhow::Result<()> {
    for item in items {
        let Some(reference) = remote_ref(kind, item) else {
            warn!(kind = kind.as_str(), "skipping item without identifier");
            continue;
        };
        if db::has_draft_line_tx(tx, instance_id, kind, &reference).await? {
            report.duplicates_skipped += 1;
            continue;
        }
        let queue_id = acc.queue_for_next(tx, instance_id, kind, batch_size).await?;
        let line = NewLine {
            remote_ref: reference,
            payload: serde_json::to_string(item).context("failed to encode line payload")?,
            do_not_update,
        };
        db::insert_line_tx(tx, queue_id, instance_id, kind, &line).await?;
        acc.count += 1;
        report.lines_created += 1;
        report.touch_queue(queue_id);
    }
    Ok(())
}

/// Walks one collection from the stored cursor to the end of the window.
///
/// The cursor is left at 1 in `instance` when the walk finishes; the caller
/// persists it.
#[instrument(skip_all, fields(kind = source.kind.as_str()))]
async fn ingest_collection(
    pool: &Pool,
    store: &dyn StoreService,
    instance: &mut Instance,
    paging: Paging,
    source: &Collection<'_>,
    acc: &mut BatchAccumulator,
) -> Result<IngestReport, IngestError> {
    let kind = source.kind;
    let mut report = IngestReport::default();
    let mut page = instance.page(kind);

    loop {
        let criteria = source.criteria.clone().page(paging.page_size, page);
        let result = api::search(store, source.path, &criteria)
            .await
            .map_err(|err| IngestError::Store {
                kind: kind.as_str(),
                page,
                source: err,
            })?;
        report.total_count = result.total_count;

        if result.items.is_empty() {
            debug!(page, "empty page, resetting cursor");
            break;
        }

        let mut items = result.items;
        items.truncate(paging.page_size as usize);

        let mut tx = pool.begin().await.context("failed to open page transaction")?;
        enqueue_items(
            &mut tx,
            instance.id,
            kind,
            paging.batch_size,
            &items,
            source.do_not_update,
            acc,
            &mut report,
        )
        .await?;
        instance.set_page(kind, page + 1);
        db::save_page_cursor_tx(&mut tx, instance, kind).await?;
        tx.commit().await.context("failed to commit page checkpoint")?;
        report.pages += 1;
        info!(page, items = items.len(), total = result.total_count, "page ingested");

        if page * i64::from(paging.page_size) > result.total_count {
            break;
        }
        page += 1;
    }

    instance.set_page(kind, 1);
    Ok(report)
}

#[instrument(skip_all)]
pub async fn ingest_orders(
    pool: &Pool,
    store: &dyn StoreService,
    cfg: &Config,
    instance: &mut Instance,
    window: TimeWindow,
) -> Result<IngestReport, IngestError> {
    let statuses = &cfg.instance.import_order_statuses;
    let mut criteria = window.apply(SearchCriteria::new());
    if !statuses.is_empty() {
        criteria = criteria.filter_in("status", statuses);
    }
    let source = Collection {
        kind: EntityKind::Orders,
        path: api::ORDERS_PATH,
        criteria,
        do_not_update: false,
    };
    let mut acc = BatchAccumulator::default();
    let report = ingest_collection(
        pool,
        store,
        instance,
        cfg.sync.paging(EntityKind::Orders),
        &source,
        &mut acc,
    )
    .await?;
    db::save_instance(pool, instance).await?;
    Ok(report)
}

/// Customers of every configured website.
#[instrument(skip_all)]
pub async fn ingest_customers(
    pool: &Pool,
    store: &dyn StoreService,
    cfg: &Config,
    instance: &mut Instance,
    window: TimeWindow,
) -> Result<IngestReport, IngestError> {
    let mut criteria = window.apply(SearchCriteria::new());
    let websites = cfg.instance.website_ids();
    if !websites.is_empty() {
        criteria = criteria.filter_in("website_id", websites.iter().map(|w| w.to_string()));
    }
    let source = Collection {
        kind: EntityKind::Customers,
        path: api::CUSTOMERS_PATH,
        criteria,
        do_not_update: false,
    };
    let mut acc = BatchAccumulator::default();
    let report = ingest_collection(
        pool,
        store,
        instance,
        cfg.sync.paging(EntityKind::Customers),
        &source,
        &mut acc,
    )
    .await?;
    db::save_instance(pool, instance).await?;
    Ok(report)
}

/// Enabled products, configurable parents first, then simple variants.
///
/// The instance remembers which pass the product cursor belongs to, so a run
/// interrupted during the simple pass resumes there.
#[instrument(skip_all)]
pub async fn ingest_products(
    pool: &Pool,
    store: &dyn StoreService,
    cfg: &Config,
    instance: &mut Instance,
    window: TimeWindow,
    do_not_update: bool,
) -> Result<IngestReport, IngestError> {
    let paging = cfg.sync.paging(EntityKind::Products);
    let mut acc = BatchAccumulator::default();
    let mut report = IngestReport::default();

    if instance.product_pass == ProductPass::Configurable {
        let source = product_collection(window, "configurable", do_not_update);
        report.merge(ingest_collection(pool, store, instance, paging, &source, &mut acc).await?);
        instance.product_pass = ProductPass::Simple;
        db::save_instance(pool, instance).await?;
    }

    let source = product_collection(window, "simple", do_not_update);
    report.merge(ingest_collection(pool, store, instance, paging, &source, &mut acc).await?);
    instance.product_pass = ProductPass::Configurable;
    db::save_instance(pool, instance).await?;
    Ok(report)
}

fn product_collection(window: TimeWindow, type_id: &str, do_not_update: bool) -> Collection<'static> {
    Collection {
        kind: EntityKind::Products,
        path: api::PRODUCTS_PATH,
        criteria: window
            .apply(SearchCriteria::new())
            .filter("status", "1", Condition::Eq)
            .filter("type_id", type_id, Condition::Eq),
        do_not_update,
    }
}

/// Enqueues the given SKUs regardless of their update date. Configurable
/// products are queued ahead of the rest; SKUs the Store does not know end up
/// in the log book of the last queue.
#[instrument(skip_all, fields(skus = skus.len()))]
pub async fn import_specific_products(
    pool: &Pool,
    store: &dyn StoreService,
    cfg: &Config,
    instance: &Instance,
    skus: &[String],
    do_not_update: bool,
) -> Result<IngestReport, IngestError> {
    let paging = cfg.sync.paging(EntityKind::Products);
    let mut found: Vec<(String, Value)> = Vec::new();
    let mut page = 0;
    for chunk in skus.chunks(SKU_CHUNK) {
        page += 1;
        let criteria = SearchCriteria::new().filter_in("sku", chunk);
        let result = api::search(store, api::PRODUCTS_PATH, &criteria)
            .await
            .map_err(|source| IngestError::Store {
                kind: EntityKind::Products.as_str(),
                page,
                source,
            })?;
        for item in result.items {
            if let Some(sku) = remote_ref(EntityKind::Products, &item) {
                found.push((sku, item));
            }
        }
    }

    let mut log = PassLog::new();
    for sku in skus {
        if !found.iter().any(|(s, _)| s == sku) {
            log.push(Some(sku), format!("Product {sku} was not found in the Store."));
        }
    }

    // Parents before variants.
    found.sort_by_key(|(_, item)| !is_configurable(item));
    let items: Vec<Value> = found.into_iter().map(|(_, item)| item).collect();

    let mut acc = BatchAccumulator::default();
    let mut report = IngestReport {
        total_count: items.len() as i64,
        ..Default::default()
    };
    let mut tx = pool.begin().await.context("failed to open import transaction")?;
    enqueue_items(
        &mut tx,
        instance.id,
        EntityKind::Products,
        paging.batch_size,
        &items,
        do_not_update,
        &mut acc,
        &mut report,
    )
    .await?;
    tx.commit().await.context("failed to commit product import")?;

    attach_log(pool, instance, EntityKind::Products, acc.queue_id, log).await?;
    Ok(report)
}

/// Enqueues orders by increment id.
#[instrument(skip_all, fields(orders = increment_ids.len()))]
pub async fn import_specific_orders(
    pool: &Pool,
    store: &dyn StoreService,
    cfg: &Config,
    instance: &Instance,
    increment_ids: &[String],
) -> Result<IngestReport, IngestError> {
    let paging = cfg.sync.paging(EntityKind::Orders);
    let mut items = Vec::new();
    let mut page = 0;
    for chunk in increment_ids.chunks(paging.page_size.max(1) as usize) {
        page += 1;
        let criteria = SearchCriteria::new().filter_in("increment_id", chunk);
        let result = api::search(store, api::ORDERS_PATH, &criteria)
            .await
            .map_err(|source| IngestError::Store {
                kind: EntityKind::Orders.as_str(),
                page,
                source,
            })?;
        items.extend(result.items);
    }

    let mut log = PassLog::new();
    for id in increment_ids {
        let known = items
            .iter()
            .any(|item| remote_ref(EntityKind::Orders, item).as_deref() == Some(id.as_str()));
        if !known {
            log.push(Some(id), format!("Order {id} was not found in the Store."));
        }
    }

    let mut acc = BatchAccumulator::default();
    let mut report = IngestReport {
        total_count: items.len() as i64,
        ..Default::default()
    };
    let mut tx = pool.begin().await.context("failed to open import transaction")?;
    enqueue_items(
        &mut tx,
        instance.id,
        EntityKind::Orders,
        paging.batch_size,
        &items,
        false,
        &mut acc,
        &mut report,
    )
    .await?;
    tx.commit().await.context("failed to commit order import")?;

    attach_log(pool, instance, EntityKind::Orders, acc.queue_id, log).await?;
    Ok(report)
}

async fn attach_log(
    pool: &Pool,
    instance: &Instance,
    kind: EntityKind,
    queue_id: Option<i64>,
    log: PassLog,
) -> anyhow::Result<()> {
    if log.is_empty() {
        return Ok(());
    }
    let existing = match queue_id {
        Some(id) => db::get_queue(pool, id).await?.log_book_id,
        None => None,
    };
    let book = log
        .persist(pool, instance.id, Direction::Import, kind.as_str(), existing)
        .await?;
    if let Some(id) = queue_id {
        db::set_queue_log_book(pool, id, book).await?;
    }
    Ok(())
}

fn is_configurable(item: &Value) -> bool {
    serde_json::from_value::<RemoteProduct>(item.clone())
        .map(|p| p.is_type("configurable"))
        .unwrap_or(false)
}
