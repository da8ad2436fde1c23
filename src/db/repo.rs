use super::model::{
    BulkJobDetail, BulkJobRow, LogLineRow, NewLine, OwnerKind, QueueLineRow, QueueRow,
    QueueSummary,
};
use crate::model::{
    BulkItemStatus, EntityKind, Instance, LineCounts, LineState, ProductPass, QueueState,
};
use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Transaction};
use sqlx::{Sqlite, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{q}&mode=rwc"),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", expanded_path, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Instances

const INSTANCE_COLUMNS: &str =
    "id, name, order_page, customer_page, product_page, product_pass";

fn instance_from_row(row: &SqliteRow) -> Result<Instance> {
    let pass: String = row.get("product_pass");
    Ok(Instance {
        id: row.get("id"),
        name: row.get("name"),
        order_page: row.get("order_page"),
        customer_page: row.get("customer_page"),
        product_page: row.get("product_page"),
        product_pass: ProductPass::parse_pass(&pass)
            .ok_or_else(|| anyhow!("unknown product pass {pass}"))?,
    })
}

#[instrument(skip_all)]
pub async fn get_or_create_instance(pool: &Pool, name: &str) -> Result<Instance> {
    sqlx::query("INSERT INTO instances (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;
    let row = sqlx::query(&format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE name = ?"))
        .bind(name)
        .fetch_one(pool)
        .await
        .context("failed to load instance")?;
    instance_from_row(&row)
}

pub async fn load_instance(pool: &Pool, id: i64) -> Result<Instance> {
    let row = sqlx::query(&format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Err(anyhow!("instance {} not found", id));
    };
    instance_from_row(&row)
}

/// Persist every page cursor of the instance.
#[instrument(skip_all)]
pub async fn save_instance(pool: &Pool, instance: &Instance) -> Result<()> {
    sqlx::query(
        "UPDATE instances SET order_page = ?, customer_page = ?, product_page = ?, product_pass = ? \
         WHERE id = ?",
    )
    .bind(instance.order_page)
    .bind(instance.customer_page)
    .bind(instance.product_page)
    .bind(instance.product_pass.as_str())
    .bind(instance.id)
    .execute(pool)
    .await
    .context("failed to persist instance cursors")?;
    Ok(())
}

pub async fn save_page_cursor_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance: &Instance,
    kind: EntityKind,
) -> Result<()> {
    let column = match kind {
        EntityKind::Orders => "order_page",
        EntityKind::Customers => "customer_page",
        EntityKind::Products => "product_page",
    };
    sqlx::query(&format!(
        "UPDATE instances SET {column} = ?, product_pass = ? WHERE id = ?"
    ))
    .bind(instance.page(kind))
    .bind(instance.product_pass.as_str())
    .bind(instance.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Queues and lines

fn queue_from_row(row: &SqliteRow) -> Result<QueueRow> {
    let kind: String = row.get("kind");
    Ok(QueueRow {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        kind: EntityKind::parse_kind(&kind).ok_or_else(|| anyhow!("unknown queue kind {kind}"))?,
        name: row.get("name"),
        process_count: row.get("process_count"),
        action_required: row.get("action_required"),
        log_book_id: row.try_get::<Option<i64>, _>("log_book_id").ok().flatten(),
    })
}

fn line_from_row(row: &SqliteRow) -> Result<QueueLineRow> {
    let kind: String = row.get("kind");
    let state: String = row.get("state");
    Ok(QueueLineRow {
        id: row.get("id"),
        queue_id: row.get("queue_id"),
        instance_id: row.get("instance_id"),
        kind: EntityKind::parse_kind(&kind).ok_or_else(|| anyhow!("unknown line kind {kind}"))?,
        remote_ref: row.get("remote_ref"),
        payload: row.get("payload"),
        state: LineState::parse_state(&state)
            .ok_or_else(|| anyhow!("unknown line state {state}"))?,
        do_not_update: row.get("do_not_update"),
        entity_ref: row.try_get::<Option<String>, _>("entity_ref").ok().flatten(),
        processed_at: row
            .try_get::<Option<String>, _>("processed_at")
            .ok()
            .flatten(),
    })
}

const QUEUE_COLUMNS: &str =
    "id, instance_id, kind, name, process_count, action_required, log_book_id";
const LINE_COLUMNS: &str = "id, queue_id, instance_id, kind, remote_ref, payload, state, \
                            do_not_update, entity_ref, processed_at";

/// An untouched draft queue of `kind` that still has room, with its current size.
pub async fn find_open_queue_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: i64,
    kind: EntityKind,
    batch_size: u32,
) -> Result<Option<(i64, u32)>> {
    let row = sqlx::query(
        "SELECT q.id AS id, COUNT(l.id) AS total, \
                SUM(CASE WHEN l.state = 'draft' THEN 1 ELSE 0 END) AS drafts \
         FROM queues q LEFT JOIN queue_lines l ON l.queue_id = q.id \
         WHERE q.instance_id = ? AND q.kind = ? AND q.action_required = 0 AND q.process_count = 0 \
         GROUP BY q.id \
         HAVING total > 0 AND total = drafts AND total < ? \
         ORDER BY q.id ASC LIMIT 1",
    )
    .bind(instance_id)
    .bind(kind.as_str())
    .bind(batch_size as i64)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|r| (r.get::<i64, _>("id"), r.get::<i64, _>("total") as u32)))
}

pub async fn create_queue_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: i64,
    kind: EntityKind,
) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO queues (instance_id, kind, name) VALUES (?, ?, '') RETURNING id",
    )
    .bind(instance_id)
    .bind(kind.as_str())
    .fetch_one(&mut **tx)
    .await?
    .get("id");
    sqlx::query("UPDATE queues SET name = ? WHERE id = ?")
        .bind(format!("{}{:05}", kind.queue_prefix(), id))
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(id)
}

pub async fn insert_line_tx(
    tx: &mut Transaction<'_, Sqlite>,
    queue_id: i64,
    instance_id: i64,
    kind: EntityKind,
    line: &NewLine,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO queue_lines (queue_id, instance_id, kind, remote_ref, payload, do_not_update) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(queue_id)
    .bind(instance_id)
    .bind(kind.as_str())
    .bind(&line.remote_ref)
    .bind(&line.payload)
    .bind(line.do_not_update)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

/// Whether a draft line for the same remote entity is already waiting.
pub async fn has_draft_line_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: i64,
    kind: EntityKind,
    remote_ref: &str,
) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM queue_lines WHERE instance_id = ? AND kind = ? AND remote_ref = ? \
         AND state = 'draft' LIMIT 1",
    )
    .bind(instance_id)
    .bind(kind.as_str())
    .bind(remote_ref)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(found.is_some())
}

pub async fn get_queue(pool: &Pool, queue_id: i64) -> Result<QueueRow> {
    let row = sqlx::query(&format!("SELECT {QUEUE_COLUMNS} FROM queues WHERE id = ?"))
        .bind(queue_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Err(anyhow!("queue {} not found", queue_id));
    };
    queue_from_row(&row)
}

pub async fn queue_counts(pool: &Pool, queue_id: i64) -> Result<LineCounts> {
    let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM queue_lines WHERE queue_id = ? GROUP BY state")
        .bind(queue_id)
        .fetch_all(pool)
        .await?;
    let mut counts = LineCounts::default();
    for row in rows {
        let state: String = row.get("state");
        let n: i64 = row.get("n");
        let state = LineState::parse_state(&state)
            .ok_or_else(|| anyhow!("unknown line state {state}"))?;
        counts.add(state, n);
    }
    Ok(counts)
}

pub async fn queue_state(pool: &Pool, queue_id: i64) -> Result<QueueState> {
    Ok(QueueState::from_counts(&queue_counts(pool, queue_id).await?))
}

#[instrument(skip_all)]
pub async fn list_queues(
    pool: &Pool,
    instance_id: i64,
    kind: Option<EntityKind>,
) -> Result<Vec<QueueSummary>> {
    let rows = sqlx::query(&format!(
        "SELECT {QUEUE_COLUMNS} FROM queues WHERE instance_id = ? AND (? IS NULL OR kind = ?) ORDER BY id"
    ))
    .bind(instance_id)
    .bind(kind.map(|k| k.as_str()))
    .bind(kind.map(|k| k.as_str()))
    .fetch_all(pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let queue = queue_from_row(&row)?;
        let counts = queue_counts(pool, queue.id).await?;
        out.push(QueueSummary {
            state: QueueState::from_counts(&counts),
            queue,
            counts,
        });
    }
    Ok(out)
}

/// Queues of `kind` with draft lines and no pending operator action, oldest line first.
#[instrument(skip_all)]
pub async fn queues_to_process(
    pool: &Pool,
    instance_id: i64,
    kind: EntityKind,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT q.id FROM queue_lines l JOIN queues q ON l.queue_id = q.id \
         WHERE l.state = 'draft' AND q.action_required = 0 AND q.instance_id = ? AND q.kind = ? \
         GROUP BY q.id ORDER BY MIN(l.created_at) ASC, MIN(l.id) ASC",
    )
    .bind(instance_id)
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Increments and commits the drain counter, returning the new value.
#[instrument(skip_all)]
pub async fn bump_process_count(pool: &Pool, queue_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "UPDATE queues SET process_count = process_count + 1 WHERE id = ? RETURNING process_count",
    )
    .bind(queue_id)
    .fetch_one(pool)
    .await
    .context("failed to bump queue process count")?;
    Ok(count)
}

pub async fn flag_action_required(pool: &Pool, queue_id: i64) -> Result<()> {
    sqlx::query("UPDATE queues SET action_required = 1 WHERE id = ?")
        .bind(queue_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Operator reset: clears the flag and the drain counter.
#[instrument(skip_all)]
pub async fn clear_action_required(pool: &Pool, queue_id: i64) -> Result<()> {
    let res = sqlx::query("UPDATE queues SET action_required = 0, process_count = 0 WHERE id = ?")
        .bind(queue_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("queue {} not found", queue_id));
    }
    Ok(())
}

pub async fn set_queue_log_book(pool: &Pool, queue_id: i64, log_book_id: Option<i64>) -> Result<()> {
    sqlx::query("UPDATE queues SET log_book_id = ? WHERE id = ?")
        .bind(log_book_id)
        .bind(queue_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn draft_lines(pool: &Pool, queue_id: i64) -> Result<Vec<QueueLineRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {LINE_COLUMNS} FROM queue_lines WHERE queue_id = ? AND state = 'draft' \
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(queue_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(line_from_row).collect()
}

pub async fn lines_of_queue(pool: &Pool, queue_id: i64) -> Result<Vec<QueueLineRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {LINE_COLUMNS} FROM queue_lines WHERE queue_id = ? ORDER BY id ASC"
    ))
    .bind(queue_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(line_from_row).collect()
}

/// Moves a draft line to a terminal state. A line that already left `draft`
/// is left untouched.
#[instrument(skip_all)]
pub async fn finish_line(
    pool: &Pool,
    line_id: i64,
    state: LineState,
    entity_ref: Option<&str>,
) -> Result<()> {
    if state == LineState::Draft {
        return Err(anyhow!("line {} cannot be finished as draft", line_id));
    }
    sqlx::query(
        "UPDATE queue_lines SET state = ?, entity_ref = COALESCE(?, entity_ref), \
         processed_at = CURRENT_TIMESTAMP WHERE id = ? AND state = 'draft'",
    )
    .bind(state.as_str())
    .bind(entity_ref)
    .bind(line_id)
    .execute(pool)
    .await
    .context("failed to persist line state")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn cancel_draft_lines(pool: &Pool, queue_id: i64) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE queue_lines SET state = 'cancelled', processed_at = CURRENT_TIMESTAMP \
         WHERE queue_id = ? AND state = 'draft'",
    )
    .bind(queue_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

/// Deletes done/cancelled lines, then every queue left without lines.
/// Returns `(lines_deleted, queues_deleted)`.
#[instrument(skip_all)]
pub async fn purge_processed(pool: &Pool, instance_id: i64) -> Result<(u64, u64)> {
    let mut tx = pool.begin().await?;
    let lines = sqlx::query(
        "DELETE FROM queue_lines WHERE instance_id = ? AND state IN ('done', 'cancelled')",
    )
    .bind(instance_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    let queues = sqlx::query(
        "DELETE FROM queues WHERE instance_id = ? \
         AND NOT EXISTS (SELECT 1 FROM queue_lines l WHERE l.queue_id = queues.id)",
    )
    .bind(instance_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;
    Ok((lines, queues))
}

// ---------------------------------------------------------------------------
// Log books

#[instrument(skip_all)]
pub async fn create_log_book(
    pool: &Pool,
    instance_id: i64,
    direction: &str,
    entity: &str,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO log_books (instance_id, direction, entity) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(instance_id)
    .bind(direction)
    .bind(entity)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

pub async fn log_book_exists(pool: &Pool, log_book_id: i64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM log_books WHERE id = ?")
        .bind(log_book_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

pub async fn insert_log_line(
    pool: &Pool,
    log_book_id: i64,
    reference: Option<&str>,
    queue_line_id: Option<i64>,
    message: &str,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO log_lines (log_book_id, reference, queue_line_id, message) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(log_book_id)
    .bind(reference)
    .bind(queue_line_id)
    .bind(message)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

pub async fn count_log_lines(pool: &Pool, log_book_id: i64) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM log_lines WHERE log_book_id = ?")
        .bind(log_book_id)
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub async fn log_lines(pool: &Pool, log_book_id: i64) -> Result<Vec<LogLineRow>> {
    let rows = sqlx::query(
        "SELECT id, reference, queue_line_id, message FROM log_lines WHERE log_book_id = ? ORDER BY id",
    )
    .bind(log_book_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| LogLineRow {
            id: row.get("id"),
            reference: row.try_get::<Option<String>, _>("reference").ok().flatten(),
            queue_line_id: row.try_get::<Option<i64>, _>("queue_line_id").ok().flatten(),
            message: row.get("message"),
        })
        .collect())
}

pub async fn delete_log_book(pool: &Pool, log_book_id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE queues SET log_book_id = NULL WHERE log_book_id = ?")
        .bind(log_book_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM log_lines WHERE log_book_id = ?")
        .bind(log_book_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM log_books WHERE id = ?")
        .bind(log_book_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Bulk jobs

fn bulk_job_from_row(row: &SqliteRow) -> BulkJobRow {
    BulkJobRow {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        remote_uuid: row.get("remote_uuid"),
        topic: row.get("topic"),
        submission_errors: row.get("submission_errors"),
    }
}

/// Persists a submitted job and links it to every affected entity.
#[instrument(skip_all)]
pub async fn insert_bulk_job(
    pool: &Pool,
    instance_id: i64,
    remote_uuid: &str,
    topic: &str,
    submission_errors: bool,
    entities: &[(OwnerKind, i64)],
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let job_id: i64 = sqlx::query(
        "INSERT INTO bulk_jobs (instance_id, remote_uuid, topic, submission_errors) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(instance_id)
    .bind(remote_uuid)
    .bind(topic)
    .bind(submission_errors)
    .fetch_one(&mut *tx)
    .await?
    .get("id");
    for (kind, entity_id) in entities {
        sqlx::query(
            "INSERT OR IGNORE INTO bulk_job_entities (job_id, entity_kind, entity_id) VALUES (?, ?, ?)",
        )
        .bind(job_id)
        .bind(kind.as_str())
        .bind(entity_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(job_id)
}

pub async fn bulk_job_by_uuid(pool: &Pool, remote_uuid: &str) -> Result<Option<BulkJobRow>> {
    let row = sqlx::query(
        "SELECT id, instance_id, remote_uuid, topic, submission_errors FROM bulk_jobs WHERE remote_uuid = ?",
    )
    .bind(remote_uuid)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(bulk_job_from_row))
}

pub async fn list_bulk_jobs(pool: &Pool, instance_id: i64) -> Result<Vec<BulkJobRow>> {
    let rows = sqlx::query(
        "SELECT id, instance_id, remote_uuid, topic, submission_errors FROM bulk_jobs \
         WHERE instance_id = ? ORDER BY id",
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(bulk_job_from_row).collect())
}

pub async fn latest_bulk_job(pool: &Pool, instance_id: i64) -> Result<Option<BulkJobRow>> {
    let row = sqlx::query(
        "SELECT id, instance_id, remote_uuid, topic, submission_errors FROM bulk_jobs \
         WHERE instance_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(instance_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(bulk_job_from_row))
}

pub async fn bulk_job_entities(pool: &Pool, job_id: i64) -> Result<Vec<(OwnerKind, i64)>> {
    let rows = sqlx::query(
        "SELECT entity_kind, entity_id FROM bulk_job_entities WHERE job_id = ? ORDER BY entity_kind, entity_id",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let kind: String = row.get("entity_kind");
            let kind = OwnerKind::parse_kind(&kind)
                .ok_or_else(|| anyhow!("unknown bulk entity kind {kind}"))?;
            Ok((kind, row.get::<i64, _>("entity_id")))
        })
        .collect()
}

pub async fn bulk_job_details(pool: &Pool, job_id: i64) -> Result<Vec<BulkJobDetail>> {
    let rows = sqlx::query(
        "SELECT item_ref, sku, status, message FROM bulk_job_details WHERE job_id = ? ORDER BY id",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| BulkJobDetail {
            item_ref: row.get("item_ref"),
            sku: row.try_get::<Option<String>, _>("sku").ok().flatten(),
            status: BulkItemStatus::from_code(row.get("status")),
            message: row.try_get::<Option<String>, _>("message").ok().flatten(),
        })
        .collect())
}

/// Full replace of a job's per-item details.
#[instrument(skip_all)]
pub async fn replace_bulk_job_details(
    pool: &Pool,
    job_id: i64,
    details: &[BulkJobDetail],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM bulk_job_details WHERE job_id = ?")
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
    for detail in details {
        sqlx::query(
            "INSERT INTO bulk_job_details (job_id, item_ref, sku, status, message) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(detail.item_ref)
        .bind(&detail.sku)
        .bind(detail.status.code())
        .bind(&detail.message)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn unlink_bulk_entity(pool: &Pool, kind: OwnerKind, entity_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM bulk_job_entities WHERE entity_kind = ? AND entity_id = ?")
        .bind(kind.as_str())
        .bind(entity_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Accepted jobs linked to the entity that still have work for `sku`: either
/// nothing was polled yet or an item for `sku` is open.
pub async fn pending_bulk_jobs(
    pool: &Pool,
    kind: OwnerKind,
    entity_id: i64,
    sku: &str,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bulk_job_entities e JOIN bulk_jobs j ON j.id = e.job_id \
         WHERE e.entity_kind = ? AND e.entity_id = ? AND j.submission_errors = 0 AND ( \
           NOT EXISTS (SELECT 1 FROM bulk_job_details d WHERE d.job_id = j.id) \
           OR EXISTS (SELECT 1 FROM bulk_job_details d \
                      WHERE d.job_id = j.id AND d.sku = ? AND d.status = ?))",
    )
    .bind(kind.as_str())
    .bind(entity_id)
    .bind(sku)
    .bind(BulkItemStatus::Open.code())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Removes jobs no longer linked to any entity, with their details.
#[instrument(skip_all)]
pub async fn delete_orphan_bulk_jobs(pool: &Pool) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM bulk_job_details WHERE job_id IN (SELECT j.id FROM bulk_jobs j \
         WHERE NOT EXISTS (SELECT 1 FROM bulk_job_entities e WHERE e.job_id = j.id))",
    )
    .execute(&mut *tx)
    .await?;
    let removed = sqlx::query(
        "DELETE FROM bulk_jobs WHERE NOT EXISTS \
         (SELECT 1 FROM bulk_job_entities e WHERE e.job_id = bulk_jobs.id)",
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;
    Ok(removed)
}
