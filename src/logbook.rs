//! Per-pass error journal.
//!
//! Messages are collected in memory while a queue is drained or a product
//! batch is reconciled, and only written out when there is at least one of
//! them. A pass without failures leaves no log book behind.

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::db::{self, Pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Import,
    Export,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Import => "import",
            Direction::Export => "export",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub reference: Option<String>,
    pub queue_line_id: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassLog {
    entries: Vec<LogEntry>,
}

impl PassLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure about an entity (SKU, increment id, ...).
    pub fn push(&mut self, reference: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        warn!(reference = reference.unwrap_or("-"), "{}", message);
        self.entries.push(LogEntry {
            reference: reference.map(str::to_string),
            queue_line_id: None,
            message,
        });
    }

    /// Records a failure tied to a queue line.
    pub fn push_line(&mut self, queue_line_id: i64, reference: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(queue_line_id, reference, "{}", message);
        self.entries.push(LogEntry {
            reference: Some(reference.to_string()),
            queue_line_id: Some(queue_line_id),
            message,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn extend(&mut self, other: PassLog) {
        self.entries.extend(other.entries);
    }

    /// Writes the collected lines.
    ///
    /// With `existing` set the lines are appended to that book; an existing
    /// book that ends up without lines is deleted. Returns the id of the book
    /// that now holds the lines, or `None` when nothing was kept.
    #[instrument(skip_all)]
    pub async fn persist(
        self,
        pool: &Pool,
        instance_id: i64,
        direction: Direction,
        entity: &str,
        existing: Option<i64>,
    ) -> Result<Option<i64>> {
        let existing = match existing {
            Some(id) if db::log_book_exists(pool, id).await? => Some(id),
            _ => None,
        };

        if self.entries.is_empty() {
            if let Some(id) = existing {
                if db::count_log_lines(pool, id).await? == 0 {
                    db::delete_log_book(pool, id).await?;
                    debug!(log_book_id = id, "discarded empty log book");
                    return Ok(None);
                }
            }
            return Ok(existing);
        }

        let book_id = match existing {
            Some(id) => id,
            None => db::create_log_book(pool, instance_id, direction.as_str(), entity).await?,
        };
        for entry in &self.entries {
            db::insert_log_line(
                pool,
                book_id,
                entry.reference.as_deref(),
                entry.queue_line_id,
                &entry.message,
            )
            .await?;
        }
        debug!(log_book_id = book_id, lines = self.entries.len(), "log book written");
        Ok(Some(book_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn empty_pass_creates_nothing() {
        let pool = setup_pool().await;
        let instance = db::get_or_create_instance(&pool, "shop").await.unwrap();
        let id = PassLog::new()
            .persist(&pool, instance.id, Direction::Import, "orders", None)
            .await
            .unwrap();
        assert!(id.is_none());
        let books: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM log_books")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(books, 0);
    }

    #[tokio::test]
    async fn lines_are_appended_to_existing_book() {
        let pool = setup_pool().await;
        let instance = db::get_or_create_instance(&pool, "shop").await.unwrap();

        let mut first = PassLog::new();
        first.push(Some("SKU-1"), "first failure");
        let book = first
            .persist(&pool, instance.id, Direction::Export, "products", None)
            .await
            .unwrap()
            .unwrap();

        let mut second = PassLog::new();
        second.push_line(42, "100000001", "second failure");
        let again = second
            .persist(&pool, instance.id, Direction::Export, "products", Some(book))
            .await
            .unwrap();
        assert_eq!(again, Some(book));

        let lines = db::log_lines(&pool, book).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].queue_line_id, Some(42));
        assert_eq!(lines[0].reference.as_deref(), Some("SKU-1"));
    }

    #[tokio::test]
    async fn existing_empty_book_is_discarded() {
        let pool = setup_pool().await;
        let instance = db::get_or_create_instance(&pool, "shop").await.unwrap();
        let book = db::create_log_book(&pool, instance.id, "import", "orders")
            .await
            .unwrap();
        let kept = PassLog::new()
            .persist(&pool, instance.id, Direction::Import, "orders", Some(book))
            .await
            .unwrap();
        assert!(kept.is_none());
        assert!(!db::log_book_exists(&pool, book).await.unwrap());
    }
}
