use serde::{Deserialize, Serialize};

/// Lifecycle of a single queue line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LineState {
    Draft,
    Done,
    Failed,
    Cancelled,
}

impl LineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineState::Draft => "draft",
            LineState::Done => "done",
            LineState::Failed => "failed",
            LineState::Cancelled => "cancelled",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(LineState::Draft),
            "done" => Some(LineState::Done),
            "failed" => Some(LineState::Failed),
            "cancelled" => Some(LineState::Cancelled),
            _ => None,
        }
    }
}

/// Per-state line counts of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCounts {
    pub draft: i64,
    pub done: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl LineCounts {
    pub fn total(&self) -> i64 {
        self.draft + self.done + self.failed + self.cancelled
    }

    pub fn add(&mut self, state: LineState, n: i64) {
        match state {
            LineState::Draft => self.draft += n,
            LineState::Done => self.done += n,
            LineState::Failed => self.failed += n,
            LineState::Cancelled => self.cancelled += n,
        }
    }
}

/// Queue state. Never stored; always derived from the line counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Draft,
    PartiallyCompleted,
    Completed,
    Failed,
}

impl QueueState {
    pub fn from_counts(counts: &LineCounts) -> Self {
        let total = counts.total();
        if counts.done + counts.cancelled == total {
            QueueState::Completed
        } else if counts.draft == total {
            QueueState::Draft
        } else if counts.failed == total {
            QueueState::Failed
        } else {
            QueueState::PartiallyCompleted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Draft => "draft",
            QueueState::PartiallyCompleted => "partially_completed",
            QueueState::Completed => "completed",
            QueueState::Failed => "failed",
        }
    }
}

/// Remote collections that are ingested through queues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Orders,
    Customers,
    Products,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Orders => "orders",
            EntityKind::Customers => "customers",
            EntityKind::Products => "products",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "orders" => Some(EntityKind::Orders),
            "customers" => Some(EntityKind::Customers),
            "products" => Some(EntityKind::Products),
            _ => None,
        }
    }

    /// Name prefix for queues of this kind.
    pub fn queue_prefix(&self) -> &'static str {
        match self {
            EntityKind::Orders => "OQ",
            EntityKind::Customers => "CQ",
            EntityKind::Products => "PQ",
        }
    }
}

/// Export status of a product-layer record relative to the Store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    NotExported,
    InProcess,
    InMagento,
    NoNeed,
    NeedToLink,
    LogError,
    UpdateNeeded,
    Deleted,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::NotExported => "not_exported",
            ExportStatus::InProcess => "in_process",
            ExportStatus::InMagento => "in_magento",
            ExportStatus::NoNeed => "no_need",
            ExportStatus::NeedToLink => "need_to_link",
            ExportStatus::LogError => "log_error",
            ExportStatus::UpdateNeeded => "update_needed",
            ExportStatus::Deleted => "deleted",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "not_exported" => Some(ExportStatus::NotExported),
            "in_process" => Some(ExportStatus::InProcess),
            "in_magento" => Some(ExportStatus::InMagento),
            "no_need" => Some(ExportStatus::NoNeed),
            "need_to_link" => Some(ExportStatus::NeedToLink),
            "log_error" => Some(ExportStatus::LogError),
            "update_needed" => Some(ExportStatus::UpdateNeeded),
            "deleted" => Some(ExportStatus::Deleted),
            _ => None,
        }
    }

    /// States that a status check must not overwrite with `update_needed`.
    pub fn is_pending(&self) -> bool {
        matches!(self, ExportStatus::LogError | ExportStatus::InProcess)
    }
}

/// Per-item status reported by the Store's bulk detailed-status endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BulkItemStatus {
    None,
    Complete,
    RetriablyFailed,
    NotRetriablyFailed,
    Open,
    Rejected,
}

impl BulkItemStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => BulkItemStatus::Complete,
            2 => BulkItemStatus::RetriablyFailed,
            3 => BulkItemStatus::NotRetriablyFailed,
            4 => BulkItemStatus::Open,
            5 => BulkItemStatus::Rejected,
            _ => BulkItemStatus::None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            BulkItemStatus::None => 0,
            BulkItemStatus::Complete => 1,
            BulkItemStatus::RetriablyFailed => 2,
            BulkItemStatus::NotRetriablyFailed => 3,
            BulkItemStatus::Open => 4,
            BulkItemStatus::Rejected => 5,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BulkItemStatus::RetriablyFailed
                | BulkItemStatus::NotRetriablyFailed
                | BulkItemStatus::Rejected
        )
    }
}

/// Which half of the two-pass product ingestion the cursor belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductPass {
    Configurable,
    Simple,
}

impl ProductPass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductPass::Configurable => "configurable",
            ProductPass::Simple => "simple",
        }
    }

    pub fn parse_pass(s: &str) -> Option<Self> {
        match s {
            "configurable" => Some(ProductPass::Configurable),
            "simple" => Some(ProductPass::Simple),
            _ => None,
        }
    }
}

/// The addressable Store connection with its per-kind page cursors.
///
/// Loaded before a tick and saved explicitly by the caller; nothing in the
/// crate keeps it in ambient state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub id: i64,
    pub name: String,
    pub order_page: i64,
    pub customer_page: i64,
    pub product_page: i64,
    pub product_pass: ProductPass,
}

impl Instance {
    pub fn page(&self, kind: EntityKind) -> i64 {
        match kind {
            EntityKind::Orders => self.order_page,
            EntityKind::Customers => self.customer_page,
            EntityKind::Products => self.product_page,
        }
    }

    pub fn set_page(&mut self, kind: EntityKind, page: i64) {
        let slot = match kind {
            EntityKind::Orders => &mut self.order_page,
            EntityKind::Customers => &mut self.customer_page,
            EntityKind::Products => &mut self.product_page,
        };
        *slot = page.max(1);
    }
}
