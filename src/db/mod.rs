//! Database module: entity models and SQL repositories.
//!
//! This module is split into three submodules:
//! - `model`: typed rows and view models returned by repositories.
//! - `repo`: pool setup plus queues, log books, instances and bulk jobs.
//! - `catalog`: the product layer and the Ledger records built from queue lines.
//!
//! External modules should import from `store_sync::db`; the queue/log/bulk
//! repository API is re-exported here for convenience.

pub mod catalog;
pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewLine, OwnerKind, QueueLineRow, QueueRow, QueueSummary};
