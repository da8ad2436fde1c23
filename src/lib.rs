pub mod bulk;
pub mod config;
pub mod db;
pub mod handlers;
pub mod ingest;
pub mod logbook;
pub mod model;
pub mod queue;
pub mod reconcile;
pub mod store;
