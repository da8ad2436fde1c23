#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use store_sync::config::{self, Config};
use store_sync::db::{self, Pool};
use store_sync::model::Instance;
use store_sync::store::{StoreError, StoreRequest, StoreService};
use tokio::sync::Mutex;

pub async fn setup_pool() -> Pool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn example_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

pub async fn setup() -> (Pool, Config, Instance) {
    let pool = setup_pool().await;
    let cfg = example_config();
    let instance = db::get_or_create_instance(&pool, &cfg.instance.name).await.unwrap();
    (pool, cfg, instance)
}

type Route = (Method, String);

/// Store fake answering from scripted responses keyed by method and path.
///
/// Queued responses are consumed first; afterwards the route's fixed response
/// (if any) is returned. Unscripted routes answer 404.
#[derive(Clone, Default)]
pub struct RecordingStore {
    queued: Arc<Mutex<HashMap<Route, VecDeque<Result<Value, StoreError>>>>>,
    fixed: Arc<Mutex<HashMap<Route, Value>>>,
    calls: Arc<Mutex<Vec<StoreRequest>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn respond(&self, method: Method, path: &str, value: Value) {
        self.fixed.lock().await.insert((method, path.to_string()), value);
    }

    pub async fn push(&self, method: Method, path: &str, response: Result<Value, StoreError>) {
        self.queued
            .lock()
            .await
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
    }

    pub async fn calls(&self) -> Vec<StoreRequest> {
        self.calls.lock().await.clone()
    }

    pub async fn mutations(&self) -> Vec<StoreRequest> {
        self.calls().await.into_iter().filter(|c| c.is_mutation()).collect()
    }

    pub async fn calls_to(&self, method: Method, path: &str) -> Vec<StoreRequest> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| c.method == method && c.path == path)
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }
}

#[async_trait]
impl StoreService for RecordingStore {
    async fn send(&self, request: StoreRequest) -> Result<Value, StoreError> {
        self.calls.lock().await.push(request.clone());
        let route = (request.method.clone(), request.path.clone());
        if let Some(next) = self
            .queued
            .lock()
            .await
            .get_mut(&route)
            .and_then(VecDeque::pop_front)
        {
            return next;
        }
        match self.fixed.lock().await.get(&route) {
            Some(value) => Ok(value.clone()),
            None => Err(StoreError::Status {
                status: 404,
                message: format!("no route for {} {}", request.method, request.path),
            }),
        }
    }
}

pub fn page(items: Vec<Value>, total_count: usize) -> Value {
    json!({ "items": items, "total_count": total_count })
}

/// Attribute set "Default" (id 4) with a global, user-defined Color axis.
pub async fn script_default_attribute_set(store: &RecordingStore) {
    store
        .respond(
            Method::GET,
            "/all/V1/eav/attribute-sets/list",
            page(vec![json!({ "attribute_set_id": 4, "attribute_set_name": "Default" })], 1),
        )
        .await;
    store
        .respond(
            Method::GET,
            "/all/V1/products/attribute-sets/4/attributes",
            json!([{
                "attribute_id": 93,
                "attribute_code": "color",
                "default_frontend_label": "Color",
                "scope": "global",
                "is_user_defined": true,
                "options": [
                    { "label": " ", "value": "" },
                    { "label": "Red", "value": "5" },
                    { "label": "Blue", "value": "6" }
                ]
            }]),
        )
        .await;
}
