//! Configuration loader and validator for the Store/Ledger synchronizer.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::EntityKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub store: Store,
    pub instance: Instance,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Interval the external scheduler invokes `process`; the tick budget is derived from it.
    pub cron_interval_seconds: u64,
    #[serde(default = "default_max_process_count")]
    pub max_queue_process_count: i64,
}

/// Store REST endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Store {
    pub base_url: String,
    pub access_token: String,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

/// The Store instance this Ledger is connected to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub name: String,
    /// Must be `website` for per-website price export.
    #[serde(default = "default_price_scope")]
    pub catalog_price_scope: String,
    #[serde(default)]
    pub import_order_statuses: Vec<String>,
    pub websites: Vec<Website>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Website {
    pub website_id: i64,
    pub name: String,
    pub base_currency: String,
    /// Currency of the pricelist used for this website; absent means no pricelist.
    #[serde(default)]
    pub pricelist_currency: Option<String>,
    #[serde(default)]
    pub storeviews: Vec<Storeview>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Storeview {
    pub code: String,
    pub storeview_id: i64,
    pub lang: String,
}

/// Page and queue sizes per entity kind plus export batching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    #[serde(default = "default_orders")]
    pub orders: Paging,
    #[serde(default = "default_customers")]
    pub customers: Paging,
    #[serde(default = "default_products")]
    pub products: Paging,
    #[serde(default = "default_export_batch")]
    pub export_batch_size: usize,
    #[serde(default = "default_direct_limit")]
    pub direct_export_limit: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Paging {
    pub page_size: u32,
    pub batch_size: u32,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    60
}

fn default_max_process_count() -> i64 {
    3
}

fn default_price_scope() -> String {
    "website".into()
}

fn default_orders() -> Paging {
    Paging { page_size: 50, batch_size: 50 }
}

fn default_customers() -> Paging {
    Paging { page_size: 200, batch_size: 200 }
}

fn default_products() -> Paging {
    Paging { page_size: 50, batch_size: 50 }
}

fn default_export_batch() -> usize {
    250
}

fn default_direct_limit() -> usize {
    10
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            orders: default_orders(),
            customers: default_customers(),
            products: default_products(),
            export_batch_size: default_export_batch(),
            direct_export_limit: default_direct_limit(),
        }
    }
}

impl SyncSettings {
    pub fn paging(&self, kind: EntityKind) -> Paging {
        match kind {
            EntityKind::Orders => self.orders,
            EntityKind::Customers => self.customers,
            EntityKind::Products => self.products,
        }
    }
}

impl Instance {
    pub fn website(&self, website_id: i64) -> Option<&Website> {
        self.websites.iter().find(|w| w.website_id == website_id)
    }

    pub fn website_ids(&self) -> Vec<i64> {
        self.websites.iter().map(|w| w.website_id).collect()
    }

    pub fn storeviews(&self) -> impl Iterator<Item = &Storeview> {
        self.websites.iter().flat_map(|w| w.storeviews.iter())
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL under the data directory, unless `DATABASE_URL` overrides it.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/store-sync.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    // The tick budget is the interval minus one minute.
    if cfg.app.cron_interval_seconds <= 60 {
        return Err(ConfigError::Invalid("app.cron_interval_seconds must be > 60"));
    }
    if cfg.app.max_queue_process_count < 1 {
        return Err(ConfigError::Invalid("app.max_queue_process_count must be >= 1"));
    }

    if cfg.store.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("store.base_url must be non-empty"));
    }
    if !cfg.store.base_url.starts_with("http://") && !cfg.store.base_url.starts_with("https://") {
        return Err(ConfigError::Invalid("store.base_url must be an http(s) URL"));
    }
    if cfg.store.access_token.trim().is_empty() {
        return Err(ConfigError::Invalid("store.access_token must be non-empty"));
    }
    if cfg.store.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("store.timeout_seconds must be > 0"));
    }

    if cfg.instance.name.trim().is_empty() {
        return Err(ConfigError::Invalid("instance.name must be non-empty"));
    }
    if cfg.instance.websites.is_empty() {
        return Err(ConfigError::Invalid("instance.websites must list at least one website"));
    }
    for website in &cfg.instance.websites {
        if website.base_currency.trim().is_empty() {
            return Err(ConfigError::Invalid("instance.websites[].base_currency must be non-empty"));
        }
        if website.storeviews.iter().any(|s| s.code.trim().is_empty()) {
            return Err(ConfigError::Invalid("instance.websites[].storeviews[].code must be non-empty"));
        }
    }

    for paging in [&cfg.sync.orders, &cfg.sync.customers, &cfg.sync.products] {
        if paging.page_size == 0 {
            return Err(ConfigError::Invalid("sync.*.page_size must be > 0"));
        }
        if paging.batch_size == 0 {
            return Err(ConfigError::Invalid("sync.*.batch_size must be > 0"));
        }
    }
    if cfg.sync.export_batch_size == 0 {
        return Err(ConfigError::Invalid("sync.export_batch_size must be > 0"));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  cron_interval_seconds: 600
  max_queue_process_count: 3

store:
  base_url: "https://shop.example.com"
  access_token: "YOUR_INTEGRATION_ACCESS_TOKEN"
  verify_ssl: true
  timeout_seconds: 60

instance:
  name: "main-shop"
  catalog_price_scope: "website"
  import_order_statuses:
    - "pending"
    - "processing"
  websites:
    - website_id: 1
      name: "Main Website"
      base_currency: "EUR"
      pricelist_currency: "EUR"
      storeviews:
        - code: "default"
          storeview_id: 1
          lang: "en_US"
        - code: "de"
          storeview_id: 2
          lang: "de_DE"

sync:
  orders:
    page_size: 50
    batch_size: 50
  customers:
    page_size: 200
    batch_size: 200
  products:
    page_size: 50
    batch_size: 50
  export_batch_size: 250
  direct_export_limit: 10
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sync.paging(EntityKind::Customers).batch_size, 200);
        assert_eq!(cfg.instance.storeviews().count(), 2);
    }

    #[test]
    fn sync_section_defaults() {
        let yaml = example().split("\nsync:").next().unwrap().to_string();
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.sync, SyncSettings::default());
        assert_eq!(cfg.sync.orders.batch_size, 50);
        assert_eq!(cfg.sync.export_batch_size, 250);
    }

    #[test]
    fn invalid_access_token() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.store.access_token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("store.access_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_cron_interval() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.cron_interval_seconds = 60;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("cron_interval_seconds")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_websites_and_paging() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.instance.websites.clear();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.products.page_size = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("page_size")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.store.base_url = "shop.example.com".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(p.as_path())).unwrap();
        assert_eq!(cfg.instance.import_order_statuses, vec!["pending", "processing"]);
        assert_eq!(cfg.instance.website(1).map(|w| w.name.as_str()), Some("Main Website"));
    }
}
