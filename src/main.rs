use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use store_sync::bulk;
use store_sync::config::{self, Config};
use store_sync::db::catalog::{NewConfigurable, NewSimple};
use store_sync::db::model::AttributeValue;
use store_sync::db::{self, OwnerKind, Pool};
use store_sync::handlers::{CustomerHandler, OrderHandler, ProductHandler};
use store_sync::ingest::{self, TimeWindow};
use store_sync::model::{EntityKind, Instance};
use store_sync::queue::{self, LineHandler, TickBudget};
use store_sync::reconcile::{self, ExportMode};
use store_sync::store::model::STORE_DATETIME_FORMAT;
use store_sync::store::{RestStoreClient, StoreService};

#[derive(Debug, Parser)]
#[command(author, version, about = "Synchronise a Magento store with the local ledger")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Orders,
    Customers,
    Products,
}

impl From<Kind> for EntityKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Orders => EntityKind::Orders,
            Kind::Customers => EntityKind::Customers,
            Kind::Products => EntityKind::Products,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enqueue remote records updated inside a time window
    Import {
        #[arg(value_enum)]
        kind: Kind,
        /// Lower bound of `updated_at` (`YYYY-MM-DD HH:MM:SS`)
        #[arg(long)]
        since: Option<String>,
        /// Leave products that already exist locally untouched
        #[arg(long)]
        do_not_update: bool,
    },
    /// Enqueue specific products by SKU
    ImportSkus {
        #[arg(required = true)]
        skus: Vec<String>,
        #[arg(long)]
        do_not_update: bool,
    },
    /// Enqueue specific orders by increment id
    ImportOrders {
        #[arg(required = true)]
        increment_ids: Vec<String>,
    },
    /// Drain queued lines within the tick budget
    Process {
        #[arg(value_enum)]
        kind: Kind,
        /// Ignore the cron interval and drain everything
        #[arg(long)]
        no_budget: bool,
    },
    /// Register local product templates from a YAML file
    Register { file: PathBuf },
    /// Export registered products to the Store
    ExportProducts {
        /// One REST call per change instead of bulk jobs
        #[arg(long)]
        direct: bool,
        /// Restrict to these configurable product ids
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,
    },
    /// Delete a product from the Store
    DeleteProduct {
        id: i64,
        /// The id refers to a simple product
        #[arg(long)]
        simple: bool,
    },
    /// Poll the detailed status of submitted bulk jobs
    PollBulk,
    /// Delete processed lines, empty queues and orphan bulk jobs
    Purge,
    /// Clear the action-required flag of a queue
    ResetQueue { queue_id: i64 },
    /// Cancel the remaining draft lines of a queue
    CancelQueue { queue_id: i64 },
    /// List queues with their derived state
    Queues {
        #[arg(value_enum)]
        kind: Option<Kind>,
    },
    /// Print an example configuration
    ExampleConfig,
}

/// Template file accepted by `register`.
#[derive(Debug, Deserialize)]
struct TemplateFile {
    templates: Vec<TemplateEntry>,
}

#[derive(Debug, Deserialize)]
struct TemplateEntry {
    template_ref: String,
    base_sku: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    attribute_set: Option<String>,
    #[serde(default)]
    assign_attributes: Vec<String>,
    #[serde(default)]
    category_ids: Vec<String>,
    #[serde(default)]
    do_not_create: bool,
    #[serde(default)]
    variants: Vec<VariantEntry>,
}

#[derive(Debug, Deserialize)]
struct VariantEntry {
    sku: String,
    name: String,
    #[serde(default)]
    attributes: Vec<AttributeValue>,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    weight: f64,
    #[serde(default)]
    qty: f64,
}

fn parse_since(raw: Option<&str>) -> Result<TimeWindow> {
    let mut window = TimeWindow::until(Utc::now().naive_utc());
    if let Some(raw) = raw {
        let from = NaiveDateTime::parse_from_str(raw, STORE_DATETIME_FORMAT)
            .with_context(|| format!("invalid --since value {raw:?}"))?;
        window.from = Some(from);
    }
    Ok(window)
}

async fn register(pool: &Pool, instance: &Instance, file: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("read template file {}", file.display()))?;
    let parsed: TemplateFile = serde_yaml::from_str(&content).context("parse template file")?;
    for entry in parsed.templates {
        let template = NewConfigurable {
            template_ref: entry.template_ref,
            name: entry.name,
            description: entry.description,
            attribute_set: entry.attribute_set,
            assign_attributes: entry.assign_attributes,
            category_ids: entry.category_ids,
            do_not_create: entry.do_not_create,
        };
        let variants: Vec<NewSimple> = entry
            .variants
            .into_iter()
            .map(|v| NewSimple {
                sku: v.sku,
                name: v.name,
                attributes: v.attributes,
                price: v.price,
                weight: v.weight,
                qty: v.qty,
            })
            .collect();
        let id = reconcile::register_template(pool, instance.id, &entry.base_sku, &template, &variants)
            .await?;
        info!(id, template = %template.template_ref, variants = variants.len(), "template registered");
    }
    Ok(())
}

async fn print_queues(pool: &Pool, instance: &Instance, kind: Option<EntityKind>) -> Result<()> {
    for summary in db::list_queues(pool, instance.id, kind).await? {
        let q = &summary.queue;
        println!(
            "{:>5}  {:<24} {:<20} total={:<4} draft={:<4} done={:<4} failed={:<4} cancelled={:<4} attempts={}{}",
            q.id,
            q.name,
            summary.state.as_str(),
            summary.counts.total(),
            summary.counts.draft,
            summary.counts.done,
            summary.counts.failed,
            summary.counts.cancelled,
            q.process_count,
            if q.action_required { "  ACTION REQUIRED" } else { "" },
        );
    }
    Ok(())
}

async fn run(cfg: Config, command: Command) -> Result<()> {
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let mut instance = db::get_or_create_instance(&pool, &cfg.instance.name).await?;
    let store: Arc<dyn StoreService> = Arc::new(RestStoreClient::from_config(&cfg.store)?);

    match command {
        Command::Import {
            kind,
            since,
            do_not_update,
        } => {
            let window = parse_since(since.as_deref())?;
            let report = match kind {
                Kind::Orders => {
                    ingest::ingest_orders(&pool, store.as_ref(), &cfg, &mut instance, window).await?
                }
                Kind::Customers => {
                    ingest::ingest_customers(&pool, store.as_ref(), &cfg, &mut instance, window)
                        .await?
                }
                Kind::Products => {
                    ingest::ingest_products(
                        &pool,
                        store.as_ref(),
                        &cfg,
                        &mut instance,
                        window,
                        do_not_update,
                    )
                    .await?
                }
            };
            info!(lines = report.lines_created, queues = report.queues.len(), "import finished");
        }
        Command::ImportSkus {
            skus,
            do_not_update,
        } => {
            let report = ingest::import_specific_products(
                &pool,
                store.as_ref(),
                &cfg,
                &instance,
                &skus,
                do_not_update,
            )
            .await?;
            info!(lines = report.lines_created, "products enqueued");
        }
        Command::ImportOrders { increment_ids } => {
            let report =
                ingest::import_specific_orders(&pool, store.as_ref(), &cfg, &instance, &increment_ids)
                    .await?;
            info!(lines = report.lines_created, "orders enqueued");
        }
        Command::Process { kind, no_budget } => {
            let budget = if no_budget {
                TickBudget::unlimited()
            } else {
                TickBudget::from_cron_interval(cfg.app.cron_interval_seconds)
            };
            let handler: Box<dyn LineHandler> = match kind {
                Kind::Orders => Box::new(OrderHandler::new(store.clone())),
                Kind::Customers => Box::new(CustomerHandler),
                Kind::Products => Box::new(ProductHandler),
            };
            let report = queue::process_tick(
                &pool,
                &instance,
                cfg.app.max_queue_process_count,
                handler.as_ref(),
                budget,
            )
            .await?;
            for queue_id in &report.escalated {
                warn!(queue_id, "queue needs operator action");
            }
        }
        Command::Register { file } => register(&pool, &instance, &file).await?,
        Command::ExportProducts { direct, ids } => {
            let mode = if direct {
                ExportMode::Direct
            } else {
                ExportMode::Bulk
            };
            let ids = (!ids.is_empty()).then_some(ids.as_slice());
            let report =
                reconcile::export_products(&pool, store.as_ref(), &cfg, &instance, ids, mode).await?;
            if !report.log_books.is_empty() {
                warn!(log_books = ?report.log_books, "export finished with errors");
            }
        }
        Command::DeleteProduct { id, simple } => {
            let owner = if simple {
                OwnerKind::Simple
            } else {
                OwnerKind::Configurable
            };
            reconcile::delete_remote_product(&pool, store.as_ref(), owner, id).await?;
        }
        Command::PollBulk => {
            let report = bulk::poll_all(&pool, store.as_ref(), instance.id).await?;
            if let Some(book) = report.log_book_id {
                warn!(log_book_id = book, failed = report.failed, "bulk items failed");
            }
        }
        Command::Purge => {
            let (lines, queues) = queue::purge(&pool, instance.id).await?;
            let jobs = bulk::purge_orphans(&pool).await?;
            info!(lines, queues, jobs, "purged");
        }
        Command::ResetQueue { queue_id } => queue::reset_action_required(&pool, queue_id).await?,
        Command::CancelQueue { queue_id } => {
            let cancelled = queue::cancel_queue(&pool, queue_id).await?;
            info!(queue_id, cancelled, "queue cancelled");
        }
        Command::Queues { kind } => print_queues(&pool, &instance, kind.map(Into::into)).await?,
        Command::ExampleConfig => print!("{}", config::example()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if matches!(args.command, Command::ExampleConfig) {
        print!("{}", config::example());
        return Ok(());
    }
    let cfg = config::load(Some(args.config.as_path()))?;
    cfg.ensure_dirs()?;
    run(cfg, args.command).await
}
