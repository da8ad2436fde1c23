mod common;

use common::{page, script_default_attribute_set, setup, RecordingStore};
use reqwest::Method;
use serde_json::json;
use store_sync::db::catalog::{self, NewConfigurable, NewSimple};
use store_sync::db::model::{AttributeValue, Translation};
use store_sync::db::{self, Pool};
use store_sync::model::{ExportStatus, Instance};
use store_sync::reconcile::{self, ExportError, ExportMode};
use store_sync::store::StoreError;

const EXPORTED_AT: &str = "2024-05-01 10:00:00";

fn chair() -> NewConfigurable {
    NewConfigurable {
        template_ref: "tmpl-chair".into(),
        name: "Chair".into(),
        description: Some("Oak chair".into()),
        attribute_set: Some("Default".into()),
        assign_attributes: vec!["Color".into()],
        category_ids: Vec::new(),
        do_not_create: false,
    }
}

fn variant(sku: &str, color: &str) -> NewSimple {
    NewSimple {
        sku: sku.into(),
        name: format!("Chair {color}"),
        attributes: vec![AttributeValue::new("Color", color)],
        price: 49.0,
        weight: 4.5,
        qty: 3.0,
    }
}

async fn register(pool: &Pool, instance: &Instance, variants: &[NewSimple]) -> i64 {
    reconcile::register_template(pool, instance.id, "CHAIR", &chair(), variants)
        .await
        .unwrap()
}

fn created(id: i64, sku: &str, type_id: &str) -> serde_json::Value {
    json!({ "id": id, "sku": sku, "type_id": type_id, "attribute_set_id": 4, "updated_at": EXPORTED_AT })
}

/// Routes hit by a direct export of CHAIR with the single variant CHAIR-RED.
async fn script_direct_create(store: &RecordingStore) {
    script_default_attribute_set(store).await;
    store
        .push(Method::GET, "/V1/products", Ok(page(Vec::new(), 0)))
        .await;
    store
        .push(Method::POST, "/all/V1/products", Ok(created(10, "CHAIR", "configurable")))
        .await;
    store
        .push(Method::POST, "/all/V1/products", Ok(created(11, "CHAIR-RED", "simple")))
        .await;
    for sku in ["CHAIR", "CHAIR-RED"] {
        store
            .respond(Method::POST, &format!("/V1/products/{sku}/websites"), json!(true))
            .await;
    }
    store
        .respond(Method::PUT, "/default/V1/products/CHAIR-RED", created(11, "CHAIR-RED", "simple"))
        .await;
    store
        .respond(Method::POST, "/V1/configurable-products/CHAIR/options", json!(31))
        .await;
    store
        .respond(Method::POST, "/V1/configurable-products/CHAIR/child", json!(true))
        .await;
}

#[tokio::test]
async fn second_pass_over_unchanged_products_is_a_no_op() {
    let (pool, cfg, instance) = setup().await;
    let parent_id = register(&pool, &instance, &[variant("CHAIR-RED", "Red")]).await;
    let store = RecordingStore::new();
    script_direct_create(&store).await;

    let report = reconcile::export_products(&pool, &store, &cfg, &instance, None, ExportMode::Direct)
        .await
        .unwrap();
    assert_eq!(report.errors, 0);
    assert!(report.log_books.is_empty());
    assert_eq!(store.calls_to(Method::POST, "/V1/configurable-products/CHAIR/child").await.len(), 1);

    let parent = catalog::get_configurable(&pool, parent_id).await.unwrap();
    assert_eq!(parent.status, ExportStatus::InMagento);
    assert_eq!(parent.remote_id, Some(10));
    assert_eq!(parent.remote_children, vec![11]);
    assert_eq!(parent.export_date.as_deref(), Some(EXPORTED_AT));
    assert_eq!(parent.website_ids, vec![1]);
    let simple = catalog::find_simple_by_sku(&pool, instance.id, "CHAIR-RED")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(simple.status, ExportStatus::InMagento);
    assert_eq!(simple.remote_id, Some(11));

    // The Store now holds exactly what was exported.
    store.clear_calls().await;
    store
        .push(
            Method::GET,
            "/V1/products",
            Ok(page(
                vec![
                    json!({
                        "id": 10, "sku": "CHAIR", "type_id": "configurable", "attribute_set_id": 4,
                        "updated_at": EXPORTED_AT,
                        "extension_attributes": {
                            "website_ids": [1],
                            "configurable_product_options": [{ "id": 31, "attribute_id": "93", "label": "Color" }],
                            "configurable_product_links": [11],
                            "configurable_product_link_data": [
                                "{\"simple_product_sku\":\"CHAIR-RED\",\"simple_product_attribute\":[{\"label\":\"Color\",\"value\":\"Red\"}]}"
                            ]
                        }
                    }),
                    json!({
                        "id": 11, "sku": "CHAIR-RED", "type_id": "simple", "attribute_set_id": 4,
                        "updated_at": EXPORTED_AT,
                        "extension_attributes": { "website_ids": [1] }
                    }),
                ],
                2,
            )),
        )
        .await;

    let report = reconcile::export_products(&pool, &store, &cfg, &instance, None, ExportMode::Direct)
        .await
        .unwrap();
    assert_eq!(report.in_magento, 2);
    assert_eq!(report.exported, 0);
    assert!(store.mutations().await.is_empty());
    assert!(!store.calls().await.is_empty());

    let parent = catalog::get_configurable(&pool, parent_id).await.unwrap();
    assert_eq!(parent.status, ExportStatus::InMagento);
    assert_eq!(parent.export_date.as_deref(), Some(EXPORTED_AT));
}

#[tokio::test]
async fn derived_skus_probe_past_existing_ones() {
    let (pool, _cfg, instance) = setup().await;
    let mut ids = Vec::new();
    for n in 0..3 {
        let mut template = chair();
        template.template_ref = format!("tmpl-{n}");
        ids.push(
            reconcile::register_template(&pool, instance.id, "Chair", &template, &[])
                .await
                .unwrap(),
        );
    }
    let mut skus = Vec::new();
    for id in &ids {
        skus.push(catalog::get_configurable(&pool, *id).await.unwrap().sku);
    }
    assert_eq!(skus, vec!["Chair", "Chair0", "Chair1"]);

    // Registering a known template again refreshes it instead.
    let again = reconcile::register_template(&pool, instance.id, "Chair", &chair_with_ref("tmpl-0"), &[])
        .await
        .unwrap();
    assert_eq!(again, ids[0]);
    let refreshed = catalog::get_configurable(&pool, again).await.unwrap();
    assert_eq!(refreshed.sku, "Chair");
    assert!(refreshed.force_update);
}

fn chair_with_ref(template_ref: &str) -> NewConfigurable {
    NewConfigurable {
        template_ref: template_ref.into(),
        ..chair()
    }
}

#[tokio::test]
async fn duplicate_axis_values_reject_both_siblings() {
    let (pool, cfg, instance) = setup().await;
    register(
        &pool,
        &instance,
        &[variant("CHAIR-RED", "Red"), variant("CHAIR-RED2", " red ")],
    )
    .await;
    let store = RecordingStore::new();
    script_direct_create(&store).await;

    let report = reconcile::export_products(&pool, &store, &cfg, &instance, None, ExportMode::Direct)
        .await
        .unwrap();
    assert_eq!(report.errors, 2);
    assert!(store.calls_to(Method::POST, "/V1/configurable-products/CHAIR/child").await.is_empty());
    // Only the parent was created.
    assert_eq!(store.calls_to(Method::POST, "/all/V1/products").await.len(), 1);

    for (sku, other) in [("CHAIR-RED", "CHAIR-RED2"), ("CHAIR-RED2", "CHAIR-RED")] {
        let simple = catalog::find_simple_by_sku(&pool, instance.id, sku)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(simple.status, ExportStatus::LogError);
        assert_eq!(simple.remote_id, None);
        let book = report.log_books[0];
        let lines = db::log_lines(&pool, book).await.unwrap();
        assert!(lines.iter().any(|l| l.reference.as_deref() == Some(sku)
            && l.message.contains(&format!("found in Product - {other}"))));
    }
}

#[tokio::test]
async fn unusable_axis_blocks_the_whole_family() {
    let (pool, cfg, instance) = setup().await;
    let parent_id = register(&pool, &instance, &[variant("CHAIR-RED", "Red")]).await;
    let store = RecordingStore::new();
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
                "attribute_id": 93, "attribute_code": "color", "default_frontend_label": "Color",
                "scope": "store", "is_user_defined": true, "options": []
            }]),
        )
        .await;
    store
        .push(Method::GET, "/V1/products", Ok(page(Vec::new(), 0)))
        .await;

    let report = reconcile::export_products(&pool, &store, &cfg, &instance, None, ExportMode::Direct)
        .await
        .unwrap();
    assert_eq!(report.errors, 2);
    assert!(store.mutations().await.is_empty());
    let parent = catalog::get_configurable(&pool, parent_id).await.unwrap();
    assert_eq!(parent.status, ExportStatus::LogError);
    let lines = db::log_lines(&pool, report.log_books[0]).await.unwrap();
    assert!(lines[0].message.contains("'Global' scope"));
}

#[tokio::test]
async fn direct_export_is_limited() {
    let (pool, mut cfg, instance) = setup().await;
    register(&pool, &instance, &[variant("CHAIR-RED", "Red")]).await;
    let mut other = chair_with_ref("tmpl-stool");
    other.name = "Stool".into();
    reconcile::register_template(&pool, instance.id, "STOOL", &other, &[variant("STOOL-RED", "Red")])
        .await
        .unwrap();
    cfg.sync.direct_export_limit = 1;

    let store = RecordingStore::new();
    let err = reconcile::export_products(&pool, &store, &cfg, &instance, None, ExportMode::Direct)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::TooManyForDirect { count: 2, limit: 1 }));
    assert!(store.calls().await.is_empty());
}

#[tokio::test]
async fn deleting_a_product_clears_its_remote_state() {
    let (pool, cfg, instance) = setup().await;
    let parent_id = register(&pool, &instance, &[variant("CHAIR-RED", "Red")]).await;
    let store = RecordingStore::new();
    script_direct_create(&store).await;
    reconcile::export_products(&pool, &store, &cfg, &instance, None, ExportMode::Direct)
        .await
        .unwrap();

    // The Store already forgot the product: still counts as deleted.
    reconcile::delete_remote_product(&pool, &store, db::OwnerKind::Configurable, parent_id)
        .await
        .unwrap();
    let parent = catalog::get_configurable(&pool, parent_id).await.unwrap();
    assert_eq!(parent.status, ExportStatus::Deleted);
    assert_eq!(parent.remote_id, None);
    assert_eq!(parent.export_date, None);
    assert!(parent.website_ids.is_empty());
    assert_eq!(store.calls_to(Method::DELETE, "/all/V1/products/CHAIR").await.len(), 1);
}

#[tokio::test]
async fn failed_storeview_call_leaves_sibling_calls_running() {
    let (pool, cfg, instance) = setup().await;
    let parent_id = register(&pool, &instance, &[variant("CHAIR-RED", "Red")]).await;
    for (lang, name) in [("en_US", "Chair"), ("de_DE", "Stuhl")] {
        let translation = Translation {
            lang: lang.into(),
            name: name.into(),
            description: None,
        };
        catalog::set_translation(&pool, db::OwnerKind::Configurable, parent_id, &translation)
            .await
            .unwrap();
    }
    let store = RecordingStore::new();
    script_direct_create(&store).await;
    store
        .push(
            Method::PUT,
            "/default/V1/products/CHAIR",
            Err(StoreError::Status {
                status: 500,
                message: "store view locked".into(),
            }),
        )
        .await;
    store
        .respond(Method::PUT, "/de/V1/products/CHAIR", created(10, "CHAIR", "configurable"))
        .await;

    let report = reconcile::export_products(&pool, &store, &cfg, &instance, None, ExportMode::Direct)
        .await
        .unwrap();
    assert_eq!(store.calls_to(Method::PUT, "/default/V1/products/CHAIR").await.len(), 1);
    assert_eq!(store.calls_to(Method::PUT, "/de/V1/products/CHAIR").await.len(), 1);
    assert_eq!(store.calls_to(Method::POST, "/all/V1/products").await.len(), 2);
    assert_eq!(store.calls_to(Method::POST, "/V1/configurable-products/CHAIR/child").await.len(), 1);

    let parent = catalog::get_configurable(&pool, parent_id).await.unwrap();
    assert_eq!(parent.status, ExportStatus::LogError);
    assert!(parent.force_update);
    assert_eq!(parent.remote_id, Some(10));
    let simple = catalog::find_simple_by_sku(&pool, instance.id, "CHAIR-RED")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(simple.status, ExportStatus::InMagento);
    assert_eq!(simple.remote_id, Some(11));

    assert_eq!(report.log_books.len(), 1);
    let lines = db::log_lines(&pool, report.log_books[0]).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].reference.as_deref(), Some("CHAIR"));
    assert!(lines[0].message.contains("'default' store view"));
}

#[tokio::test]
async fn attribute_sets_are_resolved_once_per_pass() {
    let (pool, mut cfg, instance) = setup().await;
    register(&pool, &instance, &[variant("CHAIR-RED", "Red")]).await;
    let mut other = chair_with_ref("tmpl-stool");
    other.name = "Stool".into();
    reconcile::register_template(&pool, instance.id, "STOOL", &other, &[variant("STOOL-RED", "Red")])
        .await
        .unwrap();
    cfg.sync.export_batch_size = 1;

    let store = RecordingStore::new();
    script_default_attribute_set(&store).await;
    store
        .respond(Method::GET, "/V1/products", page(Vec::new(), 0))
        .await;

    reconcile::export_products(&pool, &store, &cfg, &instance, None, ExportMode::Direct)
        .await
        .unwrap();
    // Two chunks, one remote snapshot each.
    assert_eq!(store.calls_to(Method::GET, "/V1/products").await.len(), 2);
    assert_eq!(store.calls_to(Method::GET, "/all/V1/eav/attribute-sets/list").await.len(), 1);
    assert_eq!(
        store
            .calls_to(Method::GET, "/all/V1/products/attribute-sets/4/attributes")
            .await
            .len(),
        1
    );
}
