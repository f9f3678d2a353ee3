use std::sync::Arc;

use caddie_backend::db::{global, DatabaseConfig, MemorySnapshotStore, Platform, SchemaExt, TableService};
use caddie_core::db::column::*;
use caddie_core::db::table;
use caddie_core::record;
use caddie_core::schema::{Schema, TableConfig};
use caddie_core::Value;

fn schema() -> Arc<Schema> {
    let course = TableConfig::new(
        table("course")
            .col(text("id").primary_key())
            .col(text("name").not_null().unique())
            .build()
            .unwrap(),
    );
    Arc::new(Schema::new([course]).unwrap())
}

#[tokio::test]
async fn test_handle_survives_close_through_snapshot() {
    let mut config = DatabaseConfig::default();
    config.platform = Some(Platform::Browser);
    config.browser.debounce_ms = 60_000;
    global::configure_with_store(config, Arc::new(MemorySnapshotStore::new())).await;

    assert_eq!(global::load_database().await.unwrap(), None);

    let db = global::init_database().await.unwrap();
    assert_eq!(db.platform(), Platform::Browser);
    let schema = schema();
    schema.create_all(&db).await.unwrap();
    let courses = TableService::new(db.clone(), schema.clone(), "course").unwrap();
    courses
        .insert(record! { "id" => "c1", "name" => "Pine Nursery" })
        .await
        .unwrap();

    global::save_database().await.unwrap();
    assert!(global::load_database().await.unwrap().is_some());

    // the same handle until closed
    let again = global::get_database().await.unwrap();
    assert_eq!(again.table_names().await.unwrap(), vec!["course".to_string()]);

    global::close_database().await.unwrap();
    // closing twice is harmless
    global::close_database().await.unwrap();

    let db = global::get_database().await.unwrap();
    let courses = TableService::new(db, schema, "course").unwrap();
    let row = courses.find_by_id("c1").await.unwrap().unwrap();
    assert_eq!(row["name"], Value::from("Pine Nursery"));

    global::close_database().await.unwrap();
}
