use docdal::{memory::InMemoryStore, prelude::*};

const DB: &str = "shop";

async fn shop() -> DataAccess<InMemoryStore> {
    let store = InMemoryStore::builder()
        .with_documents(DB, "orders", (1..=4).map(|n| doc! { "_id": n, "kind": "order" }).collect())
        .with_documents(DB, "invoices", (1..=2).map(|n| doc! { "_id": n, "kind": "invoice" }).collect())
        .build()
        .await
        .expect("build store");
    let access = DataAccess::new(store);

    access
        .upsert_database(DB, doc! { "description": "the shop" }, None, true, false, false)
        .await
        .expect("database properties");
    for collection in ["orders", "invoices"] {
        access
            .upsert_collection(DB, collection, doc! { "description": collection }, None, true, false, false)
            .await
            .expect("collection properties");
    }
    access
}

fn has_properties_id(documents: &[Document]) -> bool {
    documents
        .iter()
        .any(|document| matches!(document.get_str("_id"), Ok("_properties")))
}

#[tokio::test]
async fn properties_never_appear_among_data() {
    let access = shop().await;

    let orders = access
        .get_collection_data(DB, "orders", PageWindow::default(), &QueryDescriptor::empty(), AllocationPolicy::None)
        .await
        .expect("orders");
    let names = access.get_collection_names(DB).await.expect("names");
    let database = access
        .get_database_data(DB, &names, PageWindow::default())
        .await
        .expect("database data");

    assert_eq!(orders.len(), 4);
    assert!(!has_properties_id(&orders));
    assert!(!has_properties_id(&database));
    assert!(!names.iter().any(|name| name == "_properties"));
    assert_eq!(
        access
            .get_collection_size(DB, "orders", &QueryDescriptor::empty())
            .await
            .expect("size"),
        4
    );
}

#[tokio::test]
async fn database_data_follows_the_given_collection_order() {
    let access = shop().await;

    let documents = access
        .get_database_data(
            DB,
            &["invoices".to_string(), "orders".to_string()],
            PageWindow::new(1, 3).expect("window"),
        )
        .await
        .expect("database data");

    let kinds = documents
        .iter()
        .map(|document| document.get_str("kind").expect("kind"))
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec!["invoice", "invoice", "order", "order", "order"]);
}

#[tokio::test]
async fn listings_and_existence() {
    let access = shop().await;

    assert_eq!(access.get_database_names().await.expect("databases"), vec![DB.to_string()]);
    assert_eq!(
        access.get_collection_names(DB).await.expect("collections"),
        vec!["invoices".to_string(), "orders".to_string()]
    );
    assert_eq!(access.get_db_size(DB).await.expect("db size"), 2);
    assert!(access.does_db_exist(DB).await.expect("db exists"));
    assert!(access.does_collection_exist(DB, "orders").await.expect("exists"));
    assert!(!access.does_collection_exist(DB, "refunds").await.expect("exists"));
    assert_eq!(access.get_collection_properties(DB, "refunds").await.expect("read"), None);
}

#[tokio::test]
async fn properties_carry_fields_and_tag() {
    let access = shop().await;

    let properties = access
        .get_collection_properties(DB, "orders")
        .await
        .expect("read")
        .expect("present");

    assert_eq!(properties.fields(), &doc! { "description": "orders" });
    assert!(properties.etag().is_some());
    assert_eq!(properties.to_document().get_str("_id").ok(), Some("_properties"));
}

#[tokio::test]
async fn index_operations_pass_through() {
    let access = shop().await;

    access
        .create_index(DB, "orders", doc! { "kind": 1 }, doc! { "name": "by_kind" })
        .await
        .expect("create index");
    let indexes = access.get_collection_indexes(DB, "orders").await.expect("indexes");
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].get_document("key").expect("key"), &doc! { "kind": 1 });

    assert_eq!(
        access.delete_index(DB, "orders", "by_kind").await.expect("drop"),
        StatusCode::Deleted
    );
    assert_eq!(
        access.delete_index(DB, "orders", "by_kind").await.expect("drop again"),
        StatusCode::NotFound
    );
}

#[tokio::test]
async fn counts_apply_filters_without_touching_the_pool() {
    let access = shop().await;
    let query = QueryDescriptor::builder()
        .filter_json(r#"{"_id": {"$in": [1, 3, 9]}}"#)
        .sort_by("-_id")
        .build()
        .expect("query");

    assert_eq!(access.get_collection_size(DB, "orders", &query).await.expect("size"), 2);
    assert_eq!(access.pool_stats(), PoolStats::default());
}

#[tokio::test]
async fn custom_configuration_is_exposed_until_shutdown() {
    let config = DataAccessConfig {
        max_pagesize: 5,
        cursor_pool: CursorPoolConfig {
            capacity: 8,
            ..CursorPoolConfig::default()
        },
    };
    let access = DataAccess::with_config(InMemoryStore::new(), config.clone());

    assert_eq!(access.config(), &config);
    assert!(matches!(
        access
            .get_collection_data(DB, "orders", PageWindow::new(1, 6).expect("window"), &QueryDescriptor::empty(), AllocationPolicy::None)
            .await,
        Err(DataAccessError::IllegalQueryParameter(_))
    ));

    access.shutdown().await.expect("shutdown");
}
