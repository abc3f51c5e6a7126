use docdal::{memory::InMemoryStore, prelude::*};
use std::time::Duration;

const DB: &str = "shop";
const ORDERS: &str = "orders";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn order(n: i32) -> Document {
    doc! {
        "_id": n,
        "qty": (n * 7) % 11,
        "status": if n % 3 == 0 { "open" } else { "shipped" },
    }
}

async fn orders_access(config: DataAccessConfig) -> DataAccess<InMemoryStore> {
    init_tracing();

    let store = InMemoryStore::builder()
        .with_documents(DB, ORDERS, (1..=25).map(order).collect())
        .build()
        .await
        .expect("build store");
    let access = DataAccess::with_config(store, config);

    // the collection already exists, so its properties are written as an update
    let result = access
        .upsert_collection(DB, ORDERS, doc! { "description": "all orders" }, None, true, false, false)
        .await
        .expect("write properties");
    assert_eq!(result.status(), StatusCode::Updated);
    access
}

fn window(page: i64, pagesize: i64) -> PageWindow {
    PageWindow::new(page, pagesize).expect("valid window")
}

fn ids(documents: &[Document]) -> Vec<i32> {
    documents
        .iter()
        .map(|document| document.get_i32("_id").expect("integer id"))
        .collect()
}

#[tokio::test]
async fn twenty_five_orders_in_pages_of_ten() {
    for policy in [
        AllocationPolicy::None,
        AllocationPolicy::EagerLinear,
        AllocationPolicy::EagerRandom,
    ] {
        let access = orders_access(DataAccessConfig::default()).await;
        let query = QueryDescriptor::empty();

        let mut sizes = Vec::new();
        for page in 1..=3 {
            let documents = access
                .get_collection_data(DB, ORDERS, window(page, 10), &query, policy)
                .await
                .expect("page");
            sizes.push(documents.len());
        }

        assert_eq!(sizes, vec![10, 10, 5], "{policy:?}");
        assert_eq!(
            access
                .get_collection_size(DB, ORDERS, &query)
                .await
                .expect("size"),
            25
        );
    }
}

#[tokio::test]
async fn pages_concatenate_to_the_unpaginated_result() {
    let access = orders_access(DataAccessConfig::default()).await;
    let query = QueryDescriptor::builder()
        .filter_json(r#"{"qty": {"$gte": 2}}"#)
        .sort_by(r#"{"status": 1, "qty": -1}"#)
        .build()
        .expect("query");

    let everything = access
        .get_collection_data(DB, ORDERS, window(1, 1000), &query, AllocationPolicy::None)
        .await
        .expect("all");

    for pagesize in [1, 4, 7] {
        let mut concatenated = Vec::new();
        for page in 1.. {
            let documents = access
                .get_collection_data(DB, ORDERS, window(page, pagesize), &query, AllocationPolicy::EagerLinear)
                .await
                .expect("page");
            assert!(documents.len() as i64 <= pagesize);

            let last = (documents.len() as i64) < pagesize;
            concatenated.extend(documents);
            if last {
                break;
            }
        }

        assert_eq!(ids(&concatenated), ids(&everything), "pagesize {pagesize}");
    }

    let expected = access
        .get_collection_size(DB, ORDERS, &query)
        .await
        .expect("size");
    assert_eq!(everything.len() as u64, expected);
}

#[tokio::test]
async fn sort_objects_apply_keys_in_the_order_written() {
    let access = orders_access(DataAccessConfig::default()).await;
    let query = QueryDescriptor::builder()
        .sort_by(r#"{"qty": -1, "_id": 1}"#)
        .build()
        .expect("query");

    let mut expected = (1..=25).collect::<Vec<i32>>();
    expected.sort_by_key(|&n| (-((n * 7) % 11), n));

    let mut served = Vec::new();
    for page in 1..=3 {
        served.extend(ids(
            &access
                .get_collection_data(DB, ORDERS, window(page, 10), &query, AllocationPolicy::EagerLinear)
                .await
                .expect("page"),
        ));
    }

    assert_eq!(served, expected);
}

#[tokio::test]
async fn projections_with_the_same_joined_keys_do_not_share_cursors() {
    let access = orders_access(DataAccessConfig::default()).await;
    let joined = QueryDescriptor::builder().keys(["qty,status"]).build().expect("query");
    let split = QueryDescriptor::builder().keys(["qty", "status"]).build().expect("query");

    access
        .get_collection_data(DB, ORDERS, window(1, 2), &joined, AllocationPolicy::EagerLinear)
        .await
        .expect("page 1");
    let second = access
        .get_collection_data(DB, ORDERS, window(2, 2), &split, AllocationPolicy::EagerLinear)
        .await
        .expect("page 2");

    assert_eq!(access.pool_stats().hits, 0);
    assert_eq!(ids(&second), vec![3, 4]);
    assert!(second.iter().all(|document| document.contains_key("qty")));
}

#[tokio::test]
async fn pooled_and_fresh_cursors_return_the_same_pages() {
    let access = orders_access(DataAccessConfig::default()).await;
    let query = QueryDescriptor::builder()
        .sort_by("-qty")
        .keys(["qty"])
        .build()
        .expect("query");

    let mut fresh = Vec::new();
    for page in 1..=4 {
        fresh.push(
            access
                .get_collection_data(DB, ORDERS, window(page, 7), &query, AllocationPolicy::None)
                .await
                .expect("fresh page"),
        );
    }
    assert_eq!(access.pool_stats().hits, 0);

    for _ in 0..2 {
        for (index, expected) in fresh.iter().enumerate() {
            let pooled = access
                .get_collection_data(DB, ORDERS, window(index as i64 + 1, 7), &query, AllocationPolicy::EagerLinear)
                .await
                .expect("pooled page");
            assert_eq!(&pooled, expected);
        }
    }

    // pages 2..4 come from the cursor that served the page before, on both walks
    assert_eq!(access.pool_stats().hits, 6);
    assert_eq!(access.pooled_cursors(), 0);
}

#[tokio::test]
async fn eager_random_preopens_pages_around_the_request() {
    let access = orders_access(DataAccessConfig::default()).await;
    let query = QueryDescriptor::empty();

    let third = access
        .get_collection_data(DB, ORDERS, window(3, 5), &query, AllocationPolicy::EagerRandom)
        .await
        .expect("page 3");
    assert_eq!(ids(&third), (11..=15).collect::<Vec<_>>());

    // pages 1, 2 and 5 are pre-opened; page 4 is the served cursor moving on
    assert_eq!(access.pool_stats().preopened, 3);

    let fifth = access
        .get_collection_data(DB, ORDERS, window(5, 5), &query, AllocationPolicy::EagerRandom)
        .await
        .expect("page 5");
    assert_eq!(ids(&fifth), (21..=25).collect::<Vec<_>>());
    assert_eq!(access.pool_stats().hits, 1);
}

#[tokio::test]
async fn exhausted_cursors_are_not_pooled() {
    let access = orders_access(DataAccessConfig::default()).await;

    let last = access
        .get_collection_data(DB, ORDERS, window(3, 10), &QueryDescriptor::empty(), AllocationPolicy::EagerLinear)
        .await
        .expect("last page");

    assert_eq!(last.len(), 5);
    assert_eq!(access.pool_stats().misses, 1);

    access
        .get_collection_data(DB, ORDERS, window(4, 10), &QueryDescriptor::empty(), AllocationPolicy::EagerLinear)
        .await
        .expect("past the end");
    assert_eq!(access.pool_stats().hits, 0);
}

#[tokio::test]
async fn writes_invalidate_pooled_cursors() {
    let access = orders_access(DataAccessConfig::default()).await;
    let query = QueryDescriptor::builder().sort_by("_id").build().expect("query");

    access
        .get_collection_data(DB, ORDERS, window(1, 10), &query, AllocationPolicy::EagerLinear)
        .await
        .expect("page 1");

    access
        .backend()
        .insert_documents(DB, ORDERS, vec![doc! { "_id": 0, "qty": 1 }])
        .await
        .expect("insert");
    access.invalidate_collection(DB, ORDERS);
    assert_eq!(access.pool_stats().invalidations, 1);

    // a fresh cursor sees the new first document, shifting page 2 by one
    let second = access
        .get_collection_data(DB, ORDERS, window(2, 10), &query, AllocationPolicy::EagerLinear)
        .await
        .expect("page 2");
    assert_eq!(ids(&second), (10..=19).collect::<Vec<_>>());
    assert_eq!(access.pool_stats().hits, 0);

    let etag = access
        .get_collection_properties(DB, ORDERS)
        .await
        .expect("properties")
        .and_then(|properties| properties.etag().copied())
        .expect("etag");
    access
        .upsert_collection(DB, ORDERS, doc! { "owner": "sales" }, Some(&etag.to_string()), true, true, true)
        .await
        .expect("patch");

    access
        .get_collection_data(DB, ORDERS, window(3, 10), &query, AllocationPolicy::EagerLinear)
        .await
        .expect("page 3");
    assert_eq!(access.pool_stats().hits, 0);
}

#[tokio::test]
async fn database_writes_invalidate_every_collection() {
    let access = orders_access(DataAccessConfig::default()).await;
    access
        .backend()
        .insert_documents(DB, "invoices", (1..=5).map(|n| doc! { "_id": n }).collect())
        .await
        .expect("insert invoices");

    for collection in [ORDERS, "invoices"] {
        access
            .get_collection_data(DB, collection, window(1, 2), &QueryDescriptor::empty(), AllocationPolicy::EagerLinear)
            .await
            .expect("page 1");
    }
    assert_eq!(access.pooled_cursors(), 2);

    let result = access
        .upsert_database(DB, doc! { "owner": "sales" }, None, true, true, false)
        .await
        .expect("patch database");
    assert_eq!(result.status(), StatusCode::Updated);
    assert_eq!(access.pooled_cursors(), 0);

    let second = access
        .get_collection_data(DB, "invoices", window(2, 2), &QueryDescriptor::empty(), AllocationPolicy::EagerLinear)
        .await
        .expect("page 2");
    assert_eq!(ids(&second), vec![3, 4]);
    assert_eq!(access.pool_stats().hits, 0);
}

#[tokio::test]
async fn pool_capacity_evicts_least_recently_used() {
    let mut config = DataAccessConfig::default();
    config.cursor_pool.capacity = 2;
    config.cursor_pool.shards = 1;
    let access = orders_access(config).await;

    for status in ["open", "shipped", "cancelled"] {
        let query = QueryDescriptor::builder()
            .filter(Filter::ne("status", status))
            .build()
            .expect("query");
        access
            .get_collection_data(DB, ORDERS, window(1, 2), &query, AllocationPolicy::EagerLinear)
            .await
            .expect("page");
    }

    assert_eq!(access.pool_stats().evictions, 1);
    assert_eq!(access.pooled_cursors(), 2);
}

#[tokio::test]
async fn pool_capacity_holds_with_fewer_slots_than_shards() {
    let mut config = DataAccessConfig::default();
    config.cursor_pool.capacity = 2;
    let access = orders_access(config).await;

    for qty in 0..10 {
        let query = QueryDescriptor::builder()
            .filter(Filter::ne("qty", qty))
            .build()
            .expect("query");
        access
            .get_collection_data(DB, ORDERS, window(1, 2), &query, AllocationPolicy::EagerLinear)
            .await
            .expect("page");
    }

    assert!(access.pooled_cursors() <= 2);
    assert_eq!(access.pool_stats().evictions + access.pooled_cursors() as u64, 10);
}

#[tokio::test]
async fn recreated_collections_do_not_reuse_cursors() {
    let access = orders_access(DataAccessConfig::default()).await;
    let query = QueryDescriptor::builder().sort_by("_id").build().expect("query");

    access
        .get_collection_data(DB, ORDERS, window(1, 2), &query, AllocationPolicy::EagerLinear)
        .await
        .expect("page 1");
    let result = access
        .delete_collection(DB, ORDERS, None, false)
        .await
        .expect("delete");
    assert_eq!(result.status(), StatusCode::Deleted);
    assert_eq!(access.pooled_cursors(), 0);

    access
        .backend()
        .insert_documents(DB, ORDERS, (101..=104).map(|n| doc! { "_id": n }).collect())
        .await
        .expect("recreate");
    let second = access
        .get_collection_data(DB, ORDERS, window(2, 2), &query, AllocationPolicy::EagerLinear)
        .await
        .expect("page 2");

    assert_eq!(ids(&second), vec![103, 104]);
    assert_eq!(access.pool_stats().hits, 0);
}

#[tokio::test]
async fn idle_cursors_expire() {
    let mut config = DataAccessConfig::default();
    config.cursor_pool.max_idle_secs = 0;
    let access = orders_access(config).await;
    let query = QueryDescriptor::empty();

    access
        .get_collection_data(DB, ORDERS, window(1, 5), &query, AllocationPolicy::EagerLinear)
        .await
        .expect("page 1");
    tokio::time::sleep(Duration::from_millis(5)).await;

    let second = access
        .get_collection_data(DB, ORDERS, window(2, 5), &query, AllocationPolicy::EagerLinear)
        .await
        .expect("page 2");

    assert_eq!(ids(&second), (6..=10).collect::<Vec<_>>());
    assert_eq!(access.pool_stats().expired, 1);
    assert_eq!(access.pool_stats().hits, 0);
}

#[tokio::test]
async fn oversized_pages_are_illegal() {
    let mut config = DataAccessConfig::default();
    config.max_pagesize = 20;
    let access = orders_access(config).await;

    let collection_data = access
        .get_collection_data(DB, ORDERS, window(1, 21), &QueryDescriptor::empty(), AllocationPolicy::None)
        .await;
    let database_data = access
        .get_database_data(DB, &[ORDERS.to_string()], window(1, 21))
        .await;

    assert!(matches!(collection_data, Err(DataAccessError::IllegalQueryParameter(_))));
    assert!(matches!(database_data, Err(DataAccessError::IllegalQueryParameter(_))));
    assert!(matches!(
        PageWindow::new(0, 10),
        Err(DataAccessError::IllegalQueryParameter(_))
    ));
}

#[tokio::test]
async fn malformed_clauses_name_the_offending_clause() {
    let result = QueryDescriptor::builder()
        .filter_json(r#"{"status": "open"}"#)
        .filter_json(r#"{"qty": {"$where": "1"}}"#)
        .build();

    match result {
        Err(DataAccessError::QueryParameter { clause, .. }) => {
            assert!(clause.starts_with("filter[1]"), "{clause}");
        }
        other => panic!("expected a query parameter error, got {other:?}"),
    }
}
