//! End-to-end scenarios driving the full pipeline — parse, build criteria,
//! choose a plan, synthesize a request, execute — through
//! `dynaquery::testing::InMemoryTransport` rather than a live table.

use std::time::Duration;

use dynaquery::criteria::marshal::{Compatibility, MarshalConfig};
use dynaquery::criteria::{QueryOptions, RawValue};
use dynaquery::dispatcher::backoff::RetryConfig;
use dynaquery::dispatcher::{CancelToken, Key};
use dynaquery::testing::InMemoryTransport;
use dynaquery::{DynaQueryError, Entity, Registry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Entity)]
#[entity(table = "orders")]
struct Order {
    #[entity(partition_key)]
    customer_id: String,
    #[entity(sort_key)]
    order_date: String,
    #[entity(index(name = "status-date-index", role = "hash"))]
    status: String,
    #[entity(index(name = "status-date-index", role = "range"))]
    created_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Entity)]
#[entity(table = "users")]
struct User {
    #[entity(partition_key)]
    id: String,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Entity)]
#[entity(table = "events")]
struct Event {
    #[entity(partition_key)]
    id: String,
    #[entity(logical_type = "instant")]
    occurred_at: chrono::DateTime<chrono::Utc>,
}

fn registry(compatibility: Compatibility) -> Registry<InMemoryTransport> {
    Registry::new(InMemoryTransport::new(), MarshalConfig { compatibility })
}

/// A customer's orders, narrowed by a date range on the sort key, resolve
/// to a Query against the main table (no index name needed).
#[tokio::test]
async fn query_main_table_by_partition_and_sort_range() {
    let registry = registry(Compatibility::Native);
    let dispatcher = registry.dispatcher::<Order>().unwrap();

    dispatcher
        .save(&Order {
            customer_id: "c1".to_string(),
            order_date: "2026-01-05".to_string(),
            status: "SHIPPED".to_string(),
            created_date: "2026-01-01".to_string(),
        })
        .await
        .unwrap();
    dispatcher
        .save(&Order {
            customer_id: "c1".to_string(),
            order_date: "2026-03-01".to_string(),
            status: "PENDING".to_string(),
            created_date: "2026-03-01".to_string(),
        })
        .await
        .unwrap();

    let found: Vec<Order> = dispatcher
        .find(
            "findByCustomerIdAndOrderDateBetween",
            vec![
                vec![RawValue::Str("c1".to_string())],
                vec![RawValue::Str("2026-01-01".to_string()), RawValue::Str("2026-02-01".to_string())],
            ],
            QueryOptions::default(),
            false,
        )
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].order_date, "2026-01-05");
}

/// The same entity, queried by its GSI's hash and range keys instead of
/// the main table's, resolves to a Query against that index.
#[tokio::test]
async fn query_gsi_by_status_and_created_date() {
    let registry = registry(Compatibility::Native);
    let dispatcher = registry.dispatcher::<Order>().unwrap();

    for (date, status) in [("2026-01-01", "PENDING"), ("2026-01-02", "PENDING"), ("2026-01-03", "SHIPPED")] {
        dispatcher
            .save(&Order {
                customer_id: "c1".to_string(),
                order_date: date.to_string(),
                status: status.to_string(),
                created_date: date.to_string(),
            })
            .await
            .unwrap();
    }

    let options = QueryOptions::builder().limit(10).build();
    let found: Vec<Order> = dispatcher
        .find(
            "findByStatusAndCreatedDateGreaterThan",
            vec![
                vec![RawValue::Str("PENDING".to_string())],
                vec![RawValue::Str("2026-01-01".to_string())],
            ],
            options,
            false,
        )
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].order_date, "2026-01-02");
}

/// A finder with no key-compatible index falls back to a Scan, which is
/// rejected unless the caller has opted in.
#[tokio::test]
async fn scan_fallback_rejected_without_permission() {
    let registry = registry(Compatibility::Native);
    let dispatcher = registry.dispatcher::<User>().unwrap();

    let result: Result<Vec<User>, _> = dispatcher
        .find("findByName", vec![vec![RawValue::Str("bob".to_string())]], QueryOptions::default(), false)
        .await;

    assert!(matches!(result, Err(DynaQueryError::ScanNotPermitted { .. })));
}

/// The same finder succeeds once the caller permits a Scan.
#[tokio::test]
async fn scan_fallback_permitted() {
    let registry = registry(Compatibility::Native);
    let dispatcher = registry.dispatcher::<User>().unwrap();

    dispatcher.save(&User { id: "u1".to_string(), name: "bob".to_string() }).await.unwrap();
    dispatcher.save(&User { id: "u2".to_string(), name: "alice".to_string() }).await.unwrap();

    let found: Vec<User> = dispatcher
        .find("findByName", vec![vec![RawValue::Str("bob".to_string())]], QueryOptions::default(), true)
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "u1");
}

/// An `Instant` property marshals to a different wire tag under NATIVE vs.
/// LEGACY compatibility, but a query against it round-trips correctly in
/// either mode as long as writer and reader agree on one.
#[tokio::test]
async fn instant_property_round_trips_under_both_compatibility_modes() {
    for compatibility in [Compatibility::Native, Compatibility::Legacy] {
        let registry = registry(compatibility);
        let dispatcher = registry.dispatcher::<Event>().unwrap();

        let occurred_at = chrono::DateTime::parse_from_rfc3339("2026-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        dispatcher.save(&Event { id: "e1".to_string(), occurred_at }).await.unwrap();

        let threshold = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let found: Vec<Event> = dispatcher
            .find("findByOccurredAtGreaterThan", vec![vec![RawValue::Instant(threshold)]], QueryOptions::default(), true)
            .await
            .unwrap();

        assert_eq!(found.len(), 1, "compatibility mode {compatibility:?} failed to find the saved event");
    }
}

/// A single-page finder call exposes its continuation token directly
/// instead of `find`'s eager whole-sequence drain.
#[tokio::test]
async fn find_page_exposes_no_continuation_once_exhausted() {
    let registry = registry(Compatibility::Native);
    let dispatcher = registry.dispatcher::<User>().unwrap();
    dispatcher.save(&User { id: "u1".to_string(), name: "bob".to_string() }).await.unwrap();

    let page: dynaquery::dispatcher::ResultPage<User> = dispatcher
        .find_page("findByName", vec![vec![RawValue::Str("bob".to_string())]], QueryOptions::default(), true, None)
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    assert!(page.next_page_key.is_none());
}

/// A 60-item batch write drains a transport that reports items
/// unprocessed on its first several calls, retrying with backoff until
/// every item lands.
#[tokio::test]
async fn batch_write_drains_partial_failures() {
    let transport = InMemoryTransport::new();
    transport.fail_next_unprocessed(13);
    let registry = Registry::new(transport, MarshalConfig::default());
    let dispatcher = registry.dispatcher::<User>().unwrap();

    let users: Vec<User> = (0..60).map(|i| User { id: format!("u{i}"), name: "x".to_string() }).collect();

    let result = dispatcher
        .batch_write(
            users,
            Vec::new(),
            RetryConfig { base_delay: Duration::from_millis(1), ..RetryConfig::default() },
            CancelToken::new(),
        )
        .await;

    assert!(result.is_ok());

    let found: Vec<User> = dispatcher
        .find("findByName", vec![vec![RawValue::Str("x".to_string())]], QueryOptions::default(), true)
        .await
        .unwrap();
    assert_eq!(found.len(), 60);
}
