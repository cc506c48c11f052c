//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use event_store::{
    AggregateId, AppendOptions, EventEnvelope, EventQuery, EventStore, EventStoreExt,
    PostgresEventStore, Snapshot, StreamAppend, Version,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_events_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;
    let store = PostgresEventStore::connect(&info.connection_string, 5)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events, snapshots")
        .execute(store.pool())
        .await
        .unwrap();

    store
}

fn event(aggregate_id: AggregateId, aggregate_type: &str, version: i64, event_type: &str) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type(aggregate_type)
        .event_type(event_type)
        .version(Version::new(version))
        .payload_raw(serde_json::json!({"type": event_type, "data": {}}))
        .metadata("source", serde_json::json!("integration-test"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn append_and_load_stream() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let version = store
        .append(
            vec![
                event(id, "Enrollment", 1, "EnrollmentInitiated"),
                event(id, "Enrollment", 2, "PaymentConfirmed"),
            ],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    assert_eq!(version, Version::new(2));

    let events = store.get_events_for_aggregate(id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "EnrollmentInitiated");
    assert_eq!(
        events[0].metadata.get("source"),
        Some(&serde_json::json!("integration-test"))
    );
    assert!(store.aggregate_exists(id).await.unwrap());
}

#[tokio::test]
async fn duplicate_stream_creation_is_a_conflict() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    store
        .append(
            vec![event(id, "Certificate", 1, "CertificateIssued")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let err = store
        .append(
            vec![event(id, "Certificate", 1, "CertificateIssued")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap_err();
    assert!(err.is_concurrency_conflict());
}

#[tokio::test]
async fn concurrent_creators_collapse_to_one_stream() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .append(
                    vec![event(id, "Certificate", 1, "CertificateIssued")],
                    AppendOptions::expect_new(),
                )
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(e.is_concurrency_conflict(), "unexpected error: {e}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(store.get_events_for_aggregate(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_batch_rolls_back_every_stream() {
    let store = get_test_store().await;
    let transaction = AggregateId::new();
    let enrollment = AggregateId::new();

    store
        .append(
            vec![event(enrollment, "Enrollment", 1, "EnrollmentInitiated")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let err = store
        .append_batch(vec![
            StreamAppend::new(
                vec![event(transaction, "PaymentTransaction", 1, "TransactionOpened")],
                AppendOptions::expect_new(),
            ),
            StreamAppend::new(
                vec![event(enrollment, "Enrollment", 1, "EnrollmentInitiated")],
                AppendOptions::expect_new(),
            ),
        ])
        .await
        .unwrap_err();

    assert!(err.is_concurrency_conflict());
    assert!(
        store
            .get_events_for_aggregate(transaction)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn batch_commits_all_streams() {
    let store = get_test_store().await;
    let transaction = AggregateId::new();
    let enrollment = AggregateId::new();
    let roster = AggregateId::new();

    store
        .append(
            vec![event(enrollment, "Enrollment", 1, "EnrollmentInitiated")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    store
        .append(
            vec![event(transaction, "PaymentTransaction", 1, "TransactionOpened")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let versions = store
        .append_batch(vec![
            StreamAppend::new(
                vec![event(transaction, "PaymentTransaction", 2, "TransactionCompleted")],
                AppendOptions::expect_version(Version::first()),
            ),
            StreamAppend::new(
                vec![event(enrollment, "Enrollment", 2, "PaymentConfirmed")],
                AppendOptions::expect_version(Version::first()),
            ),
            StreamAppend::new(
                vec![event(roster, "CourseRoster", 1, "StudentEnrolled")],
                AppendOptions::expect_new(),
            ),
        ])
        .await
        .unwrap();

    assert_eq!(
        versions,
        vec![Version::new(2), Version::new(2), Version::new(1)]
    );
}

#[tokio::test]
async fn query_by_event_type_in_log_order() {
    let store = get_test_store().await;
    let first = AggregateId::new();
    let second = AggregateId::new();

    for id in [first, second] {
        store
            .append(
                vec![
                    event(id, "Enrollment", 1, "EnrollmentInitiated"),
                    event(id, "Enrollment", 2, "EnrollmentCompleted"),
                ],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
    }

    let completed = store
        .query_events(
            EventQuery::new()
                .aggregate_type("Enrollment")
                .event_type("EnrollmentCompleted"),
        )
        .await
        .unwrap();

    assert_eq!(completed.len(), 2);
    assert_eq!(completed[0].aggregate_id, first);
    assert_eq!(completed[1].aggregate_id, second);
}

#[tokio::test]
async fn snapshot_upsert() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    store
        .save_snapshot(Snapshot::new(
            id,
            "Enrollment",
            Version::new(50),
            serde_json::json!({"progress": 40}),
        ))
        .await
        .unwrap();
    store
        .save_snapshot(Snapshot::new(
            id,
            "Enrollment",
            Version::new(100),
            serde_json::json!({"progress": 80}),
        ))
        .await
        .unwrap();

    let snapshot = store.get_snapshot(id).await.unwrap().unwrap();
    assert_eq!(snapshot.version, Version::new(100));
    assert_eq!(snapshot.state["progress"], 80);
}
