use std::sync::Arc;
use std::time::Duration;

use audit_mirror::error::AuditError;
use audit_mirror::models::task::RecordId;
use audit_mirror::models::value::{ColumnKind, ColumnSpec, ProjectedRow, SqlValue};
use audit_mirror::repositories::store::{AuditStore, SourceStore};
use audit_mirror::services::dispatcher::{
    AuditService, DispatchOptions, DropReason, SubmitOutcome,
};
use audit_mirror::services::projector::ProjectionPolicy;
use audit_mirror::sql::Dialect;
use chrono::{Duration as ChronoDuration, Utc};

mod support;

use support::{column, order, LogBuffer, MemoryStore};

fn start(store: &Arc<MemoryStore>, options: DispatchOptions) -> AuditService {
    AuditService::start(
        options,
        Arc::clone(store) as Arc<dyn AuditStore>,
        Some(Arc::clone(store) as Arc<dyn SourceStore>),
    )
    .expect("start audit service")
}

fn options(workers: usize, queue_size: usize) -> DispatchOptions {
    DispatchOptions {
        workers,
        queue_size,
        ..DispatchOptions::default()
    }
}

#[tokio::test]
async fn record_with_one_auditable_field_creates_table_and_row() {
    let store = Arc::new(MemoryStore::new(Dialect::Postgres));
    let service = start(&store, options(2, 16));

    let before = Utc::now().naive_utc() - ChronoDuration::seconds(1);
    let outcome = service.log_record("orders", 1i64, "update", "svc-a", order(1, "paid"));
    assert_eq!(outcome, SubmitOutcome::Accepted);
    let stats = service.shutdown().await;
    let after = Utc::now().naive_utc() + ChronoDuration::seconds(1);

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        store.table_columns("orders_audit").expect("audit table"),
        vec!["status", "audit_action", "audit_actor", "audit_created_at"]
    );

    let rows = store.rows("orders_audit");
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.len(), 4);
    assert_eq!(column(row, "status"), Some(&SqlValue::Text("paid".to_string())));
    assert_eq!(
        column(row, "audit_action"),
        Some(&SqlValue::Text("update".to_string()))
    );
    assert_eq!(
        column(row, "audit_actor"),
        Some(&SqlValue::Text("svc-a".to_string()))
    );
    match column(row, "audit_created_at") {
        Some(SqlValue::Timestamp(at)) => assert!(*at >= before && *at <= after),
        other => panic!("unexpected audit_created_at: {:?}", other),
    }

    let insert = store
        .statements()
        .into_iter()
        .find(|statement| statement.sql.starts_with("INSERT"))
        .expect("insert statement");
    assert_eq!(
        insert.sql,
        "INSERT INTO \"orders_audit\" \
         (\"status\", \"audit_action\", \"audit_actor\", \"audit_created_at\") \
         VALUES ($1, $2, $3, $4::timestamp)"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_creates_the_table_once() {
    let store = Arc::new(MemoryStore::new(Dialect::Postgres).with_delay(Duration::from_millis(5)));
    let service = start(&store, options(8, 128));

    for id in 0..50i64 {
        assert!(service
            .log_record("orders", id, "create", "svc-a", order(id, "new"))
            .is_accepted());
    }
    let stats = service.shutdown().await;

    assert_eq!(stats.processed, 50);
    assert_eq!(store.create_count("orders_audit"), 1);
    assert_eq!(store.rows("orders_audit").len(), 50);
    assert_eq!(service.schema().known_tables(), vec!["orders_audit".to_string()]);
}

#[tokio::test]
async fn saturated_queue_drops_without_blocking_the_caller() {
    let logs = LogBuffer::default();
    let _capture = logs.capture();
    let store = Arc::new(MemoryStore::new(Dialect::MySql).with_delay(Duration::from_millis(20)));
    let service = start(&store, options(1, 2));

    let outcomes: Vec<SubmitOutcome> = (0..20i64)
        .map(|id| service.log_record("orders", id, "update", "svc-a", order(id, "paid")))
        .collect();

    assert!(outcomes[..2].iter().all(SubmitOutcome::is_accepted));
    assert!(outcomes[2..]
        .iter()
        .all(|outcome| *outcome == SubmitOutcome::Dropped(DropReason::QueueFull)));

    let stats = service.shutdown().await;
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.dropped, 18);
    assert_eq!(stats.processed, 2);
    assert_eq!(store.rows("orders_audit").len(), 2);
    assert_eq!(logs.count("Audit queue full, dropping task"), 18);
    assert!(logs.contents().contains("WARN"));
}

#[tokio::test]
async fn action_labels_are_stored_as_given() {
    let store = Arc::new(MemoryStore::new(Dialect::Postgres));
    let service = start(&store, options(1, 8));

    service.log_record("orders", 1i64, "insert", "svc-a", order(1, "new"));
    service.log_record("orders", 1i64, "UPDATE", "svc-a", order(1, "paid"));
    service.shutdown().await;

    let actions: Vec<SqlValue> = store
        .rows("orders_audit")
        .iter()
        .filter_map(|row| column(row, "audit_action").cloned())
        .collect();
    assert_eq!(
        actions,
        vec![
            SqlValue::Text("insert".to_string()),
            SqlValue::Text("UPDATE".to_string()),
        ]
    );
}

#[tokio::test]
async fn same_record_twice_yields_two_rows() {
    let store = Arc::new(MemoryStore::new(Dialect::MySql));
    let service = start(&store, options(1, 8));

    let record = order(3, "shipped");
    service.log_record("orders", 3i64, "update", "svc-a", record.clone());
    service.log_record("orders", 3i64, "update", "svc-a", record);
    service.shutdown().await;

    let rows = store.rows("orders_audit");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][..3], rows[1][..3]);
    assert_eq!(store.create_count("orders_audit"), 1);
}

#[tokio::test]
async fn snapshot_mirrors_the_source_row() {
    let store = Arc::new(MemoryStore::new(Dialect::Postgres));
    store.seed_source_table(
        "orders",
        vec![
            ColumnSpec::new("id", ColumnKind::Integer).with_sql_type("bigint"),
            ColumnSpec::new("status", ColumnKind::Text).with_sql_type("character varying"),
        ],
    );
    let mut row = ProjectedRow::new();
    row.push("id", ColumnKind::Integer, SqlValue::Int(7)).unwrap();
    row.push("status", ColumnKind::Text, SqlValue::Text("void".to_string()))
        .unwrap();
    store.seed_source_row("orders", RecordId::Int(7), row);

    let service = start(&store, options(2, 8));
    service.log_snapshot("orders", 7i64, "delete", "svc-b");
    service.log_snapshot("orders", 8i64, "delete", "svc-b");
    let stats = service.shutdown().await;

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(
        store.table_columns("orders_audit").expect("audit table"),
        vec!["id", "status", "audit_action", "audit_actor", "audit_created_at"]
    );
    let rows = store.rows("orders_audit");
    assert_eq!(rows.len(), 1);
    assert_eq!(column(&rows[0], "id"), Some(&SqlValue::Int(7)));
    assert_eq!(
        column(&rows[0], "audit_action"),
        Some(&SqlValue::Text("delete".to_string()))
    );
}

#[tokio::test]
async fn snapshot_of_unknown_source_table_creates_nothing() {
    let store = Arc::new(MemoryStore::new(Dialect::Postgres));
    let service = start(&store, options(1, 8));

    service.log_snapshot("ghosts", 1i64, "update", "svc-b");
    let stats = service.shutdown().await;

    assert_eq!(stats.failed, 1);
    assert_eq!(store.create_count("ghosts_audit"), 0);
    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn empty_strings_become_null_when_configured() {
    let store = Arc::new(MemoryStore::new(Dialect::Postgres));
    let service = start(
        &store,
        DispatchOptions {
            policy: ProjectionPolicy {
                empty_string_as_null: true,
                ..ProjectionPolicy::default()
            },
            ..options(1, 8)
        },
    );

    service.log_record("orders", 1i64, "update", "svc-a", order(1, ""));
    service.shutdown().await;

    let rows = store.rows("orders_audit");
    assert_eq!(
        column(&rows[0], "status"),
        Some(&SqlValue::Null(ColumnKind::Text))
    );
}

#[tokio::test]
async fn reset_rechecks_existence_without_recreating() {
    let store = Arc::new(MemoryStore::new(Dialect::Postgres));
    let service = start(&store, options(1, 8));

    service.log_record("orders", 1i64, "create", "svc-a", order(1, "new"));
    // Yield until the first task lands so the reset happens in between.
    while service.stats().processed < 1 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    service.schema().reset();
    assert!(!service.schema().is_known("orders_audit"));

    service.log_record("orders", 1i64, "update", "svc-a", order(1, "paid"));
    service.shutdown().await;

    assert_eq!(store.create_count("orders_audit"), 1);
    assert_eq!(store.rows("orders_audit").len(), 2);
    assert!(service.schema().is_known("orders_audit"));
}

#[tokio::test]
async fn separate_tables_get_separate_audit_tables() {
    let store = Arc::new(MemoryStore::new(Dialect::MySql));
    let service = start(
        &store,
        DispatchOptions {
            table_suffix: "_history".to_string(),
            ..options(2, 8)
        },
    );

    service.log_record("orders", 1i64, "create", "svc-a", order(1, "new"));
    service.log_record("returns", 1i64, "create", "svc-a", order(1, "new"));
    service.shutdown().await;

    assert_eq!(store.create_count("orders_history"), 1);
    assert_eq!(store.create_count("returns_history"), 1);
    assert_eq!(
        service.schema().known_tables(),
        vec!["orders_history".to_string(), "returns_history".to_string()]
    );
}

#[tokio::test]
async fn empty_suffix_is_rejected_when_audit_and_source_share_a_store() {
    let store = Arc::new(MemoryStore::new(Dialect::Postgres));
    let same_store = AuditService::start(
        DispatchOptions {
            table_suffix: String::new(),
            ..options(1, 4)
        },
        Arc::clone(&store) as Arc<dyn AuditStore>,
        Some(Arc::clone(&store) as Arc<dyn SourceStore>),
    );
    assert!(matches!(same_store, Err(AuditError::Construction(_))));

    let source = Arc::new(MemoryStore::new(Dialect::Postgres));
    let separate = AuditService::start(
        DispatchOptions {
            table_suffix: String::new(),
            ..options(1, 4)
        },
        Arc::clone(&store) as Arc<dyn AuditStore>,
        Some(source as Arc<dyn SourceStore>),
    )
    .expect("separate source store");
    assert_eq!(separate.audit_table_name("orders"), "orders");
    separate.shutdown().await;
}
