use serde_json::{json, Value};
use spendql_core::testing::{self as cert, FIXTURE_SQL};
use spendql_core::{
    testing::fixture_catalog, with_execution_context, ColumnType, ConnectionEndpoint,
    DefaultRole, Selection, SessionFactory, SpendqlError, Stash, Table,
};
use spendql_postgres::{create_pool, PostgresSessionFactory};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;

async fn create_factory() -> (PostgresSessionFactory, impl std::any::Any) {
    let container = Postgres::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let endpoint =
        ConnectionEndpoint::new("postgres", Some("postgres"), "127.0.0.1", port, "postgres")
            .unwrap();
    let pool = create_pool(&endpoint, &Default::default()).unwrap();
    sqlx::raw_sql(FIXTURE_SQL).execute(&pool).await.unwrap();
    (PostgresSessionFactory::new(pool), container)
}

fn postgres() -> DefaultRole {
    DefaultRole::new("postgres")
}

fn stash(value: Value) -> Stash {
    value.as_object().cloned().unwrap_or_default()
}

async fn current_user(pool: &PgPool) -> String {
    sqlx::query_scalar::<_, String>("SELECT current_user::text")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn passes_searcher_certification() {
    let (factory, _c) = create_factory().await;
    let session = factory.begin(&postgres()).await.unwrap();
    cert::test_searcher_find_by_primary_key(session.as_ref()).await;
    cert::test_searcher_find_missing_returns_none(session.as_ref()).await;
    cert::test_searcher_find_all_with_condition(session.as_ref()).await;
    cert::test_searcher_condition_on_numeric_column(session.as_ref()).await;
    cert::test_searcher_empty_condition_returns_everything(session.as_ref()).await;
    cert::test_searcher_orders_and_paginates(session.as_ref()).await;
    cert::test_searcher_nulls_sort_last(session.as_ref()).await;
    cert::test_searcher_counts(session.as_ref()).await;
    cert::test_searcher_preserves_json_dates_and_decimals(session.as_ref()).await;
    session.commit().await.unwrap();
}

#[tokio::test]
async fn big_numbers_round_trip_exactly() {
    let (factory, _c) = create_factory().await;
    sqlx::raw_sql(
        "CREATE TABLE ledger (
             id INTEGER PRIMARY KEY,
             seq BIGINT NOT NULL,
             amount NUMERIC NOT NULL
         );
         INSERT INTO ledger VALUES
             (1, 9007199254740993, 12345678901234567.89),
             (2, 2, 0.1000000000000000055511151231257827);",
    )
    .execute(factory.pool())
    .await
    .unwrap();
    let ledger = Table::new("public", "ledger")
        .column("id", ColumnType::Int, false)
        .column("seq", ColumnType::BigInt, false)
        .column("amount", ColumnType::BigFloat, false)
        .primary_key(&["id"]);

    let session = factory.begin(&postgres()).await.unwrap();
    let found = session
        .find(&ledger, &stash(json!({"amount": "12345678901234567.89"})))
        .await
        .unwrap()
        .expect("the large amount should match its own row");
    assert_eq!(found.get("id").unwrap(), &json!(1));
    assert_eq!(found.get("seq").unwrap(), &json!("9007199254740993"));
    assert_eq!(found.get("amount").unwrap(), &json!("12345678901234567.89"));

    let found = session
        .find(
            &ledger,
            &stash(json!({"amount": "0.1000000000000000055511151231257827"})),
        )
        .await
        .unwrap()
        .expect("the precise amount should match its own row");
    assert_eq!(
        found.get("amount").unwrap(),
        &json!("0.1000000000000000055511151231257827")
    );

    let count = |condition: Value| {
        let session = std::sync::Arc::clone(&session);
        let ledger = ledger.clone();
        async move { session.count(&ledger, &stash(condition)).await.unwrap() }
    };
    assert_eq!(count(json!({"amount": "0.1"})).await, 0);
    assert_eq!(count(json!({"seq": "9007199254740993"})).await, 1);
    assert_eq!(count(json!({"seq": "9007199254740992"})).await, 0);
    session.commit().await.unwrap();
}

#[tokio::test]
async fn timestamps_match_any_offset_spelling() {
    let (factory, _c) = create_factory().await;
    sqlx::raw_sql(
        "CREATE TABLE payment (
             id INTEGER PRIMARY KEY,
             paid_at TIMESTAMPTZ NOT NULL,
             due_on DATE NOT NULL
         );
         INSERT INTO payment VALUES (1, '2024-03-02 10:00:00+00', '2024-03-31');",
    )
    .execute(factory.pool())
    .await
    .unwrap();
    let payment = Table::new("public", "payment")
        .column("id", ColumnType::Int, false)
        .column("paid_at", ColumnType::Datetime, false)
        .column("due_on", ColumnType::Date, false)
        .primary_key(&["id"]);

    let session = factory.begin(&postgres()).await.unwrap();
    for spelling in [
        "2024-03-02T10:00:00Z",
        "2024-03-02T10:00:00+00:00",
        "2024-03-02T12:00:00+02:00",
    ] {
        let found = session
            .find(&payment, &stash(json!({"paid_at": spelling})))
            .await
            .unwrap();
        assert!(found.is_some(), "{spelling} should match");
    }
    assert_eq!(
        session
            .count(&payment, &stash(json!({"due_on": "2024-03-31"})))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        session
            .count(&payment, &stash(json!({"paid_at": "2024-03-02T10:00:01Z"})))
            .await
            .unwrap(),
        0
    );
    session.commit().await.unwrap();
}

#[tokio::test]
async fn sessions_run_as_the_requested_role() {
    let (factory, _c) = create_factory().await;
    sqlx::raw_sql(
        "CREATE ROLE viewer NOLOGIN;
         GRANT SELECT ON category TO viewer;
         CREATE ROLE outsider NOLOGIN;",
    )
    .execute(factory.pool())
    .await
    .unwrap();
    let category = fixture_catalog().table("public", "category").cloned().unwrap();

    let viewer = factory.begin(&DefaultRole::new("viewer")).await.unwrap();
    assert_eq!(viewer.role().as_str(), "viewer");
    let rows = viewer.find_all(&category, &Selection::default()).await.unwrap();
    assert_eq!(rows.len(), 3);
    viewer.commit().await.unwrap();

    let outsider = factory.begin(&DefaultRole::new("outsider")).await.unwrap();
    let err = outsider
        .find_all(&category, &Selection::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SpendqlError::Storage(_)), "{err:?}");
    outsider.rollback().await.unwrap();

    // The role was transaction-local; pooled connections come back clean.
    assert_eq!(current_user(factory.pool()).await, "postgres");
}

#[tokio::test]
async fn unknown_role_is_an_authentication_error() {
    let (factory, _c) = create_factory().await;
    let err = factory
        .begin(&DefaultRole::new("nobody_here"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SpendqlError::Authentication(_)), "{err:?}");
}

#[tokio::test]
async fn execution_context_commits_and_rolls_back() {
    let (factory, _c) = create_factory().await;
    let total = with_execution_context(&factory, &postgres(), |session| async move {
        let expense = fixture_catalog().table("public", "expense").cloned().unwrap();
        session.count(&expense, &Default::default()).await
    })
    .await
    .unwrap();
    assert_eq!(total, 4);

    let failed: spendql_core::Result<()> =
        with_execution_context(&factory, &postgres(), |_session| async move {
            Err(SpendqlError::Execution("resolver failed".to_string()))
        })
        .await;
    assert!(failed.is_err());
}

#[tokio::test]
async fn finished_sessions_refuse_queries() {
    let (factory, _c) = create_factory().await;
    let session = factory.begin(&postgres()).await.unwrap();
    session.commit().await.unwrap();
    let category = fixture_catalog().table("public", "category").cloned().unwrap();
    let err = session
        .find_all(&category, &Selection::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SpendqlError::Execution(_)));
    assert!(session.commit().await.is_err());
}

#[tokio::test]
async fn closing_the_factory_drains_the_pool() {
    let (factory, _c) = create_factory().await;
    factory.close().await;
    assert!(factory.pool().is_closed());
    assert!(factory.begin(&postgres()).await.is_err());
}
