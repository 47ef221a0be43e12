use cucumber::World as _;
use cucumber::writer::Stats as _;
#[allow(unused_imports)]
use spendql_cert::steps::spend;
use spendql_cert::CertWorld;
use spendql_core::testing::FIXTURE_SQL;
use spendql_core::Settings;
use spendql_server::{build_router, Gateway};
use std::collections::HashMap;
use std::sync::Arc;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;

async fn load_fixture(settings: &Settings) {
    let uri = settings.endpoint.connection_uri().unwrap();
    let pool = sqlx::PgPool::connect(uri).await.unwrap();
    sqlx::raw_sql(FIXTURE_SQL).execute(&pool).await.unwrap();
    pool.close().await;
}

async fn serve(gateway: Arc<Gateway>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(gateway)).await.unwrap();
    });
    format!("http://127.0.0.1:{}", addr.port())
}

#[tokio::main]
async fn main() {
    let container = Postgres::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();

    let env: HashMap<&str, String> = HashMap::from([
        ("PGHOST", "127.0.0.1".to_string()),
        ("PGPORT", port.to_string()),
        ("PGDATABASE", "postgres".to_string()),
        ("PGPASSWORD", "postgres".to_string()),
    ]);
    let settings = Settings::from_lookup(|key| env.get(key).cloned()).unwrap();
    load_fixture(&settings).await;

    let gateway = Arc::new(Gateway::initialize(&settings).await.unwrap());
    let addr = serve(Arc::clone(&gateway)).await;

    let summary = CertWorld::cucumber()
        .before(move |_feature, _rule, _scenario, world| {
            let addr = addr.clone();
            Box::pin(async move {
                world.server_addr = Some(addr);
            })
        })
        .run("../spendql-cert/tests/features/spend.feature")
        .await;

    gateway.shutdown().await;
    assert!(!gateway.is_ready().await);
    drop(container);

    assert!(
        !summary.execution_has_failed(),
        "cucumber scenarios failed"
    );
}
