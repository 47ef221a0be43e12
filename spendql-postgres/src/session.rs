use crate::query::{self, Param, SqlQuery};
use crate::{connection_error, storage_error};
use async_trait::async_trait;
use spendql_core::{
    DefaultRole, Result, Searcher, Selection, Session, SessionFactory, SpendqlError, Stash, Table,
};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::sync::Mutex;

/// Hands out one transaction per request, each running as the requested role.
#[derive(Clone)]
pub struct PostgresSessionFactory {
    pool: PgPool,
}

impl PostgresSessionFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionFactory for PostgresSessionFactory {
    async fn begin(&self, role: &DefaultRole) -> Result<std::sync::Arc<dyn Session>> {
        let mut tx = self.pool.begin().await.map_err(connection_error)?;
        // Transaction-local, so the role goes away when the connection returns to the pool.
        sqlx::query("SELECT set_config('role', $1, true)")
            .bind(role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                SpendqlError::Authentication(format!("cannot assume role {role:?}: {e}"))
            })?;
        Ok(std::sync::Arc::new(PostgresSession {
            tx: Mutex::new(Some(tx)),
            role: role.clone(),
        }))
    }

    async fn close(&self) {
        tracing::info!(
            idle = self.pool.num_idle(),
            size = self.pool.size(),
            "draining connection pool"
        );
        self.pool.close().await;
    }
}

/// A transaction that is rolled back on drop unless committed.
pub struct PostgresSession {
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
    role: DefaultRole,
}

fn bind<'q>(q: &'q SqlQuery) -> Query<'q, Postgres, PgArguments> {
    let mut out = sqlx::query(&q.sql);
    for param in &q.params {
        out = match param {
            Param::Json(v) => out.bind(Json(v.clone())),
            Param::Int(n) => out.bind(*n),
            Param::Text(s) => out.bind(s.as_str()),
        };
    }
    out
}

impl PostgresSession {
    async fn fetch_all(&self, q: &SqlQuery) -> Result<Vec<PgRow>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        tracing::debug!(sql = %q.sql, "query");
        bind(q).fetch_all(&mut **tx).await.map_err(storage_error)
    }

    async fn fetch_one(&self, q: &SqlQuery) -> Result<PgRow> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        tracing::debug!(sql = %q.sql, "query");
        bind(q).fetch_one(&mut **tx).await.map_err(storage_error)
    }

    /// `int8` and `numeric` columns arrive as strings, so no value passes through `f64`.
    fn row_to_stash(row: &PgRow) -> Result<Stash> {
        let value: serde_json::Value = row.try_get("row_json").map_err(storage_error)?;
        match value {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(SpendqlError::Parse(format!("expected a row object, got {other}"))),
        }
    }
}

fn finished() -> SpendqlError {
    SpendqlError::Execution("session already finished".to_string())
}

#[async_trait]
impl Searcher for PostgresSession {
    async fn find(&self, table: &Table, condition: &Stash) -> Result<Option<Stash>> {
        let selection = Selection {
            condition: condition.clone(),
            first: Some(1),
            ..Selection::default()
        };
        let q = query::select(table, &selection)?;
        let rows = self.fetch_all(&q).await?;
        rows.first().map(Self::row_to_stash).transpose()
    }

    async fn find_all(&self, table: &Table, selection: &Selection) -> Result<Vec<Stash>> {
        let q = query::select(table, selection)?;
        let rows = self.fetch_all(&q).await?;
        rows.iter().map(Self::row_to_stash).collect()
    }

    async fn count(&self, table: &Table, condition: &Stash) -> Result<i64> {
        let q = query::count(table, condition)?;
        let row = self.fetch_one(&q).await?;
        row.try_get("total").map_err(storage_error)
    }
}

#[async_trait]
impl Session for PostgresSession {
    fn role(&self) -> &DefaultRole {
        &self.role
    }

    async fn commit(&self) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.commit().await.map_err(storage_error)
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.rollback().await.map_err(storage_error)
    }
}
