use spendql_core::{with_execution_context, DefaultRole, Result, SessionFactory, Settings};
use spendql_graphlette::{create_schema, Schema};
use spendql_postgres::{create_pool, warm_up, PostgresIntrospector, PostgresSessionFactory};
use std::sync::Arc;

/// Process-scoped state: the schema built at startup, the pool sessions are
/// drawn from and the role every request assumes.
pub struct App {
    schema: Schema,
    factory: Arc<dyn SessionFactory>,
    role: DefaultRole,
}

impl App {
    pub fn new(schema: Schema, factory: Arc<dyn SessionFactory>, role: DefaultRole) -> Self {
        Self {
            schema,
            factory,
            role,
        }
    }

    /// Introspect over a dedicated connection, build the schema, then open the pool.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        tracing::info!(endpoint = %settings.endpoint, schemas = ?settings.schemas, "initializing");
        let introspector = PostgresIntrospector::connect(&settings.endpoint)?;
        let schema = create_schema(&introspector, &settings.schemas).await?;

        let pool = create_pool(&settings.endpoint, &settings.pool)?;
        warm_up(&pool).await?;

        Ok(Self::new(
            schema,
            Arc::new(PostgresSessionFactory::new(pool)),
            settings.default_role.clone(),
        ))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn role(&self) -> &DefaultRole {
        &self.role
    }

    /// Run one GraphQL request in its own session.
    ///
    /// Field errors stay inside the returned response; only failures to open
    /// or finish the session are returned as `Err`.
    pub async fn execute(&self, request: async_graphql::Request) -> Result<async_graphql::Response> {
        let schema = &self.schema;
        with_execution_context(self.factory.as_ref(), &self.role, |session| async move {
            Ok(spendql_graphlette::execute(schema, session, request).await)
        })
        .await
    }

    /// Stop handing out sessions and wait for checked-out connections.
    pub async fn close(&self) {
        self.factory.close().await;
    }
}
