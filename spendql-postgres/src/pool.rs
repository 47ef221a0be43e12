use crate::connection_error;
use spendql_core::{ConnectionEndpoint, PoolSettings, Result, SpendqlError};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

const APPLICATION_NAME: &str = "spendql";

/// Driver options for `endpoint`. Fails when the endpoint carries no password.
pub fn connect_options(endpoint: &ConnectionEndpoint) -> Result<PgConnectOptions> {
    let options: PgConnectOptions = endpoint
        .connection_uri()?
        .parse()
        .map_err(|e: sqlx::Error| SpendqlError::Config(format!("{endpoint}: {e}")))?;
    Ok(options.application_name(APPLICATION_NAME))
}

/// Build the process-wide pool. Connections are opened on first use.
pub fn create_pool(endpoint: &ConnectionEndpoint, settings: &PoolSettings) -> Result<PgPool> {
    let options = connect_options(endpoint)?;
    tracing::info!(
        endpoint = %endpoint,
        max_connections = settings.max_connections,
        "creating connection pool"
    );
    Ok(PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_lazy_with(options))
}

/// Open the pool's first connection now, surfacing bad credentials early.
pub async fn warm_up(pool: &PgPool) -> Result<()> {
    pool.acquire().await.map_err(connection_error)?;
    Ok(())
}
