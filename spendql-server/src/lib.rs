mod app;
mod gateway;
mod router;

pub use app::App;
pub use gateway::{Gateway, Phase};
pub use router::build_router;

use spendql_core::Settings;
use std::sync::Arc;

/// Serve on `settings.http_port` while the app initializes behind the gateway.
///
/// `/health` answers 503 until the schema is built. A failed initialization
/// stops the server.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let port = settings.http_port;
    let gateway = Arc::new(Gateway::new());
    let router = build_router(Arc::clone(&gateway));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "spendql listening");
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    let app = match App::connect(&settings).await {
        Ok(app) => app,
        Err(e) => {
            server.abort();
            return Err(anyhow::anyhow!("initialization failed: {e}"));
        }
    };
    gateway.install(app).await?;

    server.await??;
    gateway.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
