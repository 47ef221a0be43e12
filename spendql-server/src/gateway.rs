use crate::App;
use spendql_core::{Result, Settings, SpendqlError};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Ready,
    Draining,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Ready => "ready",
            Phase::Draining => "draining",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Readiness {
    Starting,
    Ready(Arc<App>),
    Draining,
}

impl Readiness {
    fn phase(&self) -> Phase {
        match self {
            Readiness::Starting => Phase::Starting,
            Readiness::Ready(_) => Phase::Ready,
            Readiness::Draining => Phase::Draining,
        }
    }
}

/// Readiness gate in front of the [`App`].
///
/// Requests arriving before the app is installed or after shutdown began are
/// rejected with [`SpendqlError::NotReady`] instead of waiting.
pub struct Gateway {
    state: RwLock<Readiness>,
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Readiness::Starting),
        }
    }

    /// Connect with `settings` and return a gateway that is already ready.
    pub async fn initialize(settings: &Settings) -> Result<Self> {
        let gateway = Self::new();
        gateway.install(App::connect(settings).await?).await?;
        Ok(gateway)
    }

    /// Move from `Starting` to `Ready`.
    pub async fn install(&self, app: App) -> Result<()> {
        let mut state = self.state.write().await;
        match state.phase() {
            Phase::Starting => {
                tracing::info!(role = %app.role(), "ready");
                *state = Readiness::Ready(Arc::new(app));
                Ok(())
            }
            Phase::Ready => {
                Err(SpendqlError::Config("an app is already installed".to_string()))
            }
            Phase::Draining => {
                drop(state);
                app.close().await;
                Err(SpendqlError::NotReady("gateway is draining".to_string()))
            }
        }
    }

    pub async fn phase(&self) -> Phase {
        self.state.read().await.phase()
    }

    pub async fn is_ready(&self) -> bool {
        self.phase().await == Phase::Ready
    }

    async fn app(&self) -> Result<Arc<App>> {
        match &*self.state.read().await {
            Readiness::Ready(app) => Ok(Arc::clone(app)),
            Readiness::Starting => Err(SpendqlError::NotReady(
                "schema is still being built".to_string(),
            )),
            Readiness::Draining => Err(SpendqlError::NotReady("gateway is draining".to_string())),
        }
    }

    pub async fn execute(&self, request: async_graphql::Request) -> Result<async_graphql::Response> {
        let app = self.app().await?;
        app.execute(request).await
    }

    /// Refuse new requests, then close the pool once in-flight sessions return it.
    pub async fn shutdown(&self) {
        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, Readiness::Draining)
        };
        if let Readiness::Ready(app) = previous {
            tracing::info!("draining");
            app.close().await;
            tracing::info!("drained");
        }
    }
}

