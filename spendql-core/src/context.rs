use crate::{DefaultRole, Result, Session, SessionFactory};
use std::future::Future;
use std::sync::Arc;

/// Run `work` inside a fresh session bound to `role`.
///
/// The session commits when `work` succeeds and rolls back when it fails.
/// If the commit itself fails, that error is returned instead of the result.
pub async fn with_execution_context<F, Fut, T>(
    factory: &dyn SessionFactory,
    role: &DefaultRole,
    work: F,
) -> Result<T>
where
    F: FnOnce(Arc<dyn Session>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = factory.begin(role).await?;
    match work(Arc::clone(&session)).await {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = session.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}
