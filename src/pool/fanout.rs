use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;

use super::ConnectionPool;
use crate::error::SqlRouterError;

impl<C: Send + Sync + 'static> ConnectionPool<C> {
    /// Run `op` against every populated slot concurrently.
    ///
    /// All spawned operations are awaited, even after one fails; the first failure
    /// to complete is returned.
    ///
    /// # Errors
    ///
    /// The first error reported by `op`, or a `ConnectionError` if a task panicked.
    pub async fn fan_out<F, Fut>(&self, op: F) -> Result<(), SqlRouterError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<(), SqlRouterError>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for conn in self.populated() {
            tasks.spawn(op(conn));
        }

        let mut first_err = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(SqlRouterError::from).and_then(|res| res);
            if let Err(err) = outcome {
                if first_err.is_none() {
                    first_err = Some(err);
                } else {
                    tracing::warn!(error = %err, "fan-out: additional failure dropped");
                }
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Apply a synchronous setter to every populated slot, one after another.
    ///
    /// Setters only record a limit on the connection, so there is nothing to overlap.
    pub fn for_each_populated(&self, op: impl Fn(&C)) {
        for conn in self.populated() {
            op(&conn);
        }
    }
}
