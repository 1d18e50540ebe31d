//! Cancellation and deadline carrier handed to every blocking operation.
//!
//! The router never enforces a timeout of its own. A [`Context`] is passed
//! through untouched to the connection capability, which decides how to honour
//! it (most implementations simply wrap their work in [`Context::run`]).

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::SqlRouterError;

#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Context {
    /// A context with no deadline that is only cancelled explicitly.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: CancellationToken::new(),
        }
    }

    /// Derive a context that shares this one's cancellation but has a tighter deadline.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(current) if current < candidate => current,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            token: self.token.child_token(),
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and every clone or child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancelled or past the deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Error describing why the context is done, if it is.
    #[must_use]
    pub fn err(&self) -> Option<SqlRouterError> {
        if self.is_cancelled() {
            Some(SqlRouterError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(SqlRouterError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Drive `fut` to completion unless the context is cancelled or its deadline passes first.
    ///
    /// # Errors
    ///
    /// Returns `SqlRouterError::Cancelled` or `SqlRouterError::DeadlineExceeded` when the
    /// context finishes before `fut`; otherwise whatever `fut` yields.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, SqlRouterError>
    where
        F: Future<Output = Result<T, SqlRouterError>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => Err(SqlRouterError::Cancelled),
                    res = tokio::time::timeout_at(deadline.into(), fut) => {
                        res.unwrap_or(Err(SqlRouterError::DeadlineExceeded))
                    }
                }
            }
            None => {
                tokio::select! {
                    () = self.token.cancelled() => Err(SqlRouterError::Cancelled),
                    res = fut => res,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_deadline_exceeded_for_slow_work() {
        let ctx = Context::with_timeout(Duration::from_millis(5));
        let res: Result<(), _> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(SqlRouterError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn cancel_reaches_clones_and_children() {
        let ctx = Context::background();
        let clone = ctx.clone();
        let child = ctx.child_with_timeout(Duration::from_secs(60));
        ctx.cancel();
        assert!(clone.is_cancelled());
        assert!(child.is_done());
        let res = child.run(async { Ok(1) }).await;
        assert!(matches!(res, Err(SqlRouterError::Cancelled)));
    }

    #[test]
    fn child_keeps_the_tighter_deadline() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());
        assert!(Context::background().remaining().is_none());
    }
}
