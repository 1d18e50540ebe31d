use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::connection::Statement;
use crate::context::Context;
use crate::error::SqlRouterError;
use crate::results::{ResultSet, Row};
use crate::types::{ExecResult, RowValues};

const WRITER: usize = 0;
const READER: usize = 1;

struct Handles<S> {
    // [writer] or [writer, reader]; empty only for a default-constructed statement
    stmts: RwLock<Vec<Arc<S>>>,
    closed: AtomicBool,
}

/// A statement prepared on the writer and, once the background prepare lands, on a reader.
///
/// Executions always use the writer handle. Queries use the reader handle when it
/// exists and fall back to the writer handle otherwise. Clones share the same handles.
pub struct RwStatement<S> {
    inner: Arc<Handles<S>>,
}

impl<S> Clone for RwStatement<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Default for RwStatement<S> {
    /// A statement with no handles; every operation fails with `NoStatementExecutable`.
    fn default() -> Self {
        Self {
            inner: Arc::new(Handles {
                stmts: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl<S> fmt::Debug for RwStatement<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwStatement")
            .field("handles", &self.handle_count())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl<S> RwStatement<S> {
    fn read_handles(&self) -> RwLockReadGuard<'_, Vec<Arc<S>>> {
        match self.inner.stmts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_handles(&self) -> RwLockWriteGuard<'_, Vec<Arc<S>>> {
        match self.inner.stmts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.read_handles().len()
    }

    /// True once the reader-side prepare has landed.
    #[must_use]
    pub fn has_reader_handle(&self) -> bool {
        self.handle_count() > READER
    }

    fn writer_handle(&self) -> Result<Arc<S>, SqlRouterError> {
        self.read_handles()
            .get(WRITER)
            .cloned()
            .ok_or(SqlRouterError::NoStatementExecutable)
    }

    fn reader_handle(&self) -> Result<Arc<S>, SqlRouterError> {
        let handles = self.read_handles();
        handles
            .get(READER)
            .or_else(|| handles.get(WRITER))
            .cloned()
            .ok_or(SqlRouterError::NoStatementExecutable)
    }
}

impl<S: Statement> RwStatement<S> {
    pub(crate) fn new(writer: S) -> Self {
        Self {
            inner: Arc::new(Handles {
                stmts: RwLock::new(vec![Arc::new(writer)]),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Attach the reader-side handle. A handle arriving after `close` (or a second
    /// reader handle) is closed instead of attached.
    pub(crate) async fn attach_reader(&self, reader: S) {
        let rejected = {
            let mut handles = self.write_handles();
            if self.inner.closed.load(Ordering::Acquire) || handles.len() != READER {
                Some(reader)
            } else {
                handles.push(Arc::new(reader));
                None
            }
        };

        if let Some(late) = rejected {
            if let Err(err) = late.close().await {
                tracing::debug!(error = %err, "closing late reader statement failed");
            }
        }
    }

    /// # Errors
    ///
    /// See [`RwStatement::execute_with`].
    pub async fn execute(&self, params: &[RowValues]) -> Result<ExecResult, SqlRouterError> {
        self.execute_with(&Context::background(), params).await
    }

    /// Execute on the writer handle.
    ///
    /// # Errors
    ///
    /// `NoStatementExecutable` without handles, or the statement's own error.
    pub async fn execute_with(
        &self,
        ctx: &Context,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlRouterError> {
        let stmt = self.writer_handle()?;
        stmt.execute(ctx, params).await
    }

    /// # Errors
    ///
    /// See [`RwStatement::query_with`].
    pub async fn query(&self, params: &[RowValues]) -> Result<ResultSet, SqlRouterError> {
        self.query_with(&Context::background(), params).await
    }

    /// Query on the reader handle, or the writer handle if there is no reader handle yet.
    ///
    /// # Errors
    ///
    /// `NoStatementExecutable` without handles, or the statement's own error.
    pub async fn query_with(
        &self,
        ctx: &Context,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlRouterError> {
        let stmt = self.reader_handle()?;
        stmt.query(ctx, params).await
    }

    pub async fn query_row(&self, params: &[RowValues]) -> Row {
        self.query_row_with(&Context::background(), params).await
    }

    pub async fn query_row_with(&self, ctx: &Context, params: &[RowValues]) -> Row {
        match self.reader_handle() {
            Ok(stmt) => stmt.query_row(ctx, params).await,
            Err(err) => Row::from_error(err),
        }
    }

    /// Close every handle, continuing past failures.
    ///
    /// # Errors
    ///
    /// The first close failure.
    pub async fn close(&self) -> Result<(), SqlRouterError> {
        let handles = {
            let guard = self.write_handles();
            self.inner.closed.store(true, Ordering::Release);
            guard.to_vec()
        };

        let mut first_err = None;
        for stmt in handles {
            if let Err(err) = stmt.close().await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
