//! Caller-facing handle that splits reads from writes.
//!
//! Many [`RwRouter`] handles can share one [`ConnectionPool`]. Each handle keeps its
//! own `sticky` policy and `modified` flag: once a handle has written at least one
//! row, its reads go to the writer for as long as the handle lives, so the caller
//! never reads its own write back from a lagging replica. A handle obtained with
//! [`RwRouter::new_handle`] (or `clone`) shares the pool but starts unmodified.

mod options;

pub use options::{RouterBuilder, RouterOptions};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use options::ConnLimits;

use crate::connection::{Connection, Driver};
use crate::context::Context;
use crate::error::SqlRouterError;
use crate::pool::ConnectionPool;
use crate::results::{ResultSet, Row};
use crate::statement::RwStatement;
use crate::types::{ExecResult, RowValues};

type ConnOf<D> = <D as Driver>::Conn;
type StatementOf<D> = <ConnOf<D> as Connection>::Statement;
type TransactionOf<D> = <ConnOf<D> as Connection>::Transaction;

/// State shared by every handle cloned from the same router.
struct Shared<D: Driver> {
    driver: D,
    pool: Arc<ConnectionPool<D::Conn>>,
    limits: Mutex<ConnLimits>,
}

impl<D: Driver> Shared<D> {
    fn limits(&self) -> MutexGuard<'_, ConnLimits> {
        match self.limits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // Limits are applied and the slot filled under the limits lock, so a concurrent
    // setter either sees the new connection in the pool or the connection sees the
    // new limit.
    fn add_reader(&self, conn: D::Conn) -> usize {
        let limits = self.limits();
        limits.apply(&conn);
        self.pool.add_reader(Arc::new(conn))
    }

    fn add_writer(&self, conn: D::Conn) {
        let limits = self.limits();
        limits.apply(&conn);
        self.pool.add_writer(Arc::new(conn));
    }

    async fn open_reader(self: Arc<Self>, descriptor: String) {
        match self.driver.open(&descriptor).await {
            Ok(conn) => {
                let index = self.add_reader(conn);
                tracing::debug!(driver = self.driver.name(), index, "reader opened");
            }
            Err(err) => {
                // A missing replica only costs read capacity; the writer is enough to serve.
                tracing::warn!(
                    driver = self.driver.name(),
                    error = %err,
                    "reader failed to open, leaving it out of rotation"
                );
            }
        }
    }
}

pub struct RwRouter<D: Driver> {
    shared: Arc<Shared<D>>,
    sticky: AtomicBool,
    modified: AtomicBool,
}

impl<D: Driver> fmt::Debug for RwRouter<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwRouter")
            .field("driver", &self.shared.driver.name())
            .field("pool", &self.shared.pool)
            .field("sticky", &self.is_sticky())
            .field("modified", &self.is_modified())
            .finish()
    }
}

impl<D: Driver> Clone for RwRouter<D> {
    /// Same as [`RwRouter::new_handle`]: the clone starts unmodified.
    fn clone(&self) -> Self {
        self.new_handle()
    }
}

impl<D: Driver> RwRouter<D> {
    /// Open a router with default options.
    ///
    /// The first descriptor is opened before returning and becomes the writer. The
    /// remaining descriptors are opened in background tasks and join the pool as
    /// readers when (and if) they succeed.
    ///
    /// # Errors
    ///
    /// `NoDataSource` without descriptors, `WriterOpenFailed` if the writer cannot be opened.
    pub async fn open<S: AsRef<str>>(driver: D, descriptors: &[S]) -> Result<Self, SqlRouterError> {
        RouterBuilder::new(driver, descriptors).open().await
    }

    #[must_use]
    pub fn builder<S: AsRef<str>>(driver: D, descriptors: &[S]) -> RouterBuilder<D> {
        RouterBuilder::new(driver, descriptors)
    }

    pub(crate) async fn open_with_options(
        driver: D,
        descriptors: &[String],
        opts: RouterOptions,
    ) -> Result<Self, SqlRouterError> {
        let (writer_source, reader_sources) = descriptors
            .split_first()
            .ok_or(SqlRouterError::NoDataSource)?;

        let writer = driver
            .open(writer_source)
            .await
            .map_err(|err| SqlRouterError::WriterOpenFailed(Box::new(err)))?;

        let shared = Arc::new(Shared {
            driver,
            pool: Arc::new(ConnectionPool::new()),
            limits: Mutex::new(ConnLimits::from_options(&opts)),
        });
        shared.add_writer(writer);
        tracing::debug!(
            driver = shared.driver.name(),
            readers = reader_sources.len(),
            "writer opened"
        );

        for source in reader_sources {
            tokio::spawn(Arc::clone(&shared).open_reader(source.clone()));
        }

        Ok(Self::from_shared(shared, opts.sticky))
    }

    /// A router over an existing pool, with default options.
    #[must_use]
    pub fn with_pool(driver: D, pool: Arc<ConnectionPool<D::Conn>>) -> Self {
        let shared = Arc::new(Shared {
            driver,
            pool,
            limits: Mutex::new(ConnLimits::default()),
        });
        Self::from_shared(shared, true)
    }

    fn from_shared(shared: Arc<Shared<D>>, sticky: bool) -> Self {
        Self {
            shared,
            sticky: AtomicBool::new(sticky),
            modified: AtomicBool::new(false),
        }
    }

    /// A handle sharing this router's pool and sticky policy, with a fresh `modified` flag.
    #[must_use]
    pub fn new_handle(&self) -> Self {
        Self::from_shared(Arc::clone(&self.shared), self.is_sticky())
    }

    pub fn set_sticky(&self, sticky: bool) {
        self.sticky.store(sticky, Ordering::Release);
    }

    #[must_use]
    pub fn is_sticky(&self) -> bool {
        self.sticky.load(Ordering::Acquire)
    }

    /// True once this handle has executed a write that changed at least one row.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    /// The driver every connection was opened with.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.shared.driver
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool<D::Conn>> {
        &self.shared.pool
    }

    /// The connection the next read on this handle goes to.
    ///
    /// The writer when this handle is sticky and modified, or when the pool has no
    /// reader slots at all; otherwise the next reader in rotation.
    ///
    /// # Errors
    ///
    /// `NoWriterAvailable` / `NoReaderAvailable` from the pool; never retried here.
    pub fn route(&self) -> Result<Arc<D::Conn>, SqlRouterError> {
        let pool = &self.shared.pool;
        if self.is_sticky() && self.is_modified() {
            return pool.writer();
        }
        if !pool.has_reader_slots() {
            return pool.writer();
        }
        pool.reader()
    }

    /// Open another data source and add it as a reader, applying remembered limits.
    ///
    /// # Errors
    ///
    /// Whatever the driver reports for `descriptor`.
    pub async fn open_reader(&self, descriptor: &str) -> Result<usize, SqlRouterError> {
        let conn = self.shared.driver.open(descriptor).await?;
        Ok(self.shared.add_reader(conn))
    }

    /// Open a data source and promote it to writer; the current writer becomes a reader.
    ///
    /// # Errors
    ///
    /// Whatever the driver reports for `descriptor`.
    pub async fn open_writer(&self, descriptor: &str) -> Result<(), SqlRouterError> {
        let conn = self.shared.driver.open(descriptor).await?;
        self.shared.add_writer(conn);
        Ok(())
    }

    /// Execute a statement on the writer with a background context.
    ///
    /// # Errors
    ///
    /// See [`RwRouter::execute_with`].
    pub async fn execute(
        &self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlRouterError> {
        self.execute_with(&Context::background(), query, params).await
    }

    /// Execute a statement on the writer. A write that changes rows marks this handle
    /// as modified; a write that changes nothing does not.
    ///
    /// # Errors
    ///
    /// `NoWriterAvailable`, or the connection's own error.
    pub async fn execute_with(
        &self,
        ctx: &Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlRouterError> {
        let writer = self.shared.pool.writer()?;
        let result = writer.execute(ctx, query, params).await?;
        if result.rows_affected > 0 && !self.modified.swap(true, Ordering::AcqRel) {
            tracing::debug!(rows = result.rows_affected, "handle modified, reads now stick to writer");
        }
        Ok(result)
    }

    /// # Errors
    ///
    /// See [`RwRouter::query_with`].
    pub async fn query(&self, query: &str, params: &[RowValues]) -> Result<ResultSet, SqlRouterError> {
        self.query_with(&Context::background(), query, params).await
    }

    /// Run a query on the connection picked by [`RwRouter::route`].
    ///
    /// # Errors
    ///
    /// The routing failure, or the connection's own error.
    pub async fn query_with(
        &self,
        ctx: &Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlRouterError> {
        let conn = self.route()?;
        conn.query(ctx, query, params).await
    }

    pub async fn query_row(&self, query: &str, params: &[RowValues]) -> Row {
        self.query_row_with(&Context::background(), query, params).await
    }

    /// Like [`RwRouter::query_with`] for one row. A routing failure is stored in the
    /// returned [`Row`] and raised by [`Row::scan`].
    pub async fn query_row_with(&self, ctx: &Context, query: &str, params: &[RowValues]) -> Row {
        match self.route() {
            Ok(conn) => conn.query_row(ctx, query, params).await,
            Err(err) => Row::from_error(err),
        }
    }

    /// # Errors
    ///
    /// See [`RwRouter::prepare_with`].
    pub async fn prepare(&self, query: &str) -> Result<RwStatement<StatementOf<D>>, SqlRouterError> {
        self.prepare_with(&Context::background(), query).await
    }

    /// Prepare `query` on the writer, and in the background on a reader too.
    ///
    /// The statement is usable as soon as this returns. Until the reader-side
    /// prepare lands (it may never, if it fails), queries run on the writer handle.
    ///
    /// # Errors
    ///
    /// `NoWriterAvailable`, or the writer's prepare error.
    pub async fn prepare_with(
        &self,
        ctx: &Context,
        query: &str,
    ) -> Result<RwStatement<StatementOf<D>>, SqlRouterError> {
        let pool = &self.shared.pool;
        let writer = pool.writer()?;
        let stmt = RwStatement::new(writer.prepare(ctx, query).await?);

        if pool.has_reader_slots() {
            let pending = stmt.clone();
            let pool = Arc::clone(pool);
            let ctx = ctx.clone();
            let query = query.to_string();
            tokio::spawn(async move {
                let reader = match pool.reader() {
                    Ok(reader) => reader,
                    Err(err) => {
                        tracing::debug!(error = %err, "no reader for statement, writer handle only");
                        return;
                    }
                };
                match reader.prepare(&ctx, &query).await {
                    Ok(read_stmt) => pending.attach_reader(read_stmt).await,
                    Err(err) => {
                        tracing::warn!(error = %err, "reader prepare failed, writer handle only");
                    }
                }
            });
        }

        Ok(stmt)
    }

    /// # Errors
    ///
    /// See [`RwRouter::begin_with`].
    pub async fn begin(&self) -> Result<TransactionOf<D>, SqlRouterError> {
        self.begin_with(&Context::background()).await
    }

    /// Start a transaction on the writer; transactions almost always write.
    ///
    /// # Errors
    ///
    /// `NoWriterAvailable`, or the connection's own error.
    pub async fn begin_with(&self, ctx: &Context) -> Result<TransactionOf<D>, SqlRouterError> {
        let writer = self.shared.pool.writer()?;
        writer.begin(ctx).await
    }

    /// # Errors
    ///
    /// See [`RwRouter::ping_with`].
    pub async fn ping(&self) -> Result<(), SqlRouterError> {
        self.ping_with(&Context::background()).await
    }

    /// Ping every populated connection concurrently.
    ///
    /// # Errors
    ///
    /// The first ping failure; every ping is still awaited.
    pub async fn ping_with(&self, ctx: &Context) -> Result<(), SqlRouterError> {
        self.shared
            .pool
            .fan_out(|conn| {
                let ctx = ctx.clone();
                async move { conn.ping(&ctx).await }
            })
            .await
    }

    /// Close every populated connection concurrently.
    ///
    /// # Errors
    ///
    /// The first close failure; every close is still attempted.
    pub async fn close(&self) -> Result<(), SqlRouterError> {
        self.shared
            .pool
            .fan_out(|conn| async move { conn.close().await })
            .await
    }

    /// Set the idle limit on every connection, including readers that join later.
    ///
    /// Applied synchronously to each populated connection in turn, under the same
    /// lock that admits new readers.
    pub fn set_max_idle_conns(&self, n: usize) {
        let mut limits = self.shared.limits();
        limits.max_idle = Some(n);
        self.shared.pool.for_each_populated(|conn| conn.set_max_idle_conns(n));
    }

    /// Set the open-connection limit on every connection, including readers that join later.
    ///
    /// Applied synchronously to each populated connection in turn, under the same
    /// lock that admits new readers.
    pub fn set_max_open_conns(&self, n: usize) {
        let mut limits = self.shared.limits();
        limits.max_open = Some(n);
        self.shared.pool.for_each_populated(|conn| conn.set_max_open_conns(n));
    }

    /// Set the maximum connection lifetime everywhere; `None` means unlimited.
    ///
    /// Applied synchronously to each populated connection in turn, under the same
    /// lock that admits new readers.
    pub fn set_conn_max_lifetime(&self, lifetime: Option<Duration>) {
        let mut limits = self.shared.limits();
        limits.max_lifetime = Some(lifetime);
        self.shared
            .pool
            .for_each_populated(|conn| conn.set_conn_max_lifetime(lifetime));
    }
}
