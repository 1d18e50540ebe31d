//! In-process driver for tests, benchmarks and the simulator.
//!
//! Every connection answers a query with one row: the `server` column holds the
//! descriptor of the connection that served it and the `query` column echoes the
//! SQL text. That makes routing decisions directly observable:
//! ```rust
//! use sql_rw_router::memory::MemoryDriver;
//! use sql_rw_router::RwRouter;
//!
//! # tokio_test_block(async {
//! let router = RwRouter::open(MemoryDriver::new(), &["primary"]).await.unwrap();
//! let row = router.query_row("SELECT 1", &[]).await.scan().unwrap();
//! assert_eq!(row.get("server").and_then(|v| v.as_text()), Some("primary"));
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::connection::{Connection, Driver, Statement};
use crate::context::Context;
use crate::error::SqlRouterError;
use crate::results::{ResultSet, Row};
use crate::types::{ExecResult, RowValues};

/// Columns of every result set produced by the memory driver.
pub const SERVER_COLUMN: &str = "server";
pub const QUERY_COLUMN: &str = "query";

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("data source {0} is unreachable")]
    Unreachable(String),
    #[error("ping to {0} failed")]
    PingFailed(String),
    #[error("prepare on {0} failed")]
    PrepareFailed(String),
    #[error("close of {0} failed")]
    CloseFailed(String),
    #[error("connection to {0} is closed")]
    Closed(String),
}

impl From<MemoryError> for SqlRouterError {
    fn from(err: MemoryError) -> Self {
        SqlRouterError::Driver(Box::new(err))
    }
}

/// Counters and applied limits for one descriptor, summed over every connection
/// opened against it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub opens: usize,
    pub executes: usize,
    pub queries: usize,
    pub prepares: usize,
    pub statement_closes: usize,
    pub begins: usize,
    pub pings: usize,
    pub closes: usize,
    pub max_idle_conns: Option<usize>,
    pub max_open_conns: Option<usize>,
    pub conn_max_lifetime: Option<Option<Duration>>,
}

#[derive(Debug, Default)]
struct Behaviour {
    rows_affected: HashMap<String, u64>,
    open_delay: HashMap<String, Duration>,
    prepare_delay: HashMap<String, Duration>,
    fail_open: HashSet<String>,
    fail_ping: HashSet<String>,
    fail_prepare: HashSet<String>,
    fail_close: HashSet<String>,
}

#[derive(Debug, Default)]
struct DriverState {
    behaviour: Mutex<Behaviour>,
    stats: Mutex<HashMap<String, MemoryStats>>,
}

impl DriverState {
    fn behaviour(&self) -> MutexGuard<'_, Behaviour> {
        match self.behaviour.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record<T>(&self, descriptor: &str, f: impl FnOnce(&mut MemoryStats) -> T) -> T {
        let mut stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(stats.entry(descriptor.to_string()).or_default())
    }
}

/// Driver handing out [`MemoryConnection`]s. Clones share behaviour and statistics,
/// so a test can keep one clone while the router owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    state: Arc<DriverState>,
}

impl MemoryDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executing exactly `query` reports `rows` affected rows. Other statements report 0.
    #[must_use]
    pub fn with_rows_affected(self, query: &str, rows: u64) -> Self {
        self.state
            .behaviour()
            .rows_affected
            .insert(query.to_string(), rows);
        self
    }

    #[must_use]
    pub fn with_open_delay(self, descriptor: &str, delay: Duration) -> Self {
        self.state
            .behaviour()
            .open_delay
            .insert(descriptor.to_string(), delay);
        self
    }

    #[must_use]
    pub fn with_prepare_delay(self, descriptor: &str, delay: Duration) -> Self {
        self.state
            .behaviour()
            .prepare_delay
            .insert(descriptor.to_string(), delay);
        self
    }

    #[must_use]
    pub fn with_open_failure(self, descriptor: &str) -> Self {
        self.state.behaviour().fail_open.insert(descriptor.to_string());
        self
    }

    #[must_use]
    pub fn with_ping_failure(self, descriptor: &str) -> Self {
        self.state.behaviour().fail_ping.insert(descriptor.to_string());
        self
    }

    #[must_use]
    pub fn with_prepare_failure(self, descriptor: &str) -> Self {
        self.state
            .behaviour()
            .fail_prepare
            .insert(descriptor.to_string());
        self
    }

    #[must_use]
    pub fn with_close_failure(self, descriptor: &str) -> Self {
        self.state.behaviour().fail_close.insert(descriptor.to_string());
        self
    }

    /// Statistics for `descriptor`; all zero if it was never opened.
    #[must_use]
    pub fn stats(&self, descriptor: &str) -> MemoryStats {
        self.state.record(descriptor, |stats| stats.clone())
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    type Conn = MemoryConnection;

    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self, descriptor: &str) -> Result<MemoryConnection, SqlRouterError> {
        let (delay, fail) = {
            let behaviour = self.state.behaviour();
            (
                behaviour.open_delay.get(descriptor).copied(),
                behaviour.fail_open.contains(descriptor),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(MemoryError::Unreachable(descriptor.to_string()).into());
        }
        self.state.record(descriptor, |stats| stats.opens += 1);
        Ok(MemoryConnection {
            descriptor: descriptor.to_string(),
            state: Arc::clone(&self.state),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// One open data source of a [`MemoryDriver`]. Clones share the open/closed state.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    descriptor: String,
    state: Arc<DriverState>,
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail if closed, otherwise bump a counter.
    fn touch(&self, count: impl FnOnce(&mut MemoryStats)) -> Result<(), SqlRouterError> {
        if self.is_closed() {
            return Err(MemoryError::Closed(self.descriptor.clone()).into());
        }
        self.state.record(&self.descriptor, count);
        Ok(())
    }

    fn answer(&self, query: &str) -> ResultSet {
        let mut set = ResultSet::with_columns(vec![SERVER_COLUMN.into(), QUERY_COLUMN.into()]);
        set.add_row_values(vec![
            RowValues::Text(self.descriptor.clone()),
            RowValues::Text(query.to_string()),
        ]);
        set
    }

    fn rows_affected(&self, query: &str) -> u64 {
        self.state
            .behaviour()
            .rows_affected
            .get(query)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    type Statement = MemoryStatement;
    type Transaction = MemoryTransaction;

    async fn execute(
        &self,
        ctx: &Context,
        query: &str,
        _params: &[RowValues],
    ) -> Result<ExecResult, SqlRouterError> {
        ctx.run(async {
            self.touch(|stats| stats.executes += 1)?;
            Ok::<_, SqlRouterError>(ExecResult::new(self.rows_affected(query)))
        })
        .await
    }

    async fn query(
        &self,
        ctx: &Context,
        query: &str,
        _params: &[RowValues],
    ) -> Result<ResultSet, SqlRouterError> {
        ctx.run(async {
            self.touch(|stats| stats.queries += 1)?;
            Ok::<_, SqlRouterError>(self.answer(query))
        })
        .await
    }

    async fn query_row(&self, ctx: &Context, query: &str, params: &[RowValues]) -> Row {
        Row::from(self.query(ctx, query, params).await)
    }

    async fn prepare(&self, ctx: &Context, query: &str) -> Result<MemoryStatement, SqlRouterError> {
        let (delay, fail) = {
            let behaviour = self.state.behaviour();
            (
                behaviour.prepare_delay.get(&self.descriptor).copied(),
                behaviour.fail_prepare.contains(&self.descriptor),
            )
        };
        ctx.run(async {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(MemoryError::PrepareFailed(self.descriptor.clone()).into());
            }
            self.touch(|stats| stats.prepares += 1)?;
            Ok::<_, SqlRouterError>(MemoryStatement {
                conn: self.clone(),
                query: query.to_string(),
            })
        })
        .await
    }

    async fn begin(&self, ctx: &Context) -> Result<MemoryTransaction, SqlRouterError> {
        ctx.run(async {
            self.touch(|stats| stats.begins += 1)?;
            Ok::<_, SqlRouterError>(MemoryTransaction {
                descriptor: self.descriptor.clone(),
            })
        })
        .await
    }

    async fn ping(&self, ctx: &Context) -> Result<(), SqlRouterError> {
        let fail = self.state.behaviour().fail_ping.contains(&self.descriptor);
        ctx.run(async {
            self.touch(|stats| stats.pings += 1)?;
            if fail {
                return Err(MemoryError::PingFailed(self.descriptor.clone()).into());
            }
            Ok::<_, SqlRouterError>(())
        })
        .await
    }

    async fn close(&self) -> Result<(), SqlRouterError> {
        self.closed.store(true, Ordering::Release);
        self.state.record(&self.descriptor, |stats| stats.closes += 1);
        if self.state.behaviour().fail_close.contains(&self.descriptor) {
            return Err(MemoryError::CloseFailed(self.descriptor.clone()).into());
        }
        Ok(())
    }

    fn set_max_idle_conns(&self, n: usize) {
        self.state
            .record(&self.descriptor, |stats| stats.max_idle_conns = Some(n));
    }

    fn set_max_open_conns(&self, n: usize) {
        self.state
            .record(&self.descriptor, |stats| stats.max_open_conns = Some(n));
    }

    fn set_conn_max_lifetime(&self, lifetime: Option<Duration>) {
        self.state
            .record(&self.descriptor, |stats| stats.conn_max_lifetime = Some(lifetime));
    }
}

/// Statement prepared on a [`MemoryConnection`]; it answers like its connection.
#[derive(Debug)]
pub struct MemoryStatement {
    conn: MemoryConnection,
    query: String,
}

impl MemoryStatement {
    /// Descriptor of the connection the statement was prepared on.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        self.conn.descriptor()
    }
}

#[async_trait]
impl Statement for MemoryStatement {
    async fn execute(
        &self,
        ctx: &Context,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlRouterError> {
        self.conn.execute(ctx, &self.query, params).await
    }

    async fn query(&self, ctx: &Context, params: &[RowValues]) -> Result<ResultSet, SqlRouterError> {
        self.conn.query(ctx, &self.query, params).await
    }

    async fn query_row(&self, ctx: &Context, params: &[RowValues]) -> Row {
        self.conn.query_row(ctx, &self.query, params).await
    }

    async fn close(&self) -> Result<(), SqlRouterError> {
        self.conn
            .state
            .record(&self.conn.descriptor, |stats| stats.statement_closes += 1);
        Ok(())
    }
}

/// Transaction started on a [`MemoryConnection`].
#[derive(Debug)]
pub struct MemoryTransaction {
    descriptor: String,
}

impl MemoryTransaction {
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// # Errors
    ///
    /// Never fails; kept fallible to mirror real drivers.
    #[allow(clippy::unused_async)]
    pub async fn commit(self) -> Result<(), SqlRouterError> {
        Ok(())
    }

    /// # Errors
    ///
    /// Never fails; kept fallible to mirror real drivers.
    #[allow(clippy::unused_async)]
    pub async fn rollback(self) -> Result<(), SqlRouterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connections_answer_with_their_descriptor() {
        let driver = MemoryDriver::new().with_rows_affected("UPDATE t SET x = 1", 3);
        let conn = driver.open("replicaA").await.unwrap();
        let ctx = Context::background();

        let row = conn.query_row(&ctx, "SELECT 1", &[]).await.scan().unwrap();
        assert_eq!(row.get(SERVER_COLUMN).and_then(RowValues::as_text), Some("replicaA"));

        let res = conn.execute(&ctx, "UPDATE t SET x = 1", &[]).await.unwrap();
        assert_eq!(res.rows_affected, 3);
        let res = conn.execute(&ctx, "UPDATE t SET x = 2", &[]).await.unwrap();
        assert_eq!(res.rows_affected, 0);

        let stats = driver.stats("replicaA");
        assert_eq!((stats.opens, stats.queries, stats.executes), (1, 1, 2));
    }

    #[tokio::test]
    async fn failures_surface_as_driver_errors() {
        let driver = MemoryDriver::new().with_open_failure("down");
        let err = driver.open("down").await.unwrap_err();
        assert!(matches!(err, SqlRouterError::Driver(_)));
        assert_eq!(err.to_string(), "data source down is unreachable");
    }

    #[tokio::test]
    async fn closed_connection_rejects_work() {
        let driver = MemoryDriver::new();
        let conn = driver.open("db").await.unwrap();
        conn.close().await.unwrap();
        let res = conn.query(&Context::background(), "SELECT 1", &[]).await;
        assert!(matches!(res, Err(SqlRouterError::Driver(_))));
    }
}
