//! Capability traits the router depends on.
//!
//! The router never opens sockets or speaks a wire protocol. A [`Driver`] turns a
//! data source descriptor into a [`Connection`], and the connection (itself
//! usually a pool managed by the driver) does the real work. Everything here is
//! `Send + Sync` because the same connection is shared by every router handle
//! and by the background tasks that open readers and prepare statements.

use std::time::Duration;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::SqlRouterError;
use crate::results::{ResultSet, Row};
use crate::types::{ExecResult, RowValues};

/// Opens connections for one backend.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Conn: Connection;

    /// Identity of the backend, for logging.
    fn name(&self) -> &str;

    /// Open a connection to the data source named by `descriptor`.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports; the router passes it through unchanged.
    async fn open(&self, descriptor: &str) -> Result<Self::Conn, SqlRouterError>;
}

/// An already-managed database connection (or connection pool).
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Statement: Statement;
    type Transaction: Send + 'static;

    /// Run a statement that does not return rows.
    async fn execute(
        &self,
        ctx: &Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlRouterError>;

    async fn query(
        &self,
        ctx: &Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlRouterError>;

    /// Query for at most one row. Failures are carried inside the returned [`Row`].
    async fn query_row(&self, ctx: &Context, query: &str, params: &[RowValues]) -> Row;

    async fn prepare(&self, ctx: &Context, query: &str) -> Result<Self::Statement, SqlRouterError>;

    async fn begin(&self, ctx: &Context) -> Result<Self::Transaction, SqlRouterError>;

    async fn ping(&self, ctx: &Context) -> Result<(), SqlRouterError>;

    async fn close(&self) -> Result<(), SqlRouterError>;

    fn set_max_idle_conns(&self, n: usize);

    fn set_max_open_conns(&self, n: usize);

    /// `None` lets connections be reused forever.
    fn set_conn_max_lifetime(&self, lifetime: Option<Duration>);
}

/// A statement prepared on one connection.
#[async_trait]
pub trait Statement: Send + Sync + 'static {
    async fn execute(&self, ctx: &Context, params: &[RowValues])
    -> Result<ExecResult, SqlRouterError>;

    async fn query(&self, ctx: &Context, params: &[RowValues]) -> Result<ResultSet, SqlRouterError>;

    async fn query_row(&self, ctx: &Context, params: &[RowValues]) -> Row;

    async fn close(&self) -> Result<(), SqlRouterError>;
}
