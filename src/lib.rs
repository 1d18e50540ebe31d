//! # sql-rw-router
//!
//! Read/write splitting in front of one writer and any number of readers.
//!
//! - **[`ConnectionPool`]**: ordered slots, writer at index 0, round-robin reader
//!   selection that skips slots whose connection is still opening.
//! - **[`RwRouter`]**: caller-facing handle. Writes go to the writer, reads to the
//!   next reader, and after a write that changed rows this handle's reads stick to
//!   the writer.
//! - **[`RwStatement`]**: a statement prepared on the writer and, in the background,
//!   on a reader.
//!
//! The router never talks to a database itself. Connections come from a
//! [`Driver`] implementation; the `memory` feature ships an in-process one.

pub mod connection;
pub mod context;
pub mod error;
#[cfg(feature = "memory")]
pub mod memory;
pub mod pool;
pub mod prelude;
pub mod results;
pub mod router;
pub mod statement;
pub mod types;

pub use connection::{Connection, Driver, Statement};
pub use context::Context;
pub use error::{DriverError, Result, SqlRouterError};
pub use pool::ConnectionPool;
pub use results::{CustomDbRow, ResultSet, Row};
pub use router::{RouterBuilder, RouterOptions, RwRouter};
pub use statement::RwStatement;
pub use types::{ExecResult, RowValues};
