//! Convenient imports for common functionality.

pub use crate::connection::{Connection, Driver, Statement};
pub use crate::context::Context;
pub use crate::error::SqlRouterError;
pub use crate::pool::ConnectionPool;
pub use crate::results::{CustomDbRow, ResultSet, Row};
pub use crate::router::{RouterBuilder, RouterOptions, RwRouter};
pub use crate::statement::RwStatement;
pub use crate::types::{ExecResult, RowValues};

#[cfg(feature = "memory")]
pub use crate::memory::{MemoryConnection, MemoryDriver, MemoryStats};
