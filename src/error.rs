use thiserror::Error;

/// Boxed error produced by a driver's connection capability.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SqlRouterError {
    #[error("no data source name available")]
    NoDataSource,

    #[error("writer connection failed to open: {0}")]
    WriterOpenFailed(#[source] Box<SqlRouterError>),

    #[error("no writer db available")]
    NoWriterAvailable,

    #[error("no reader db available")]
    NoReaderAvailable,

    #[error("zero statement executable")]
    NoStatementExecutable,

    #[error("no rows in result set")]
    NoRows,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("context cancelled")]
    Cancelled,

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),
}

impl SqlRouterError {
    /// True for runtime selection failures a caller may retry once the pool converges.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::NoWriterAvailable | Self::NoReaderAvailable)
    }
}

impl From<tokio::task::JoinError> for SqlRouterError {
    fn from(err: tokio::task::JoinError) -> Self {
        SqlRouterError::ConnectionError(format!("background task failed: {err}"))
    }
}

/// A type alias for Results with our error type
pub type Result<T> = std::result::Result<T, SqlRouterError>;
