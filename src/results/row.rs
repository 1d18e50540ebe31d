use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SqlRouterError;
use crate::types::RowValues;

/// A row from a database query result
///
/// Column names are shared with every other row of the same result set.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub rows: Vec<RowValues>,
    #[doc(hidden)]
    pub(crate) column_index_cache: Arc<HashMap<String, usize>>,
}

impl CustomDbRow {
    /// Create a new database row, building its own column index.
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        let cache = Arc::new(column_index(&column_names));
        Self {
            column_names,
            rows,
            column_index_cache: cache,
        }
    }

    pub(crate) fn with_index(
        column_names: Arc<Vec<String>>,
        column_index_cache: Arc<HashMap<String, usize>>,
        rows: Vec<RowValues>,
    ) -> Self {
        Self {
            column_names,
            rows,
            column_index_cache,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_index_cache.get(column_name).copied()
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }
}

pub(crate) fn column_index(column_names: &[String]) -> HashMap<String, usize> {
    column_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}

#[derive(Debug)]
enum RowState {
    Ready(CustomDbRow),
    Empty,
    Failed(SqlRouterError),
}

/// Result of a single-row query.
///
/// Building a `Row` never fails. A routing or execution error is stored and only
/// raised when the row is scanned, so `query_row(...).scan()` reads as one call
/// site for every failure.
#[derive(Debug)]
pub struct Row {
    state: RowState,
}

impl Row {
    #[must_use]
    pub fn new(row: CustomDbRow) -> Self {
        Self {
            state: RowState::Ready(row),
        }
    }

    /// A row for a query that matched nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            state: RowState::Empty,
        }
    }

    /// A row that raises `err` when scanned.
    #[must_use]
    pub fn from_error(err: SqlRouterError) -> Self {
        Self {
            state: RowState::Failed(err),
        }
    }

    /// Peek at the stored error without consuming the row.
    #[must_use]
    pub fn err(&self) -> Option<&SqlRouterError> {
        match &self.state {
            RowState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Consume the row.
    ///
    /// # Errors
    ///
    /// Returns the stored error, or `SqlRouterError::NoRows` when the query matched nothing.
    pub fn scan(self) -> Result<CustomDbRow, SqlRouterError> {
        match self.state {
            RowState::Ready(row) => Ok(row),
            RowState::Empty => Err(SqlRouterError::NoRows),
            RowState::Failed(err) => Err(err),
        }
    }

    /// Consume the row and return its values in column order.
    ///
    /// # Errors
    ///
    /// Same as [`Row::scan`].
    pub fn scan_values(self) -> Result<Vec<RowValues>, SqlRouterError> {
        self.scan().map(|row| row.rows)
    }
}

impl From<Result<crate::results::ResultSet, SqlRouterError>> for Row {
    /// First row of a result set, keeping any error deferred.
    fn from(result: Result<crate::results::ResultSet, SqlRouterError>) -> Self {
        match result {
            Ok(set) => set.results.into_iter().next().map_or_else(Row::empty, Row::new),
            Err(err) => Row::from_error(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_row_raises_only_on_scan() {
        let row = Row::from_error(SqlRouterError::NoReaderAvailable);
        assert!(matches!(row.err(), Some(SqlRouterError::NoReaderAvailable)));
        assert!(matches!(row.scan(), Err(SqlRouterError::NoReaderAvailable)));
    }

    #[test]
    fn empty_row_scans_to_no_rows() {
        assert!(matches!(Row::empty().scan(), Err(SqlRouterError::NoRows)));
    }

    #[test]
    fn lookup_by_column_name() {
        let row = CustomDbRow::new(
            Arc::new(vec!["id".into(), "name".into()]),
            vec![RowValues::Int(7), RowValues::Text("x".into())],
        );
        assert_eq!(row.get("name").and_then(RowValues::as_text), Some("x"));
        assert!(row.get("missing").is_none());
        assert_eq!(Row::new(row).scan_values().unwrap()[0], RowValues::Int(7));
    }
}
