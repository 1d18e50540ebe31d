use std::collections::HashMap;
use std::sync::Arc;

use super::row::{CustomDbRow, column_index};
use crate::types::RowValues;

/// A result set from a database query
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<CustomDbRow>,
    /// Column names shared by all rows (to avoid duplicating in each row)
    column_names: Option<Arc<Vec<String>>>,
    column_index_cache: Option<Arc<HashMap<String, usize>>>,
}

impl ResultSet {
    /// An empty result set with known columns.
    #[must_use]
    pub fn with_columns(column_names: Vec<String>) -> Self {
        let cache = Arc::new(column_index(&column_names));
        Self {
            results: Vec::new(),
            column_names: Some(Arc::new(column_names)),
            column_index_cache: Some(cache),
        }
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Append a row; the row shares this set's column names and index.
    ///
    /// Ignored when the set was built without columns.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        if let (Some(names), Some(cache)) = (&self.column_names, &self.column_index_cache) {
            self.results.push(CustomDbRow::with_index(
                Arc::clone(names),
                Arc::clone(cache),
                row_values,
            ));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
