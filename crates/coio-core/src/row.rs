//! Result rows and result sets.

use crate::value::Value;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// How a row keys its columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowShape {
    /// Keyed by column name
    #[default]
    Named,
    /// Keyed by column position
    Positional,
}

/// How a row represents SQL NULL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NullMode {
    /// NULL columns are left out of the row
    #[default]
    Omit,
    /// NULL columns are present as [`Value::ExplicitNull`]
    Explicit,
}

/// Column metadata shared across all rows in a result set.
///
/// This struct is wrapped in `Arc` so all rows from the same result share
/// the same column information.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    ///
    /// When two columns share a name, lookups by name resolve to the later
    /// one, matching what a name-keyed row ends up holding.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Get the name of a column by index.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Get all column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// The key a row entry is addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Name(&'a str),
    Position(usize),
}

/// A single row returned from a statement.
///
/// A row is a mapping from column identity to [`Value`], in column order.
/// Under [`NullMode::Omit`] NULL columns have no entry at all; under
/// [`NullMode::Explicit`] they hold [`Value::ExplicitNull`].
#[derive(Debug, Clone)]
pub struct Row {
    /// Column values in order; `None` for an omitted NULL
    values: Vec<Option<Value>>,
    /// Shared column metadata
    columns: Arc<ColumnInfo>,
    shape: RowShape,
}

impl Row {
    /// Create a row from per-column values sharing `columns`.
    pub fn with_columns(
        columns: Arc<ColumnInfo>,
        shape: RowShape,
        values: Vec<Option<Value>>,
    ) -> Self {
        Self {
            values,
            columns,
            shape,
        }
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// The keying mode this row was built with.
    pub fn shape(&self) -> RowShape {
        self.shape
    }

    /// Number of entries present in the row.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Check if the row has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a value by zero-based column position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.get(i))
    }

    /// Check whether the row has an entry for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get_by_name(name).is_some()
    }

    /// Iterate over the present entries in column order, keyed according to
    /// the row shape.
    ///
    /// Under [`RowShape::Named`] a column whose name is reused by a later
    /// column has no entry of its own; the later column holds the name.
    pub fn iter(&self) -> impl Iterator<Item = (Key<'_>, &Value)> {
        self.values.iter().enumerate().filter_map(|(i, v)| match self.shape {
            RowShape::Named => {
                let name = self.columns.name_at(i).unwrap_or_default();
                if self.columns.index_of(name) != Some(i) {
                    return None;
                }
                Some((Key::Name(name), v.as_ref()?))
            }
            RowShape::Positional => Some((Key::Position(i), v.as_ref()?)),
        })
    }

    /// Consume the row, returning the per-column values.
    pub fn into_values(self) -> Vec<Option<Value>> {
        self.values
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            match key {
                Key::Name(name) => map.serialize_entry(name, value)?,
                Key::Position(pos) => map.serialize_entry(&pos, value)?,
            }
        }
        map.end()
    }
}

/// The rows produced by one statement.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Arc<ColumnInfo>,
    rows: Vec<Row>,
    affected_rows: u64,
}

impl ResultSet {
    pub fn new(columns: Arc<ColumnInfo>, rows: Vec<Row>, affected_rows: u64) -> Self {
        Self {
            columns,
            rows,
            affected_rows,
        }
    }

    /// A result with no columns and no rows, as returned for a statement
    /// that produces no result metadata.
    pub fn empty(affected_rows: u64) -> Self {
        Self {
            columns: Arc::new(ColumnInfo::default()),
            rows: Vec::new(),
            affected_rows,
        }
    }

    pub fn columns(&self) -> &ColumnInfo {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows changed, deleted or inserted by the statement. For statements
    /// that return rows this is the number of rows returned.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(row)?;
        }
        seq.end()
    }
}
