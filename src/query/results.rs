//! Result handles returned by statement calls.
//!
//! Query-bearing calls return a [`Cursor`] naming the server-side result set;
//! fetching its rows is left to the result consumer. Meta-commands and catalog
//! calls return their rows in memory as a [`RowSet`].

use std::collections::{BTreeMap, HashMap};

use crate::transport::messages::{CellValue, SystemQueryRow, WireRows};

/// Column name, position and declared type lookup for a result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    cols2pos: HashMap<String, usize>,
    pos2cols: BTreeMap<usize, String>,
    cols2types: HashMap<String, String>,
}

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from `(name, type)` pairs in column order.
    pub fn from_columns<'a>(columns: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut map = Self::new();
        for (name, type_name) in columns {
            map.push(name, type_name);
        }
        map
    }

    /// Append a column after the existing ones.
    pub fn push(&mut self, name: &str, type_name: &str) {
        let pos = self.pos2cols.len();
        self.cols2pos.insert(name.to_string(), pos);
        self.pos2cols.insert(pos, name.to_string());
        self.cols2types
            .insert(name.to_string(), type_name.to_string());
    }

    /// Zero-based position of `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.cols2pos.get(name).copied()
    }

    pub fn name(&self, pos: usize) -> Option<&str> {
        self.pos2cols.get(&pos).map(String::as_str)
    }

    /// Declared type of `name`, e.g. `CHAR`.
    pub fn type_name(&self, name: &str) -> Option<&str> {
        self.cols2types.get(name).map(String::as_str)
    }

    /// Column names in position order.
    pub fn names(&self) -> Vec<&str> {
        self.pos2cols.values().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.pos2cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos2cols.is_empty()
    }
}

/// Rows held in memory together with their column map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: ColumnMap,
    pub rows: Vec<Vec<CellValue>>,
}

impl RowSet {
    /// One `CHAR` column named `column`, one row per value.
    pub fn single_column<I, S>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: ColumnMap::from_columns([(column, "CHAR")]),
            rows: values
                .into_iter()
                .map(|v| vec![CellValue::Text(v.into())])
                .collect(),
        }
    }

    /// The system-wide query listing.
    pub fn system_queries(rows: Vec<SystemQueryRow>) -> Self {
        let columns = ColumnMap::from_columns([
            ("query_id", "CHAR"),
            ("user", "CHAR"),
            ("importance", "FLOAT"),
            ("estimated_time", "INT"),
            ("elapsed_time", "INT"),
            ("status", "CHAR"),
            ("server", "CHAR"),
            ("database", "CHAR"),
            ("sql", "CHAR"),
        ]);
        let rows = rows
            .into_iter()
            .map(|row| {
                vec![
                    CellValue::Text(row.query_id),
                    CellValue::Text(row.user),
                    CellValue::Float(row.importance),
                    CellValue::Int(row.estimated_time_ms),
                    CellValue::Int(row.elapsed_time_ms),
                    CellValue::Text(row.status),
                    CellValue::Text(row.server),
                    CellValue::Text(row.database),
                    CellValue::Text(row.sql),
                ]
            })
            .collect();
        Self { columns, rows }
    }

    /// Value at `row`, column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&CellValue> {
        let pos = self.columns.position(name)?;
        self.rows.get(row)?.get(pos)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl From<WireRows> for RowSet {
    fn from(wire: WireRows) -> Self {
        Self {
            columns: ColumnMap::from_columns(
                wire.columns
                    .iter()
                    .map(|c| (c.name.as_str(), c.type_name.as_str())),
            ),
            rows: wire.rows,
        }
    }
}

/// Server-side result set opened by a query-bearing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Query id issued with the result set, if any
    pub query_id: Option<String>,
    /// Rows requested per fetch
    pub fetch_size: u32,
}

/// Result of a query-shaped call.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSet {
    /// Rows stay on the server and are fetched through the connection
    Cursor(Cursor),
    /// Rows produced client-side or returned inline
    Rows(RowSet),
}

impl ResultSet {
    /// In-memory rows, if this is not a cursor.
    pub fn rows(&self) -> Option<&RowSet> {
        match self {
            ResultSet::Rows(rows) => Some(rows),
            ResultSet::Cursor(_) => None,
        }
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        match self {
            ResultSet::Cursor(cursor) => Some(cursor),
            ResultSet::Rows(_) => None,
        }
    }

    /// Text of the first column of every row. Useful for synthesized results.
    pub fn first_column_text(&self) -> Vec<String> {
        self.rows()
            .map(|set| {
                set.rows
                    .iter()
                    .filter_map(|row| row.first().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Result of `execute`: a result set or an update count.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    ResultSet(ResultSet),
    UpdateCount(i64),
}

impl ExecuteOutcome {
    pub fn update_count(&self) -> Option<i64> {
        match self {
            ExecuteOutcome::UpdateCount(n) => Some(*n),
            ExecuteOutcome::ResultSet(_) => None,
        }
    }

    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            ExecuteOutcome::ResultSet(rs) => Some(rs),
            ExecuteOutcome::UpdateCount(_) => None,
        }
    }

    pub fn into_result_set(self) -> Option<ResultSet> {
        match self {
            ExecuteOutcome::ResultSet(rs) => Some(rs),
            ExecuteOutcome::UpdateCount(_) => None,
        }
    }
}
