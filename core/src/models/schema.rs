//! Cached schema metadata for external databases

use serde::{Deserialize, Serialize};

/// A column as last observed by the schema crawler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name
    pub name: String,

    /// Database type name, e.g. `integer` or `timestamp with time zone`
    pub data_type: String,

    /// Whether the column is part of the primary key
    #[serde(default)]
    pub is_primary_key: bool,
}

impl ColumnSchema {
    /// Create a column description
    pub fn new(name: &str, data_type: &str, is_primary_key: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_primary_key,
        }
    }
}

/// A table as last observed by the schema crawler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name: String,

    /// Columns in ordinal order
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,

    /// Planner row estimate, if known
    #[serde(default)]
    pub row_count_estimate: Option<i64>,
}

/// Schema of one external database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Tables in the database
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

/// A numeric column paired with a timestamp column for trend comparison
///
/// Derived per scan invocation; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricCandidate {
    /// Table holding both columns
    pub table: String,

    /// Column to aggregate
    pub numeric_column: String,

    /// Column that places rows in time
    pub time_column: String,
}
