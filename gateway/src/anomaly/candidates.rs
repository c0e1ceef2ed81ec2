//! Metric candidate selection
//!
//! Time columns are chosen through an ordered priority table of name patterns so
//! the policy can be tuned without touching scan control flow.

use guarded_query_core::{AuthorizationContext, ColumnSchema, MetricCandidate, SchemaSnapshot, TableSchema};
use regex::Regex;

/// Name patterns for time columns, most preferred first
pub const TIME_COLUMN_PRIORITY: &[&str] = &[
    r"^created",
    r"created",
    r"occurred",
    r"(^|_)date($|_)",
    r"timestamp",
    r"_at$",
    r"time",
];

const TIMESTAMP_TYPES: &[&str] = &["timestamp", "timestamptz", "date", "datetime"];

const NUMERIC_TYPES: &[&str] = &[
    "smallint",
    "integer",
    "bigint",
    "int",
    "int2",
    "int4",
    "int8",
    "numeric",
    "decimal",
    "real",
    "double precision",
    "float4",
    "float8",
];

/// Chooses (numeric column, time column) pairs worth comparing over time
#[derive(Debug, Clone)]
pub struct CandidatePolicy {
    /// Time-column name patterns, most preferred first
    time_patterns: Vec<Regex>,

    /// Tables with a larger row estimate are skipped
    max_table_rows: i64,

    /// Numeric columns kept per table
    max_metrics_per_table: usize,
}

impl CandidatePolicy {
    /// Create a policy with the default priority table
    pub fn new(max_table_rows: i64, max_metrics_per_table: usize) -> Self {
        let time_patterns = TIME_COLUMN_PRIORITY
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)).expect("time column pattern"))
            .collect();
        Self::with_time_patterns(time_patterns, max_table_rows, max_metrics_per_table)
    }

    /// Create a policy with a custom priority table
    pub fn with_time_patterns(time_patterns: Vec<Regex>, max_table_rows: i64, max_metrics_per_table: usize) -> Self {
        Self {
            time_patterns,
            max_table_rows,
            max_metrics_per_table,
        }
    }

    /// Candidates in schema order, at most `max_metrics_per_table` per table
    pub fn select(&self, schema: &SchemaSnapshot, auth: &AuthorizationContext) -> Vec<MetricCandidate> {
        let mut candidates = Vec::new();

        for table in &schema.tables {
            if !auth.is_allowed(&table.name) || self.too_large(table) {
                continue;
            }

            let visible: Vec<&ColumnSchema> = table
                .columns
                .iter()
                .filter(|c| !auth.is_masked(&table.name, &c.name))
                .collect();

            let Some(time_column) = self.pick_time_column(&visible) else { continue };

            candidates.extend(
                visible
                    .iter()
                    .filter(|c| is_metric_column(c))
                    .take(self.max_metrics_per_table)
                    .map(|c| MetricCandidate {
                        table: table.name.clone(),
                        numeric_column: c.name.clone(),
                        time_column: time_column.name.clone(),
                    }),
            );
        }

        candidates
    }

    fn too_large(&self, table: &TableSchema) -> bool {
        table
            .row_count_estimate
            .map(|rows| rows > self.max_table_rows)
            .unwrap_or(false)
    }

    /// The timestamp column whose name matches the highest-priority pattern,
    /// or the first timestamp column when none match
    fn pick_time_column<'a>(&self, columns: &[&'a ColumnSchema]) -> Option<&'a ColumnSchema> {
        let timestamps: Vec<&ColumnSchema> = columns
            .iter()
            .copied()
            .filter(|c| is_timestamp_type(&c.data_type))
            .collect();

        self.time_patterns
            .iter()
            .find_map(|pattern| timestamps.iter().copied().find(|c| pattern.is_match(&c.name)))
            .or_else(|| timestamps.first().copied())
    }
}

impl Default for CandidatePolicy {
    fn default() -> Self {
        Self::new(10_000_000, 3)
    }
}

fn base_type(data_type: &str) -> String {
    let lower = data_type.trim().to_lowercase();
    match lower.find('(') {
        Some(idx) => lower[..idx].trim().to_string(),
        None => lower,
    }
}

/// Whether a type name denotes a timestamp or date
pub fn is_timestamp_type(data_type: &str) -> bool {
    let base = base_type(data_type);
    TIMESTAMP_TYPES.contains(&base.as_str()) || base.starts_with("timestamp")
}

/// Whether a type name denotes a summable number
pub fn is_numeric_type(data_type: &str) -> bool {
    NUMERIC_TYPES.contains(&base_type(data_type).as_str())
}

fn is_metric_column(column: &ColumnSchema) -> bool {
    let name = column.name.to_lowercase();
    is_numeric_type(&column.data_type) && !column.is_primary_key && name != "id" && !name.ends_with("_id")
}
