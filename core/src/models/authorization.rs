//! Authorization snapshot for one validation call

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Tables, masked columns and row caps granted for one database
///
/// Loaded fresh from the permission store for every request; never cached.
/// Table and column names are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationContext {
    /// Tables the caller may read
    pub allowed_tables: BTreeSet<String>,

    /// Columns that must never be referenced, per table
    pub masked_columns: BTreeMap<String, BTreeSet<String>>,

    /// Maximum rows returned by a query touching the table
    pub row_limits: BTreeMap<String, u32>,
}

impl AuthorizationContext {
    /// Create a context granting the given tables
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_tables: tables
                .into_iter()
                .map(|t| normalize(t.as_ref()))
                .collect(),
            masked_columns: BTreeMap::new(),
            row_limits: BTreeMap::new(),
        }
    }

    /// Mask columns of a table
    pub fn with_masked<I, S>(mut self, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.masked_columns
            .entry(normalize(table))
            .or_default()
            .extend(columns.into_iter().map(|c| normalize(c.as_ref())));
        self
    }

    /// Cap the rows returned by queries touching a table
    pub fn with_row_limit(mut self, table: &str, limit: u32) -> Self {
        self.row_limits.insert(normalize(table), limit);
        self
    }

    /// Whether no table has been granted
    pub fn is_empty(&self) -> bool {
        self.allowed_tables.is_empty()
    }

    /// Whether a table may be read
    pub fn is_allowed(&self, table: &str) -> bool {
        self.allowed_tables.contains(&normalize(table))
    }

    /// Whether a column of a table is masked
    pub fn is_masked(&self, table: &str, column: &str) -> bool {
        self.masked_columns
            .get(&normalize(table))
            .map(|cols| cols.contains(&normalize(column)))
            .unwrap_or(false)
    }

    /// The row cap for a query touching `tables`: the smallest configured limit, or `default`
    pub fn effective_row_limit<S: AsRef<str>>(&self, tables: &[S], default: u32) -> u32 {
        tables
            .iter()
            .filter_map(|t| self.row_limits.get(&normalize(t.as_ref())))
            .copied()
            .fold(default, u32::min)
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_are_case_insensitive() {
        let ctx = AuthorizationContext::new(["Orders", "users"]);
        assert!(ctx.is_allowed("orders"));
        assert!(ctx.is_allowed("USERS"));
        assert!(!ctx.is_allowed("payments"));
        assert!(!ctx.is_empty());
        assert!(AuthorizationContext::default().is_empty());
    }

    #[test]
    fn test_masked_columns() {
        let ctx = AuthorizationContext::new(["users"]).with_masked("users", ["Email", "ssn"]);
        assert!(ctx.is_masked("users", "email"));
        assert!(ctx.is_masked("USERS", "SSN"));
        assert!(!ctx.is_masked("users", "name"));
        assert!(!ctx.is_masked("orders", "email"));
    }

    #[test]
    fn test_effective_row_limit() {
        let ctx = AuthorizationContext::new(["orders", "users"])
            .with_row_limit("orders", 500)
            .with_row_limit("users", 200);

        assert_eq!(ctx.effective_row_limit(&["orders"], 1000), 500);
        assert_eq!(ctx.effective_row_limit(&["orders", "users"], 1000), 200);
        assert_eq!(ctx.effective_row_limit(&["payments"], 1000), 1000);
        assert_eq!(ctx.effective_row_limit(&["orders"], 100), 100);
        assert_eq!(ctx.effective_row_limit::<&str>(&[], 1000), 1000);
    }
}
