//! SQL guardrail validator
//!
//! Decides whether an arbitrary, machine-generated SQL string is a single, bounded,
//! authorized read. The checks run in a fixed order:
//!
//! 1. length ceiling (stops here on failure)
//! 2. statement must start with `SELECT` (stops here on failure)
//! 3. forbidden keywords, each reported
//! 4. at most one statement
//! 5. every referenced table is authorized
//! 6. no masked column is mentioned
//! 7. advisory when no `LIMIT` is present
//! 8. advisory when the statement is deeply nested
//!
//! Validation is pure and deterministic; nothing here touches a database.

mod keywords;
mod lexer;
mod limit;
mod tables;

pub use keywords::FORBIDDEN_KEYWORDS;
pub use limit::{enforce_limit, has_limit_clause};
pub use tables::TableExtractor;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{AuthorizationContext, QueryValidation};

/// Default row cap injected when a statement has no `LIMIT`
pub const DEFAULT_MAX_ROWS: u32 = 1000;

/// Configuration for the guardrail validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// Maximum statement length in characters
    pub max_query_length: usize,

    /// Opening parentheses beyond which a complexity warning is raised
    pub complexity_threshold: usize,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_query_length: 5000,
            complexity_threshold: 5,
        }
    }
}

/// Validator for AI-generated read queries
#[derive(Debug, Clone)]
pub struct SqlGuardrail {
    /// Configuration
    config: GuardrailConfig,

    /// Statement must start with SELECT
    select_prefix: Regex,

    /// One word-boundary pattern per forbidden keyword
    forbidden: Vec<(&'static str, Regex)>,

    /// Table reference extraction
    tables: TableExtractor,
}

impl SqlGuardrail {
    /// Create a new validator with the given configuration
    pub fn new(config: GuardrailConfig) -> Self {
        let forbidden = FORBIDDEN_KEYWORDS
            .iter()
            .map(|kw| {
                let pattern = Regex::new(&format!(r"(?i)\b{}\b", kw)).expect("keyword pattern");
                (*kw, pattern)
            })
            .collect();

        Self {
            config,
            select_prefix: Regex::new(r"(?i)^SELECT\b").expect("select pattern"),
            forbidden,
            tables: TableExtractor::new(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &GuardrailConfig {
        &self.config
    }

    /// Tables referenced by a statement, normalized to bare lower-case names
    pub fn referenced_tables(&self, sql: &str) -> Vec<String> {
        self.tables.extract(sql)
    }

    /// Validate a statement against an authorization snapshot
    ///
    /// `max_rows` is only used to word the advisory about the injected `LIMIT`.
    pub fn validate(&self, sql: &str, auth: &AuthorizationContext, max_rows: u32) -> QueryValidation {
        let mut validation = QueryValidation::passed();

        let length = sql.chars().count();
        if length > self.config.max_query_length {
            validation.add_error(format!(
                "Query exceeds maximum length of {} characters ({} given)",
                self.config.max_query_length, length
            ));
            return validation;
        }

        let trimmed = sql.trim();
        if !self.select_prefix.is_match(trimmed) {
            validation.add_error(shape_error(trimmed));
            return validation;
        }

        for (keyword, pattern) in &self.forbidden {
            if pattern.is_match(sql) {
                validation.add_error(format!("Forbidden keyword detected: {}", keyword));
            }
        }

        match lexer::tokenize(sql) {
            Ok(tokens) => {
                if lexer::count_statements(&tokens) > 1 {
                    validation.add_error("Multiple statements are not allowed");
                }
            }
            Err(e) => validation.add_error(format!("Query could not be tokenized: {}", e)),
        }

        for table in self.tables.extract(sql) {
            if !auth.is_allowed(&table) {
                validation.add_error(format!("Access to table '{}' is not authorized", table));
            }
        }

        for (table, columns) in &auth.masked_columns {
            for column in columns {
                if mentions_word(sql, column) {
                    validation.add_error(format!(
                        "Column '{}' in table '{}' is masked and cannot be queried",
                        column, table
                    ));
                }
            }
        }

        if !has_limit_clause(sql) {
            validation.add_warning(format!(
                "No LIMIT clause found; a default limit of {} rows will be applied",
                max_rows
            ));
        }

        let depth = sql.matches('(').count();
        if depth > self.config.complexity_threshold {
            validation.add_warning(format!(
                "Query contains {} nested expressions; complex queries may be slow",
                depth
            ));
        }

        debug!(
            "Validated query: valid={} errors={} warnings={}",
            validation.valid,
            validation.errors.len(),
            validation.warnings.len()
        );
        validation
    }
}

impl Default for SqlGuardrail {
    fn default() -> Self {
        Self::new(GuardrailConfig::default())
    }
}

/// Validate with the default configuration
pub fn validate(sql: &str, auth: &AuthorizationContext, max_rows: u32) -> QueryValidation {
    SqlGuardrail::default().validate(sql, auth, max_rows)
}

fn shape_error(trimmed: &str) -> String {
    let leading = trimmed
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_uppercase();

    if FORBIDDEN_KEYWORDS.contains(&leading.as_str()) {
        format!(
            "Only SELECT statements are allowed; forbidden keyword detected: {}",
            leading
        )
    } else {
        "Only SELECT statements are allowed".to_string()
    }
}

fn mentions_word(sql: &str, word: &str) -> bool {
    match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))) {
        Ok(pattern) => pattern.is_match(sql),
        // An unbuildable pattern is treated as a hit
        Err(_) => true,
    }
}
