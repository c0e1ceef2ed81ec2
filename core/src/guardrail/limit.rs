//! Row-cap injection

use regex::Regex;
use std::sync::OnceLock;

use super::lexer;

fn limit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bLIMIT\b").expect("limit pattern"))
}

/// Whether the statement already contains a `LIMIT` keyword
///
/// Mentions inside comments, string literals and quoted identifiers do not
/// count. Text that cannot be tokenized is matched as-is.
pub fn has_limit_clause(sql: &str) -> bool {
    match lexer::tokenize(sql) {
        Ok(tokens) => tokens.iter().any(|token| lexer::is_keyword(token, "LIMIT")),
        Err(_) => limit_pattern().is_match(sql),
    }
}

/// Append `LIMIT max_rows` unless the statement already has a `LIMIT`
///
/// Trailing `;` terminators are dropped before appending. When the last line
/// carries a `--` comment the clause goes on a new line so it is not swallowed.
/// Applying this twice gives the same result as applying it once.
pub fn enforce_limit(sql: &str, max_rows: u32) -> String {
    if has_limit_clause(sql) {
        return sql.to_string();
    }

    let body = sql.trim_end().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    let last_line = body.rsplit('\n').next().unwrap_or(body);
    let separator = if last_line.contains("--") { "\n" } else { " " };

    format!("{}{}LIMIT {}", body, separator, max_rows)
}
