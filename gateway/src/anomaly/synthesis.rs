//! Comparison-query synthesis
//!
//! Each candidate yields two parameter-free queries, a 7-day and a 30-day window,
//! each compared with the window immediately before it. Every query returns two
//! rows labelled `current` and `previous` and carries its own `LIMIT 2`, so
//! per-table row caps never cut a comparison short.

use guarded_query_core::MetricCandidate;

/// Window lengths in days, in synthesis order
pub const WINDOW_DAYS: &[u32] = &[7, 30];

/// Label of the most recent window
pub const CURRENT_PERIOD: &str = "current";

/// Label of the window before it
pub const PREVIOUS_PERIOD: &str = "previous";

/// Rows returned by every comparison query
pub const COMPARISON_ROWS: u32 = 2;

/// A synthesized comparison query and the candidate it measures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonQuery {
    /// Candidate measured by the query
    pub candidate: MetricCandidate,

    /// Window length in days
    pub window_days: u32,

    /// Statement text
    pub sql: String,
}

/// Synthesize comparison queries, keeping at most `max_queries`
///
/// Candidates beyond the cap are dropped, not queued.
pub fn synthesize(candidates: &[MetricCandidate], max_queries: usize) -> Vec<ComparisonQuery> {
    candidates
        .iter()
        .flat_map(|candidate| {
            WINDOW_DAYS.iter().map(move |&days| ComparisonQuery {
                candidate: candidate.clone(),
                window_days: days,
                sql: comparison_sql(candidate, days),
            })
        })
        .take(max_queries)
        .collect()
}

/// Two-row sum/count comparison of the last `days` days against the `days` before
pub fn comparison_sql(candidate: &MetricCandidate, days: u32) -> String {
    let table = quote_ident(&candidate.table);
    let value = quote_ident(&candidate.numeric_column);
    let time = quote_ident(&candidate.time_column);
    let aggregates = format!(
        "COALESCE(SUM({value}), 0)::float8 AS total, COUNT(*) AS row_count FROM {table}",
        value = value,
        table = table
    );

    format!(
        "SELECT '{current}' AS period, {aggregates} \
         WHERE {time} >= NOW() - INTERVAL '{days} days' \
         UNION ALL \
         SELECT '{previous}' AS period, {aggregates} \
         WHERE {time} >= NOW() - INTERVAL '{double} days' AND {time} < NOW() - INTERVAL '{days} days' \
         LIMIT {rows}",
        current = CURRENT_PERIOD,
        previous = PREVIOUS_PERIOD,
        aggregates = aggregates,
        time = time,
        days = days,
        double = days * 2,
        rows = COMPARISON_ROWS,
    )
}

/// Double-quote an identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use guarded_query_core::{validate, AuthorizationContext};

    fn candidate(table: &str, column: &str) -> MetricCandidate {
        MetricCandidate {
            table: table.to_string(),
            numeric_column: column.to_string(),
            time_column: "created_at".to_string(),
        }
    }

    #[test]
    fn test_two_windows_per_candidate() {
        let queries = synthesize(&[candidate("orders", "amount")], 10);
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].window_days, 7);
        assert_eq!(queries[1].window_days, 30);
        assert!(queries[0].sql.contains("INTERVAL '7 days'"));
        assert!(queries[0].sql.contains("INTERVAL '14 days'"));
        assert!(queries[1].sql.contains("INTERVAL '60 days'"));
        assert!(queries[0].sql.contains("UNION ALL"));
        assert!(queries[0].sql.ends_with("LIMIT 2"));
    }

    #[test]
    fn test_row_caps_leave_comparisons_intact() {
        let sql = comparison_sql(&candidate("orders", "amount"), 7);
        assert_eq!(guarded_query_core::enforce_limit(&sql, 1), sql);
    }

    #[test]
    fn test_cap_drops_later_candidates() {
        let candidates: Vec<_> = (0..8).map(|i| candidate("orders", &format!("m{}", i))).collect();
        let queries = synthesize(&candidates, 10);
        assert_eq!(queries.len(), 10);
        assert_eq!(queries.last().unwrap().candidate.numeric_column, "m4");

        assert_eq!(synthesize(&candidates, 3).len(), 3);
        assert!(synthesize(&[], 10).is_empty());
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote_ident("Order Items"), "\"Order Items\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_synthesized_sql_passes_guardrails() {
        let auth = AuthorizationContext::new(["orders"]);
        for query in synthesize(&[candidate("orders", "amount")], 10) {
            let validation = validate(&query.sql, &auth, 1000);
            assert!(validation.valid, "{:?}", validation.errors);
        }
    }
}
