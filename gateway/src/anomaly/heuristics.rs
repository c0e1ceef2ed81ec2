//! Shift detection
//!
//! Percentage change of the current window against the previous one, rounded
//! to two decimals, then classified by magnitude.

use chrono::Utc;
use guarded_query_core::{AnomalyAlert, Severity};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::synthesis::{ComparisonQuery, CURRENT_PERIOD, PREVIOUS_PERIOD};
use crate::executor::QueryResult;

/// Severity thresholds on the absolute change, in percent
const SEVERITY_THRESHOLDS: &[(f64, Severity)] = &[
    (50.0, Severity::Critical),
    (30.0, Severity::Warning),
    (20.0, Severity::Info),
];

/// Totals of one comparison window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodTotals {
    /// Sum of the metric
    pub total: f64,

    /// Rows in the window
    pub row_count: i64,
}

/// Percentage change from `previous` to `current`, rounded to two decimals
///
/// `None` when both are zero. A zero previous value gives ±100.
pub fn percent_change(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        return if current > 0.0 {
            Some(100.0)
        } else if current < 0.0 {
            Some(-100.0)
        } else {
            None
        };
    }
    let change = (current - previous) / previous.abs() * 100.0;
    Some((change * 100.0).round() / 100.0)
}

/// Severity for a change, or `None` below 20%
pub fn classify(change_percent: f64) -> Option<Severity> {
    let magnitude = change_percent.abs();
    SEVERITY_THRESHOLDS
        .iter()
        .find(|(threshold, _)| magnitude >= *threshold)
        .map(|(_, severity)| *severity)
}

/// Current and previous totals of a two-row comparison result
///
/// Rows are matched by their `period` label, falling back to row order.
pub fn extract_periods(result: &QueryResult) -> Option<(PeriodTotals, PeriodTotals)> {
    if result.rows.len() < 2 {
        return None;
    }

    let labelled = |label: &str| {
        result
            .rows
            .iter()
            .find(|row| row.get("period").and_then(Value::as_str) == Some(label))
    };
    let (current, previous) = match (labelled(CURRENT_PERIOD), labelled(PREVIOUS_PERIOD)) {
        (Some(current), Some(previous)) => (current, previous),
        _ => (&result.rows[0], &result.rows[1]),
    };

    Some((totals(current)?, totals(previous)?))
}

fn totals(row: &Map<String, Value>) -> Option<PeriodTotals> {
    let total = number(row.get("total")?)?;
    let row_count = row.get("row_count").and_then(number).unwrap_or(0.0) as i64;
    Some(PeriodTotals { total, row_count })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        Value::Null => Some(0.0),
        _ => None,
    }
}

/// Build an alert when the comparison shows a significant shift
pub fn detect(
    query: &ComparisonQuery,
    result: &QueryResult,
    scan_id: Uuid,
    database_id: &str,
) -> Option<AnomalyAlert> {
    let (current, previous) = extract_periods(result)?;
    let change_percent = percent_change(current.total, previous.total)?;
    let severity = classify(change_percent)?;

    let candidate = &query.candidate;
    let direction = if change_percent >= 0.0 { "increased" } else { "decreased" };
    let days = query.window_days;

    Some(AnomalyAlert {
        id: Uuid::new_v4(),
        scan_id,
        database_id: database_id.to_string(),
        severity,
        metric_name: format!(
            "{}.{} ({}-day total)",
            candidate.table, candidate.numeric_column, days
        ),
        description: format!(
            "Total {} in {} {} by {}% over the last {} days compared with the previous {} days",
            candidate.numeric_column,
            candidate.table,
            direction,
            format_number(change_percent.abs()),
            days,
            days
        ),
        detail: format!(
            "Last {} days: total {} across {} rows. Previous {} days: total {} across {} rows. Time column: {}.",
            days,
            format_number(current.total),
            current.row_count,
            days,
            format_number(previous.total),
            previous.row_count,
            candidate.time_column
        ),
        table_name: candidate.table.clone(),
        column_name: candidate.numeric_column.clone(),
        current_value: current.total,
        previous_value: previous.total,
        change_percent,
        query_used: query.sql.clone(),
        seen: false,
        dismissed: false,
        created_at: Utc::now(),
    })
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::row;
    use guarded_query_core::MetricCandidate;
    use proptest::prelude::*;
    use rstest::rstest;
    use serde_json::json;

    fn query() -> ComparisonQuery {
        let candidate = MetricCandidate {
            table: "orders".to_string(),
            numeric_column: "amount".to_string(),
            time_column: "created_at".to_string(),
        };
        ComparisonQuery {
            sql: crate::anomaly::synthesis::comparison_sql(&candidate, 7),
            candidate,
            window_days: 7,
        }
    }

    fn result(rows: Vec<Map<String, Value>>) -> QueryResult {
        QueryResult {
            columns: vec!["period".into(), "total".into(), "row_count".into()],
            row_count: rows.len() as u64,
            rows,
            execution_time_ms: 3,
            truncated: false,
        }
    }

    fn comparison(current: Value, previous: Value) -> QueryResult {
        result(vec![
            row(&[("period", json!("current")), ("total", current), ("row_count", json!(12))]),
            row(&[("period", json!("previous")), ("total", previous), ("row_count", json!(10))]),
        ])
    }

    #[rstest]
    #[case(20.0, Some(Severity::Info))]
    #[case(29.9, Some(Severity::Info))]
    #[case(30.0, Some(Severity::Warning))]
    #[case(49.9, Some(Severity::Warning))]
    #[case(50.0, Some(Severity::Critical))]
    #[case(250.0, Some(Severity::Critical))]
    #[case(19.99, None)]
    #[case(0.0, None)]
    #[case(-35.0, Some(Severity::Warning))]
    #[case(-100.0, Some(Severity::Critical))]
    fn test_severity_boundaries(#[case] change: f64, #[case] expected: Option<Severity>) {
        assert_eq!(classify(change), expected);
    }

    #[rstest]
    #[case(150.0, 100.0, Some(50.0))]
    #[case(120.0, 100.0, Some(20.0))]
    #[case(70.0, 100.0, Some(-30.0))]
    #[case(-50.0, -100.0, Some(50.0))]
    #[case(5.0, 0.0, Some(100.0))]
    #[case(-5.0, 0.0, Some(-100.0))]
    #[case(0.0, 0.0, None)]
    #[case(1.0, 3.0, Some(-66.67))]
    fn test_percent_change(#[case] current: f64, #[case] previous: f64, #[case] expected: Option<f64>) {
        assert_eq!(percent_change(current, previous), expected);
    }

    #[test]
    fn test_rounding_applies_before_classification() {
        // 19.996% rounds to 20.00%
        let change = percent_change(119.996, 100.0).unwrap();
        assert_eq!(change, 20.0);
        assert_eq!(classify(change), Some(Severity::Info));
    }

    #[test]
    fn test_critical_alert_scenario() {
        let alert = detect(&query(), &comparison(json!(150), json!(100)), Uuid::nil(), "shop").unwrap();

        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.current_value, 150.0);
        assert_eq!(alert.previous_value, 100.0);
        assert_eq!(alert.change_percent, 50.0);
        assert_eq!(alert.table_name, "orders");
        assert_eq!(alert.column_name, "amount");
        assert!(alert.description.contains("increased by 50%"));
        assert!(alert.detail.contains("total 150 across 12 rows"));
        assert!(alert.detail.contains("total 100 across 10 rows"));
        assert!(!alert.seen && !alert.dismissed);
    }

    #[test]
    fn test_no_alert_for_small_or_empty_changes() {
        assert!(detect(&query(), &comparison(json!(110), json!(100)), Uuid::nil(), "shop").is_none());
        assert!(detect(&query(), &comparison(json!(0), json!(0)), Uuid::nil(), "shop").is_none());
        assert!(detect(&query(), &result(vec![]), Uuid::nil(), "shop").is_none());
    }

    #[test]
    fn test_periods_matched_by_label() {
        let swapped = result(vec![
            row(&[("period", json!("previous")), ("total", json!(100.0)), ("row_count", json!(4))]),
            row(&[("period", json!("current")), ("total", json!(40.5)), ("row_count", json!(2))]),
        ]);
        let (current, previous) = extract_periods(&swapped).unwrap();
        assert_eq!(current.total, 40.5);
        assert_eq!(previous.total, 100.0);
        assert_eq!(previous.row_count, 4);
    }

    #[test]
    fn test_periods_fall_back_to_row_order() {
        let unlabelled = result(vec![
            row(&[("total", json!("80")), ("row_count", json!(8))]),
            row(&[("total", json!(null)), ("row_count", json!(0))]),
        ]);
        let (current, previous) = extract_periods(&unlabelled).unwrap();
        assert_eq!(current.total, 80.0);
        assert_eq!(previous.total, 0.0);
    }

    proptest! {
        #[test]
        fn prop_alert_iff_change_reaches_threshold(current in 0u32..1_000_000, previous in 1u32..1_000_000) {
            let change = percent_change(current as f64, previous as f64).unwrap();
            let alert = detect(&query(), &comparison(json!(current), json!(previous)), Uuid::nil(), "shop");

            prop_assert_eq!(alert.is_some(), change.abs() >= 20.0);
            if let Some(alert) = alert {
                prop_assert_eq!(alert.change_percent, change);
                prop_assert_eq!(alert.description.contains("increased"), current > previous);
            }
        }
    }
}
