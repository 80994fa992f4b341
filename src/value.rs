//! Semantic value helpers shared by validation and diffing.
//!
//! Documents arrive as normalized JSON values. These helpers decide what a
//! value *means* for a declared scalar kind: a number is a number whatever its
//! representation, and a date is a calendar date whether or not it carries a
//! time component.

use crate::schema::ScalarKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Parse an ISO date (`2024-03-01`) or timestamp (`2024-03-01T10:00:00Z`)
/// down to its calendar date.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.date_naive());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|ts| ts.date())
}

/// Whether a value counts as "not provided" for required checks.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// JSON equality where numbers compare by numeric value (`1` == `1.0`).
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| loose_eq(x, y)))
        }
        _ => a == b,
    }
}

/// Equality under a scalar kind's declared semantics.
///
/// Values that do not parse as the declared kind fall back to [`loose_eq`].
pub fn semantic_eq(kind: ScalarKind, a: &Value, b: &Value) -> bool {
    match kind {
        ScalarKind::Date => match (a.as_str().and_then(parse_date), b.as_str().and_then(parse_date)) {
            (Some(x), Some(y)) => x == y,
            _ => loose_eq(a, b),
        },
        ScalarKind::String
        | ScalarKind::Number
        | ScalarKind::Integer
        | ScalarKind::Boolean => loose_eq(a, b),
    }
}

/// Compare two optional values; absence only equals absence.
pub fn option_eq(kind: Option<ScalarKind>, a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => match kind {
            Some(kind) => semantic_eq(kind, a, b),
            None => loose_eq(a, b),
        },
        _ => false,
    }
}

/// Number with no fractional part, however it was written.
pub fn is_whole_number(value: &Value) -> bool {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => true,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_date_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_date("2024-03-01"), Some(expected));
        assert_eq!(parse_date("2024-03-01T23:15:00Z"), Some(expected));
        assert_eq!(parse_date("2024-03-01T08:00:00"), Some(expected));
        assert_eq!(parse_date("03/01/2024"), None);
    }

    #[test]
    fn test_loose_eq_ignores_number_representation() {
        assert!(loose_eq(&json!(3), &json!(3.0)));
        assert!(!loose_eq(&json!(3), &json!("3")));
        assert!(loose_eq(&json!({"q": 1, "p": "x"}), &json!({"p": "x", "q": 1.0})));
    }

    #[test]
    fn test_semantic_eq_dates_compare_calendar_day() {
        assert!(semantic_eq(
            ScalarKind::Date,
            &json!("2024-03-01"),
            &json!("2024-03-01T12:00:00Z")
        ));
        assert!(!semantic_eq(ScalarKind::Date, &json!("2024-03-01"), &json!("2024-03-02")));
        assert!(!semantic_eq(ScalarKind::String, &json!("2024-03-01"), &json!("2024-03-01T00:00:00Z")));
    }

    #[test]
    fn test_blank_and_whole_numbers() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&json!(null))));
        assert!(is_blank(Some(&json!("   "))));
        assert!(!is_blank(Some(&json!(0))));
        assert!(is_whole_number(&json!(5)));
        assert!(is_whole_number(&json!(5.0)));
        assert!(!is_whole_number(&json!(5.5)));
        assert!(!is_whole_number(&json!("5")));
    }
}
