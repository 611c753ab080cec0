//! Comparison operators for filter/condition nodes.
//!
//! Both operands are parsed as numbers first; if either side does not parse,
//! the string operator set applies instead.

use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Evaluate `actual <operator> expected`.
///
/// A missing operand is `false`, except for the emptiness checks which only
/// look at `actual`. Unknown operators are `false` with a warning.
pub fn evaluate(actual: Option<&Value>, operator: &str, expected: Option<&Value>) -> bool {
    let op = operator.trim().to_lowercase();

    match op.as_str() {
        "is_empty" => return actual.map_or(true, |v| as_text(v).is_empty()),
        "is_not_empty" => return actual.is_some_and(|v| !as_text(v).is_empty()),
        _ => {}
    }

    let (Some(actual), Some(expected)) = (non_null(actual), non_null(expected)) else {
        warn!(operator = %op, "Condition operand missing; evaluating to false");
        return false;
    };

    let actual = as_text(actual);
    let expected = as_text(expected);

    match (parse_number(&actual), parse_number(&expected)) {
        (Some(a), Some(e)) => compare_numbers(a, &op, e),
        _ => compare_strings(&actual, &op, &expected),
    }
}

fn compare_numbers(a: f64, op: &str, e: f64) -> bool {
    match op {
        ">" | "gt" | "greater_than" => a > e,
        "<" | "lt" | "less_than" => a < e,
        ">=" | "gte" | "greater_than_or_equal" => a >= e,
        "<=" | "lte" | "less_than_or_equal" => a <= e,
        "==" | "eq" | "equals" => a == e,
        "!=" | "neq" | "not_equals" => a != e,
        other => {
            warn!(operator = %other, "Unknown numeric operator");
            false
        }
    }
}

fn compare_strings(a: &str, op: &str, e: &str) -> bool {
    match op {
        "==" | "eq" | "equals" => a == e,
        "!=" | "neq" | "not_equals" => a != e,
        "contains" => a.contains(e),
        "not_contains" => !a.contains(e),
        "starts_with" => a.starts_with(e),
        "ends_with" => a.ends_with(e),
        "equals_ignore_case" => a.to_lowercase() == e.to_lowercase(),
        "matches" | "regex" => full_match(a, e),
        other => {
            warn!(operator = %other, "Unknown string operator");
            false
        }
    }
}

/// Whole-string regex match; an invalid pattern never matches.
fn full_match(text: &str, pattern: &str) -> bool {
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid regex in condition");
            false
        }
    }
}

fn non_null(v: Option<&Value>) -> Option<&Value> {
    v.filter(|v| !v.is_null())
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}
