//! Response validators for URL probes.
//!
//! Three shapes are supported: HTTP status line, body regexp, and a JSON
//! value extracted by a dotted path. Validation failures (bad regexp,
//! unparseable body, missing path) populate the report's errors and leave
//! the status `Unknown`; only a completed validation yields a verdict.

use regex::Regex;
use serde_json::Value;

use crate::health::{HealthReport, HealthStatus};

use super::{ProbeSpec, ProbeType};

/// Any status code outside 4xx/5xx counts as healthy by default.
pub const DEFAULT_STATUS_EXPR: &str = r"^[^(4|5)]\d\d";

/// Match a value against a regular expression.
///
/// Returns `Healthy`/`Unhealthy` on a completed match, or `Unknown` plus an
/// error when the expression does not compile.
pub fn check_validity(value: &str, expr: &str) -> (HealthStatus, Vec<String>) {
    match Regex::new(expr) {
        Err(_) => (
            HealthStatus::Unknown,
            vec![format!("RegExp [{expr}] failed syntax check.")],
        ),
        Ok(re) => {
            if re.is_match(value) {
                (HealthStatus::Healthy, Vec::new())
            } else {
                (HealthStatus::Unhealthy, Vec::new())
            }
        }
    }
}

pub(super) fn check_http_status(report: &mut HealthReport, status_line: &str, spec: &ProbeSpec) {
    let expr = match spec.regexp.as_deref() {
        Some(expr) if !expr.is_empty() => expr,
        _ => DEFAULT_STATUS_EXPR,
    };

    let (status, errors) = check_validity(status_line, expr);
    report.status = status;
    report.errors.extend(errors);
    report.text = Some(status_line.to_string());
}

pub(super) fn check_http_body(report: &mut HealthReport, body: &str, spec: &ProbeSpec) {
    let expr = match spec.regexp.as_deref() {
        Some(expr) if !expr.is_empty() => expr,
        _ => {
            report
                .errors
                .push(format!("regexp can not be null when type='{}'", ProbeType::HttpBody));
            return;
        }
    };

    let (status, errors) = check_validity(body, expr);
    report.status = status;
    report.errors.extend(errors);
    report.text = match status {
        HealthStatus::Healthy => Some("healthy".to_string()),
        HealthStatus::Unhealthy => Some("unhealthy".to_string()),
        _ => None,
    };
}

pub(super) fn check_json(report: &mut HealthReport, body: &str, spec: &ProbeSpec) {
    let path = match spec.json_path.as_deref() {
        Some(path) if !path.is_empty() => path,
        _ => {
            report
                .errors
                .push(format!("jsonpath can not be null when type='{}'", ProbeType::Json));
            return;
        }
    };

    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => {
            report.errors.push(err.to_string());
            return;
        }
    };

    let raw = match query_path(&parsed, path) {
        Ok(value) => value,
        Err(err) => {
            report.errors.push(err);
            return;
        }
    };

    // Booleans and numbers compare through their lexical form.
    let value = match raw {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Number(n) => n.to_string(),
        _ => {
            report.errors.push(
                "json value type assertion failed: only string, bool, and number values are supported"
                    .to_string(),
            );
            return;
        }
    };

    report.text = Some(value.clone());

    let expr = match spec.regexp.as_deref() {
        Some(expr) if !expr.is_empty() => expr,
        _ => ".",
    };
    let (status, errors) = check_validity(&value, expr);
    report.status = status;
    report.errors.extend(errors);
}

/// Resolve a dotted path in a JSON document.
///
/// Segments are separated by `.`; a segment may be single-quoted to contain
/// literal dots, as in `nested.'light.color'`. A segment that parses as an
/// index steps into arrays.
pub fn query_path<'a>(value: &'a Value, path: &str) -> Result<&'a Value, String> {
    let mut current = value;
    for segment in split_path(path)? {
        let next = match current {
            Value::Object(map) => map.get(&segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| format!("json path [{path}] not found in response body"))?;
    }
    Ok(current)
}

fn split_path(path: &str) -> Result<Vec<String>, String> {
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();

    loop {
        let mut segment = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            loop {
                match chars.next() {
                    Some('\'') => break,
                    Some(c) => segment.push(c),
                    None => return Err(format!("json path [{path}] has an unterminated quote")),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == '.' {
                    break;
                }
                segment.push(c);
                chars.next();
            }
        }

        if segment.is_empty() {
            return Err(format!("json path [{path}] has an empty segment"));
        }
        segments.push(segment);

        match chars.next() {
            None => return Ok(segments),
            Some('.') => continue,
            Some(c) => return Err(format!("json path [{path}] has unexpected character [{c}]")),
        }
    }
}
