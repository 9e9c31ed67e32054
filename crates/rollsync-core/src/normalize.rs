use crate::model::{CanonicalRecord, RawRow, RawValue};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Number, Value};
use std::collections::HashSet;

/// Numbers at or above this magnitude in a date field are epoch milliseconds;
/// smaller ones are epoch seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;
/// Largest integer an f64 holds exactly.
const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

const MISSING_SENTINELS: &[&str] = &[
    "nan", "-nan", "nat", "none", "null", "#n/a", "n/a", "<na>",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// True for text a spreadsheet export uses to mean "no value".
pub fn is_missing_sentinel(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty()
        || MISSING_SENTINELS
            .iter()
            .any(|sentinel| trimmed.eq_ignore_ascii_case(sentinel))
}

fn number_value(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < MAX_EXACT_F64_INT {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn canonical_value(value: &RawValue) -> Value {
    match value {
        RawValue::Null => Value::Null,
        RawValue::Number(n) => number_value(*n),
        RawValue::String(s) if is_missing_sentinel(s) => Value::Null,
        RawValue::String(s) => Value::String(s.clone()),
        // Outside a date field a native timestamp still must not reach the wire.
        RawValue::DateTime(dt) => Value::from(dt.timestamp_millis()),
    }
}

fn localize(naive: NaiveDateTime, source_offset: &FixedOffset) -> Option<DateTime<Utc>> {
    source_offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parses the date/time shapes the portal export has been seen to use.
/// Values without an offset are read in `source_offset`.
pub fn parse_datetime(text: &str, source_offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return localize(naive, source_offset);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .and_then(|naive| localize(naive, source_offset));
        }
    }

    None
}

fn epoch_from_number(n: f64) -> Option<i64> {
    if !n.is_finite() {
        return None;
    }
    let millis = if n.abs() >= EPOCH_MILLIS_THRESHOLD {
        n.round()
    } else {
        (n * 1000.0).round()
    };
    if millis.abs() >= MAX_EXACT_F64_INT {
        return None;
    }
    let millis = millis as i64;
    DateTime::from_timestamp_millis(millis).map(|_| millis)
}

/// Coerces a date-field cell to UTC epoch milliseconds; `None` when it cannot.
pub fn epoch_millis(value: &RawValue, source_offset: &FixedOffset) -> Option<i64> {
    match value {
        RawValue::Null => None,
        RawValue::DateTime(dt) => Some(dt.timestamp_millis()),
        RawValue::Number(n) => epoch_from_number(*n),
        RawValue::String(s) if is_missing_sentinel(s) => None,
        RawValue::String(s) => parse_datetime(s, source_offset).map(|dt| dt.timestamp_millis()),
    }
}

pub fn normalize_row(
    row: &RawRow,
    date_fields: &HashSet<&str>,
    source_offset: &FixedOffset,
) -> CanonicalRecord {
    let mut record = CanonicalRecord::new();
    for (column, value) in &row.cells {
        let canonical = if date_fields.contains(column.as_str()) {
            epoch_millis(value, source_offset).map(Value::from).unwrap_or(Value::Null)
        } else {
            canonical_value(value)
        };
        record.insert(column.clone(), canonical);
    }
    record
}

/// Converts every row; output has the same length and order as the input.
pub fn normalize_rows(
    rows: &[RawRow],
    date_fields: &[String],
    source_offset: &FixedOffset,
) -> Vec<CanonicalRecord> {
    let date_fields: HashSet<&str> = date_fields.iter().map(String::as_str).collect();
    rows.iter()
        .map(|row| normalize_row(row, &date_fields, source_offset))
        .collect()
}
