//! In-memory evaluation of predicates, used by the in-memory stores

use chrono::{NaiveDate, NaiveDateTime};
use std::cmp::Ordering;

use crate::db::filter::descriptor::Scalar;
use crate::db::filter::predicate::{Comparison, Predicate};

/// Column value as seen by the evaluator
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    IntList(Vec<i64>),
}

impl From<Option<String>> for ColumnValue {
    fn from(value: Option<String>) -> Self {
        value.map(ColumnValue::Text).unwrap_or(ColumnValue::Null)
    }
}

impl From<Option<i64>> for ColumnValue {
    fn from(value: Option<i64>) -> Self {
        value.map(ColumnValue::Int).unwrap_or(ColumnValue::Null)
    }
}

impl From<Option<NaiveDateTime>> for ColumnValue {
    fn from(value: Option<NaiveDateTime>) -> Self {
        value.map(ColumnValue::DateTime).unwrap_or(ColumnValue::Null)
    }
}

/// A row that exposes its columns by their SQL names
pub trait FilterRow {
    fn column(&self, name: &str) -> ColumnValue;
}

/// Parse the date formats accepted by filters: RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn compare(column: &ColumnValue, value: &Scalar) -> Option<Ordering> {
    match column {
        ColumnValue::Null | ColumnValue::IntList(_) => None,
        ColumnValue::Int(i) => (*i as f64).partial_cmp(&value.as_f64()?),
        ColumnValue::Float(f) => f.partial_cmp(&value.as_f64()?),
        ColumnValue::Bool(b) => {
            let other = match value {
                Scalar::Bool(v) => *v,
                Scalar::Int(i) => *i != 0,
                Scalar::Text(s) => match s.as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return None,
                },
                Scalar::Float(_) => return None,
            };
            Some(b.cmp(&other))
        }
        ColumnValue::Text(text) => match value.as_f64() {
            // Amount columns hold digit strings; compare them numerically
            Some(number) if !matches!(value, Scalar::Text(_)) || text.parse::<f64>().is_ok() => {
                text.parse::<f64>().ok()?.partial_cmp(&number)
            }
            _ => Some(text.as_str().cmp(value.to_string().as_str())),
        },
        ColumnValue::DateTime(dt) => Some(dt.cmp(&parse_datetime(&value.to_string())?)),
    }
}

fn as_text(column: &ColumnValue) -> Option<String> {
    match column {
        ColumnValue::Text(s) => Some(s.clone()),
        ColumnValue::Int(i) => Some(i.to_string()),
        ColumnValue::Float(f) => Some(f.to_string()),
        ColumnValue::Bool(b) => Some(b.to_string()),
        ColumnValue::DateTime(dt) => Some(dt.to_string()),
        ColumnValue::Null | ColumnValue::IntList(_) => None,
    }
}

impl Predicate {
    /// Whether `row` satisfies this predicate. NULL columns never match.
    pub fn matches<R: FilterRow + ?Sized>(&self, row: &R) -> bool {
        match self {
            Predicate::Compare { column, op, value } => {
                let Some(ordering) = compare(&row.column(column), value) else {
                    return false;
                };
                match op {
                    Comparison::Eq => ordering == Ordering::Equal,
                    Comparison::Ne => ordering != Ordering::Equal,
                    Comparison::Lt => ordering == Ordering::Less,
                    Comparison::Le => ordering != Ordering::Greater,
                    Comparison::Gt => ordering == Ordering::Greater,
                    Comparison::Ge => ordering != Ordering::Less,
                }
            }
            Predicate::ContainsText { column, needle } => as_text(&row.column(column))
                .map(|text| text.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Predicate::DigitsEqual { column, digits } => match row.column(column) {
                ColumnValue::Int(i) => digits.parse::<i64>().map(|d| d == i).unwrap_or(false),
                ColumnValue::Float(f) => digits.parse::<f64>().map(|d| d == f).unwrap_or(false),
                ColumnValue::Text(text) => match (text.parse::<i64>(), digits.parse::<i64>()) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => text == *digits,
                },
                _ => false,
            },
            Predicate::DayEquals { column, day } => match row.column(column) {
                ColumnValue::DateTime(dt) => parse_datetime(&day.to_string())
                    .map(|wanted| wanted.date() == dt.date())
                    .unwrap_or(false),
                _ => false,
            },
            Predicate::ArrayContains { column, value } => match row.column(column) {
                ColumnValue::IntList(items) => value
                    .as_i64()
                    .map(|wanted| items.contains(&wanted))
                    .unwrap_or(false),
                _ => false,
            },
            Predicate::Not(inner) => !inner.matches(row),
            Predicate::And(terms) => terms.iter().all(|p| p.matches(row)),
            Predicate::Or(terms) => terms.iter().any(|p| p.matches(row)),
        }
    }
}
