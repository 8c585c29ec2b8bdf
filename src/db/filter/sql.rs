//! Render predicates into a `sqlx::QueryBuilder<MySql>`
//!
//! Column names come from the registered [`ColumnSet`](super::ColumnSet) and are
//! pushed as SQL text; every value goes through `push_bind`.

use sqlx::{MySql, QueryBuilder};

use crate::db::filter::descriptor::Scalar;
use crate::db::filter::predicate::Predicate;

/// Escape `%`, `_` and the escape character itself for a LIKE pattern
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_scalar(qb: &mut QueryBuilder<'_, MySql>, value: &Scalar) {
    match value {
        Scalar::Bool(b) => qb.push_bind(*b),
        Scalar::Int(i) => qb.push_bind(*i),
        Scalar::Float(f) => qb.push_bind(*f),
        Scalar::Text(s) => qb.push_bind(s.clone()),
    };
}

impl Predicate {
    /// Append this predicate as a boolean SQL expression
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, MySql>) {
        match self {
            Predicate::Compare { column, op, value } => {
                qb.push(*column).push(" ").push(op.as_sql()).push(" ");
                push_scalar(qb, value);
            }
            Predicate::ContainsText { column, needle } => {
                qb.push("LOWER(").push(*column).push(") LIKE ");
                qb.push_bind(format!("%{}%", escape_like(&needle.to_lowercase())));
            }
            Predicate::DigitsEqual { column, digits } => {
                qb.push(*column).push(" = ");
                match digits.parse::<i64>() {
                    Ok(number) => qb.push_bind(number),
                    Err(_) => qb.push_bind(digits.clone()),
                };
            }
            Predicate::DayEquals { column, day } => {
                qb.push("DATE(").push(*column).push(") = DATE(");
                push_scalar(qb, day);
                qb.push(")");
            }
            Predicate::ArrayContains { column, value } => {
                qb.push("JSON_CONTAINS(").push(*column).push(", ");
                qb.push_bind(value.to_json().to_string());
                qb.push(")");
            }
            Predicate::Not(inner) => {
                qb.push("NOT (");
                inner.push_sql(qb);
                qb.push(")");
            }
            Predicate::And(terms) => push_group(qb, terms, " AND ", "1 = 1"),
            Predicate::Or(terms) => push_group(qb, terms, " OR ", "1 = 0"),
        }
    }
}

fn push_group(qb: &mut QueryBuilder<'_, MySql>, terms: &[Predicate], separator: &str, empty: &str) {
    if terms.is_empty() {
        qb.push(empty);
        return;
    }

    qb.push("(");
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        term.push_sql(qb);
    }
    qb.push(")");
}

/// Append ` WHERE ...` for all present predicates, AND-ed
pub fn push_where(qb: &mut QueryBuilder<'_, MySql>, predicates: &[&Predicate]) {
    for (i, predicate) in predicates.iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        qb.push("(");
        predicate.push_sql(qb);
        qb.push(")");
    }
}
