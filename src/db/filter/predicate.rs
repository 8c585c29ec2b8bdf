//! Typed predicate tree built from filter descriptors
//!
//! Field names are resolved against a [`ColumnSet`] whitelist; the resulting
//! [`Predicate`] only ever holds `&'static str` column names taken from that set,
//! values stay as data until they are bound by the SQL renderer.

use std::collections::HashSet;

use crate::db::filter::descriptor::{FilterDescriptor, FilterOperator, FilterValue, Scalar};
use crate::utils::errors::{AppError, AppResult};

/// How successive descriptors combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredicateMode {
    /// Every descriptor is AND-ed; `all` contributes one OR group
    #[default]
    Conjunctive,
    /// Each non-`all` predicate replaces what was accumulated so far and `all`
    /// OR-chains onto it. Kept for listings that depended on that behavior.
    LastWins,
}

/// Column class a field is registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    /// Case-insensitive substring match
    Like,
    /// Digit-normalized equality
    Number,
    /// Exact equality
    EqualString,
    /// Membership in a JSON integer array
    NumberArray,
    /// Calendar-day equality, timestamp comparisons
    Date,
    /// Amount in cents: digit-normalized equality, numeric comparisons
    ValueCents,
}

/// Filterable columns of one listing, grouped by class
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnSet {
    pub like: &'static [&'static str],
    pub numbers: &'static [&'static str],
    pub equal_strings: &'static [&'static str],
    pub numbers_array: &'static [&'static str],
    pub dates: &'static [&'static str],
    pub value_cents: &'static [&'static str],
}

impl ColumnSet {
    pub const EMPTY: ColumnSet = ColumnSet {
        like: &[],
        numbers: &[],
        equal_strings: &[],
        numbers_array: &[],
        dates: &[],
        value_cents: &[],
    };

    /// Look a field up, returning the registered column name and its class.
    /// Classes are tried in dispatch order.
    pub fn resolve(&self, field: &str) -> Option<(&'static str, ColumnClass)> {
        let classes = [
            (self.like, ColumnClass::Like),
            (self.numbers, ColumnClass::Number),
            (self.equal_strings, ColumnClass::EqualString),
            (self.numbers_array, ColumnClass::NumberArray),
            (self.dates, ColumnClass::Date),
            (self.value_cents, ColumnClass::ValueCents),
        ];

        classes.into_iter().find_map(|(columns, class)| {
            columns
                .iter()
                .find(|column| **column == field)
                .map(|column| (*column, class))
        })
    }

    fn resolve_or_reject(&self, field: Option<&str>) -> AppResult<(&'static str, ColumnClass)> {
        let field = field.ok_or_else(|| AppError::validation("filter field is required"))?;
        self.resolve(field)
            .ok_or_else(|| AppError::validation(format!("field '{}' cannot be filtered", field)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }

    fn from_operator(operator: FilterOperator) -> Option<Self> {
        match operator {
            FilterOperator::LessThan => Some(Comparison::Lt),
            FilterOperator::LessThanOrEqual => Some(Comparison::Le),
            FilterOperator::MoreThan => Some(Comparison::Gt),
            FilterOperator::MoreThanOrEqual => Some(Comparison::Ge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: &'static str,
        op: Comparison,
        value: Scalar,
    },
    /// Case-insensitive substring; `needle` is raw user text
    ContainsText {
        column: &'static str,
        needle: String,
    },
    /// Column equals the digit-only projection of the input
    DigitsEqual {
        column: &'static str,
        digits: String,
    },
    DayEquals {
        column: &'static str,
        day: Scalar,
    },
    ArrayContains {
        column: &'static str,
        value: Scalar,
    },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn and(predicates: Vec<Predicate>) -> Option<Predicate> {
        let mut flat = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            match predicate {
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }

        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Predicate::And(flat)),
        }
    }

    fn or_with(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut inner) => {
                inner.push(other);
                Predicate::Or(inner)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }
}

/// Accumulates predicates according to a [`PredicateMode`]
struct Accumulator {
    mode: PredicateMode,
    terms: Vec<Predicate>,
    current: Option<Predicate>,
}

impl Accumulator {
    fn new(mode: PredicateMode) -> Self {
        Self {
            mode,
            terms: Vec::new(),
            current: None,
        }
    }

    fn and_where(&mut self, predicate: Predicate) {
        match self.mode {
            PredicateMode::Conjunctive => self.terms.push(predicate),
            PredicateMode::LastWins => self.current = Some(predicate),
        }
    }

    /// Free-text search over several columns
    fn any_of(&mut self, disjuncts: Vec<Predicate>) {
        match self.mode {
            PredicateMode::Conjunctive => self.terms.push(Predicate::Or(disjuncts)),
            PredicateMode::LastWins => {
                for disjunct in disjuncts {
                    self.current = Some(match self.current.take() {
                        None => disjunct,
                        Some(current) => current.or_with(disjunct),
                    });
                }
            }
        }
    }

    fn finish(self) -> Option<Predicate> {
        match self.mode {
            PredicateMode::Conjunctive => Predicate::and(self.terms),
            PredicateMode::LastWins => self.current,
        }
    }
}

/// Build one predicate from a list of descriptors.
///
/// Returns `Ok(None)` when there is nothing to filter on. Unknown fields, a
/// `between` without both bounds and non-scalar values where a scalar is
/// expected are validation errors.
pub fn build_predicate(
    descriptors: &[FilterDescriptor],
    columns: &ColumnSet,
    mode: PredicateMode,
) -> AppResult<Option<Predicate>> {
    let mut acc = Accumulator::new(mode);
    let mut ranged_fields: HashSet<&str> = HashSet::new();

    for descriptor in descriptors {
        match descriptor.operator {
            FilterOperator::All => {
                let disjuncts = free_text_disjuncts(descriptor, columns)?;
                acc.any_of(disjuncts);
            }
            FilterOperator::LessThan
            | FilterOperator::LessThanOrEqual
            | FilterOperator::MoreThan
            | FilterOperator::MoreThanOrEqual => {
                let (column, _) = columns.resolve_or_reject(descriptor.field.as_deref())?;
                let op = Comparison::from_operator(descriptor.operator)
                    .ok_or_else(|| AppError::Internal("comparison operator expected".into()))?;
                let value = expect_scalar(descriptor)?.clone();
                acc.and_where(Predicate::Compare { column, op, value });
            }
            FilterOperator::Between => {
                let (column, _) = columns.resolve_or_reject(descriptor.field.as_deref())?;
                if !ranged_fields.insert(column) {
                    continue;
                }
                let (low, high) = range_bounds(column, descriptor, descriptors)?;
                let lower = Predicate::Compare {
                    column,
                    op: Comparison::Ge,
                    value: low,
                };
                let upper = Predicate::Compare {
                    column,
                    op: Comparison::Le,
                    value: high,
                };
                acc.and_where(lower);
                acc.and_where(upper);
            }
            FilterOperator::Equals | FilterOperator::Contains | FilterOperator::NotEquals => {
                let (column, class) = columns.resolve_or_reject(descriptor.field.as_deref())?;
                let matched = match &descriptor.value {
                    FilterValue::Scalar(value) => class_predicate(column, class, value)?,
                    FilterValue::List(values) => Predicate::Or(
                        values
                            .iter()
                            .map(|value| class_predicate(column, class, value))
                            .collect::<AppResult<Vec<_>>>()?,
                    ),
                    FilterValue::Range(_, _) => {
                        return Err(AppError::validation(format!(
                            "range value only allowed with 'between' on '{}'",
                            column
                        )))
                    }
                };

                if descriptor.operator == FilterOperator::NotEquals {
                    acc.and_where(Predicate::Not(Box::new(matched)));
                } else {
                    acc.and_where(matched);
                }
            }
        }
    }

    Ok(acc.finish())
}

fn expect_scalar(descriptor: &FilterDescriptor) -> AppResult<&Scalar> {
    descriptor.value.as_scalar().ok_or_else(|| {
        AppError::validation(format!(
            "filter on '{}' expects a single value",
            descriptor.field.as_deref().unwrap_or("all")
        ))
    })
}

/// Equality-style predicate for a column of the given class
fn class_predicate(column: &'static str, class: ColumnClass, value: &Scalar) -> AppResult<Predicate> {
    let predicate = match class {
        ColumnClass::Like => Predicate::ContainsText {
            column,
            needle: value.to_string(),
        },
        ColumnClass::Number | ColumnClass::ValueCents => {
            let digits = value.digits();
            if digits.is_empty() {
                return Err(AppError::validation(format!(
                    "'{}' expects a numeric value",
                    column
                )));
            }
            Predicate::DigitsEqual { column, digits }
        }
        ColumnClass::EqualString => Predicate::Compare {
            column,
            op: Comparison::Eq,
            value: value.clone(),
        },
        ColumnClass::NumberArray => Predicate::ArrayContains {
            column,
            value: value.clone(),
        },
        ColumnClass::Date => Predicate::DayEquals {
            column,
            day: value.clone(),
        },
    };

    Ok(predicate)
}

/// One value matched against every searchable column
fn free_text_disjuncts(descriptor: &FilterDescriptor, columns: &ColumnSet) -> AppResult<Vec<Predicate>> {
    let value = expect_scalar(descriptor)?;
    let digits = value.digits();

    let mut disjuncts: Vec<Predicate> = columns
        .like
        .iter()
        .copied()
        .map(|column| Predicate::ContainsText {
            column,
            needle: value.to_string(),
        })
        .collect();

    disjuncts.extend(columns.equal_strings.iter().copied().map(|column| Predicate::Compare {
        column,
        op: Comparison::Eq,
        value: value.clone(),
    }));

    if !digits.is_empty() {
        disjuncts.extend(columns.numbers.iter().copied().map(|column| Predicate::DigitsEqual {
            column,
            digits: digits.clone(),
        }));
    }

    if disjuncts.is_empty() {
        return Err(AppError::validation(
            "free-text search is not available for this listing",
        ));
    }

    Ok(disjuncts)
}

/// Bounds for a ranged field: a `{from,to}` value on this descriptor, or the
/// values of exactly two `between` descriptors on the same field, in order.
fn range_bounds(
    column: &str,
    descriptor: &FilterDescriptor,
    descriptors: &[FilterDescriptor],
) -> AppResult<(Scalar, Scalar)> {
    if let FilterValue::Range(low, high) = &descriptor.value {
        return Ok((low.clone(), high.clone()));
    }

    let siblings: Vec<&Scalar> = descriptors
        .iter()
        .filter(|d| d.operator == FilterOperator::Between && d.field.as_deref() == Some(column))
        .filter_map(|d| d.value.as_scalar())
        .collect();

    match siblings.as_slice() {
        [low, high] => Ok(((*low).clone(), (*high).clone())),
        _ => Err(AppError::validation(format!(
            "'between' on '{}' needs exactly two values, got {}",
            column,
            siblings.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_COLUMNS: ColumnSet = ColumnSet {
        like: &["pro_name", "pro_description"],
        numbers: &["pro_status", "pro_cat_id"],
        equal_strings: &["pro_code"],
        numbers_array: &[],
        dates: &["pro_creation_date"],
        value_cents: &["pro_actual_value"],
    };

    fn between(field: &str, value: i64) -> FilterDescriptor {
        FilterDescriptor::scalar(field, FilterOperator::Between, Scalar::Int(value))
    }

    #[test]
    fn test_empty_input_builds_nothing() {
        let predicate = build_predicate(&[], &PRODUCT_COLUMNS, PredicateMode::Conjunctive).unwrap();
        assert!(predicate.is_none());
    }

    #[test]
    fn test_between_pairs_sibling_descriptors() {
        let descriptors = [between("pro_actual_value", 100), between("pro_actual_value", 200)];
        let predicate = build_predicate(&descriptors, &PRODUCT_COLUMNS, PredicateMode::Conjunctive)
            .unwrap()
            .unwrap();

        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::Compare {
                    column: "pro_actual_value",
                    op: Comparison::Ge,
                    value: Scalar::Int(100)
                },
                Predicate::Compare {
                    column: "pro_actual_value",
                    op: Comparison::Le,
                    value: Scalar::Int(200)
                },
            ])
        );
    }

    #[test]
    fn test_between_without_pair_is_rejected() {
        let descriptors = [between("pro_actual_value", 100)];
        let result = build_predicate(&descriptors, &PRODUCT_COLUMNS, PredicateMode::Conjunctive);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let descriptors = [FilterDescriptor::scalar(
            "pro_name; DROP TABLE pro_product",
            FilterOperator::Equals,
            Scalar::Text("x".into()),
        )];
        let result = build_predicate(&descriptors, &PRODUCT_COLUMNS, PredicateMode::Conjunctive);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_all_searches_every_column_class() {
        let descriptors = [FilterDescriptor::all("42")];
        let predicate = build_predicate(&descriptors, &PRODUCT_COLUMNS, PredicateMode::Conjunctive)
            .unwrap()
            .unwrap();

        let Predicate::Or(disjuncts) = predicate else {
            panic!("expected an OR group");
        };
        // 2 like + 1 equal string + 2 numbers
        assert_eq!(disjuncts.len(), 5);
        assert!(disjuncts.contains(&Predicate::DigitsEqual {
            column: "pro_status",
            digits: "42".into()
        }));
    }

    #[test]
    fn test_all_skips_numbers_without_digits() {
        let descriptors = [FilterDescriptor::all("rice")];
        let predicate = build_predicate(&descriptors, &PRODUCT_COLUMNS, PredicateMode::Conjunctive)
            .unwrap()
            .unwrap();

        let Predicate::Or(disjuncts) = predicate else {
            panic!("expected an OR group");
        };
        assert_eq!(disjuncts.len(), 3);
    }

    #[test]
    fn test_class_dispatch() {
        let contains = [FilterDescriptor::scalar(
            "pro_name",
            FilterOperator::Equals,
            Scalar::Text("Rice".into()),
        )];
        assert_eq!(
            build_predicate(&contains, &PRODUCT_COLUMNS, PredicateMode::Conjunctive).unwrap(),
            Some(Predicate::ContainsText {
                column: "pro_name",
                needle: "Rice".into()
            })
        );

        let number = [FilterDescriptor::scalar(
            "pro_actual_value",
            FilterOperator::Equals,
            Scalar::Text("R$ 10,50".into()),
        )];
        assert_eq!(
            build_predicate(&number, &PRODUCT_COLUMNS, PredicateMode::Conjunctive).unwrap(),
            Some(Predicate::DigitsEqual {
                column: "pro_actual_value",
                digits: "1050".into()
            })
        );

        let negated = [FilterDescriptor::scalar(
            "pro_code",
            FilterOperator::NotEquals,
            Scalar::Text("A1".into()),
        )];
        assert!(matches!(
            build_predicate(&negated, &PRODUCT_COLUMNS, PredicateMode::Conjunctive).unwrap(),
            Some(Predicate::Not(_))
        ));
    }

    #[test]
    fn test_conjunctive_keeps_every_predicate() {
        let descriptors = [
            FilterDescriptor::scalar("pro_status", FilterOperator::Equals, Scalar::Int(1)),
            FilterDescriptor::scalar("pro_actual_value", FilterOperator::LessThan, Scalar::Int(500)),
        ];
        let predicate = build_predicate(&descriptors, &PRODUCT_COLUMNS, PredicateMode::Conjunctive)
            .unwrap()
            .unwrap();

        assert!(matches!(predicate, Predicate::And(ref terms) if terms.len() == 2));
    }

    #[test]
    fn test_last_wins_replays_overwrite() {
        let descriptors = [
            FilterDescriptor::scalar("pro_status", FilterOperator::Equals, Scalar::Int(1)),
            FilterDescriptor::scalar("pro_actual_value", FilterOperator::LessThan, Scalar::Int(500)),
        ];
        let predicate = build_predicate(&descriptors, &PRODUCT_COLUMNS, PredicateMode::LastWins)
            .unwrap()
            .unwrap();

        assert_eq!(
            predicate,
            Predicate::Compare {
                column: "pro_actual_value",
                op: Comparison::Lt,
                value: Scalar::Int(500)
            }
        );
    }

    #[test]
    fn test_last_wins_or_chains_free_text() {
        let descriptors = [
            FilterDescriptor::scalar("pro_status", FilterOperator::Equals, Scalar::Int(1)),
            FilterDescriptor::all("rice"),
        ];
        let predicate = build_predicate(&descriptors, &PRODUCT_COLUMNS, PredicateMode::LastWins)
            .unwrap()
            .unwrap();

        let Predicate::Or(disjuncts) = predicate else {
            panic!("expected an OR chain");
        };
        assert_eq!(disjuncts.len(), 4);
        assert_eq!(
            disjuncts[0],
            Predicate::DigitsEqual {
                column: "pro_status",
                digits: "1".into()
            }
        );
    }
}
