//! Filter descriptors: the `{field, type, value}` triples sent by listing clients

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::utils::errors::{AppError, AppResult};
use crate::utils::only_digits;

/// Filter operator. `All` ignores the field and searches every searchable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    LessThan,
    LessThanOrEqual,
    MoreThan,
    MoreThanOrEqual,
    Between,
    All,
}

impl FilterOperator {
    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "equals" => Ok(Self::Equals),
            "notEquals" => Ok(Self::NotEquals),
            "contains" => Ok(Self::Contains),
            "lessThan" => Ok(Self::LessThan),
            "lessThanOrEqual" => Ok(Self::LessThanOrEqual),
            "moreThan" => Ok(Self::MoreThan),
            "moreThanOrEqual" => Ok(Self::MoreThanOrEqual),
            "between" => Ok(Self::Between),
            "all" => Ok(Self::All),
            other => Err(AppError::validation(format!(
                "unknown filter operator '{}'",
                other
            ))),
        }
    }
}

/// A single filter value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn from_json(value: &Value) -> AppResult<Self> {
        match value {
            Value::Bool(b) => Ok(Scalar::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Scalar::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Scalar::Float(f))
                } else {
                    Err(AppError::validation(format!("unsupported number {}", n)))
                }
            }
            Value::String(s) => Ok(Scalar::Text(s.clone())),
            Value::Null => Err(AppError::validation("filter value must not be empty")),
            Value::Array(_) | Value::Object(_) => Err(AppError::validation(
                "filter value must be a string, number or boolean",
            )),
        }
    }

    /// Digit-only projection of the textual form
    pub fn digits(&self) -> String {
        only_digits(&self.to_string())
    }

    /// Numeric view, parsing text when possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Bool(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Float(f) => Value::from(*f),
            Scalar::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// Value side of a descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Scalar),
    /// Inclusive `[from, to]`
    Range(Scalar, Scalar),
    List(Vec<Scalar>),
}

impl FilterValue {
    fn from_json(value: &Value, operator: FilterOperator) -> AppResult<Self> {
        match value {
            Value::Array(items) => {
                let scalars = items
                    .iter()
                    .map(Scalar::from_json)
                    .collect::<AppResult<Vec<_>>>()?;

                if operator == FilterOperator::Between {
                    let mut iter = scalars.into_iter();
                    match (iter.next(), iter.next(), iter.next()) {
                        (Some(from), Some(to), None) => Ok(FilterValue::Range(from, to)),
                        _ => Err(AppError::validation(
                            "between range must have exactly two values",
                        )),
                    }
                } else if scalars.is_empty() {
                    Err(AppError::validation("filter value list must not be empty"))
                } else {
                    Ok(FilterValue::List(scalars))
                }
            }
            Value::Object(map) => match (map.get("from"), map.get("to")) {
                (Some(from), Some(to)) => Ok(FilterValue::Range(
                    Scalar::from_json(from)?,
                    Scalar::from_json(to)?,
                )),
                _ => Err(AppError::validation(
                    "object filter values must have 'from' and 'to'",
                )),
            },
            other => Ok(FilterValue::Scalar(Scalar::from_json(other)?)),
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            FilterValue::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

/// Wire shape of a filter, as posted by listing clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterForm {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default, rename = "type")]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Value,
}

/// Validated field/operator/value triple
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDescriptor {
    pub field: Option<String>,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl FilterDescriptor {
    pub fn new(field: &str, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            field: Some(field.to_string()),
            operator,
            value,
        }
    }

    /// Free-text search over every registered column
    pub fn all(text: impl Into<String>) -> Self {
        Self {
            field: None,
            operator: FilterOperator::All,
            value: FilterValue::Scalar(Scalar::Text(text.into())),
        }
    }

    pub fn scalar(field: &str, operator: FilterOperator, value: Scalar) -> Self {
        Self::new(field, operator, FilterValue::Scalar(value))
    }

    /// Parse a list of wire forms; any malformed entry fails the whole list
    pub fn parse_all(forms: &[FilterForm]) -> AppResult<Vec<Self>> {
        forms.iter().map(Self::try_from).collect()
    }
}

impl TryFrom<&FilterForm> for FilterDescriptor {
    type Error = AppError;

    fn try_from(form: &FilterForm) -> AppResult<Self> {
        // A missing type falls through to column-class dispatch
        let operator = match form.operator.as_deref() {
            None | Some("") => FilterOperator::Equals,
            Some(raw) => FilterOperator::parse(raw)?,
        };

        let field = form
            .field
            .as_ref()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());

        if field.is_none() && operator != FilterOperator::All {
            return Err(AppError::validation(
                "filter field is required unless type is 'all'",
            ));
        }

        Ok(Self {
            field,
            operator,
            value: FilterValue::from_json(&form.value, operator)?,
        })
    }
}
