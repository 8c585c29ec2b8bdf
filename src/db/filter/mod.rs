//! Query filter engine
//!
//! Turns `{field, type, value}` descriptors into a typed [`Predicate`], which is
//! then either rendered into a MySQL `WHERE` clause with bound parameters or
//! evaluated in memory against a [`FilterRow`].

pub mod descriptor;
pub mod memory;
pub mod predicate;
pub mod sql;

pub use descriptor::{FilterDescriptor, FilterForm, FilterOperator, FilterValue, Scalar};
pub use memory::{parse_datetime, ColumnValue, FilterRow};
pub use predicate::{build_predicate, ColumnClass, ColumnSet, Comparison, Predicate, PredicateMode};
pub use sql::{escape_like, push_where};
