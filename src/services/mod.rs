pub mod order_service;
pub mod payment_service;
pub mod product_service;
pub mod promotion_service;

pub use order_service::OrderService;
pub use payment_service::PaymentService;
pub use product_service::ProductService;
pub use promotion_service::PromotionService;

use chrono::NaiveDateTime;

use crate::db::filter::{build_predicate, ColumnSet, FilterDescriptor, FilterForm, PredicateMode};
use crate::db::Listing;
use crate::utils::errors::AppResult;
use crate::utils::page::PaginationRequest;

/// Local wall-clock time, as stored in the DATETIME columns
pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Validate the page request and turn raw filter forms into a listing
pub(crate) fn build_listing(
    pagination: PaginationRequest,
    filters: &[FilterForm],
    columns: &ColumnSet,
    mode: PredicateMode,
) -> AppResult<Listing> {
    pagination.validate()?;

    let descriptors = FilterDescriptor::parse_all(filters)?;
    let filter = build_predicate(&descriptors, columns, mode)?;

    Ok(Listing::new(pagination).with_filter(filter))
}
