//! Filtered, paginated listings
//!
//! A [`Listing`] carries the caller scope (always AND-ed), the user filter and
//! the page request. Stores run it either as `COUNT` + `SELECT ... LIMIT` against
//! MySQL or over an in-memory slice.

use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::{FromRow, MySql, QueryBuilder};

use crate::db::filter::{push_where, FilterRow, Predicate};
use crate::utils::page::PaginationRequest;

#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub scope: Vec<Predicate>,
    pub filter: Option<Predicate>,
    pub pagination: PaginationRequest,
}

impl Listing {
    pub fn new(pagination: PaginationRequest) -> Self {
        Self {
            scope: Vec::new(),
            filter: None,
            pagination,
        }
    }

    pub fn with_scope(mut self, predicate: Predicate) -> Self {
        self.scope.push(predicate);
        self
    }

    pub fn with_filter(mut self, filter: Option<Predicate>) -> Self {
        self.filter = filter;
        self
    }

    pub fn predicates(&self) -> Vec<&Predicate> {
        self.scope.iter().chain(self.filter.iter()).collect()
    }

    pub fn matches<R: FilterRow + ?Sized>(&self, row: &R) -> bool {
        self.predicates().iter().all(|p| p.matches(row))
    }
}

/// `SELECT COUNT(*)` over the listing's predicates
pub fn count_sql<'a>(table: &str, listing: &Listing) -> QueryBuilder<'a, MySql> {
    let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", table));
    push_where(&mut qb, &listing.predicates());
    qb
}

/// Page query: `skip` comes from the fixed page window, `take` bounds the rows
pub fn select_page_sql<'a>(table: &str, order_by: &str, listing: &Listing) -> QueryBuilder<'a, MySql> {
    let mut qb = QueryBuilder::new(format!("SELECT * FROM {}", table));
    push_where(&mut qb, &listing.predicates());
    qb.push(" ORDER BY ").push(order_by);
    let take = i64::try_from(listing.pagination.take).unwrap_or(i64::MAX);
    let skip = i64::try_from(listing.pagination.skip()).unwrap_or(i64::MAX);
    qb.push(" LIMIT ").push_bind(take);
    qb.push(" OFFSET ").push_bind(skip);
    qb
}

/// Run a listing against one table. Returns the page rows and the total match count.
pub async fn fetch_page<T>(
    pool: &MySqlPool,
    table: &str,
    order_by: &str,
    listing: &Listing,
) -> Result<(Vec<T>, u64), sqlx::Error>
where
    T: for<'r> FromRow<'r, MySqlRow> + Send + Unpin,
{
    let total: i64 = count_sql(table, listing)
        .build_query_scalar()
        .fetch_one(pool)
        .await?;

    let rows = select_page_sql(table, order_by, listing)
        .build_query_as::<T>()
        .fetch_all(pool)
        .await?;

    tracing::debug!(
        table,
        total,
        page = listing.pagination.page,
        returned = rows.len(),
        "listing fetched"
    );

    Ok((rows, total.max(0) as u64))
}

/// In-memory counterpart of [`fetch_page`]; `rows` must already be ordered
pub fn paginate<T, I>(rows: I, listing: &Listing) -> (Vec<T>, u64)
where
    T: FilterRow,
    I: IntoIterator<Item = T>,
{
    let matching: Vec<T> = rows.into_iter().filter(|row| listing.matches(row)).collect();
    let total = matching.len() as u64;
    let page = matching
        .into_iter()
        .skip(usize::try_from(listing.pagination.skip()).unwrap_or(usize::MAX))
        .take(usize::try_from(listing.pagination.take).unwrap_or(usize::MAX))
        .collect();

    (page, total)
}
